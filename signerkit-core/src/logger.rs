//! Log routing for hosts.
//!
//! Everything the crate logs goes through `tracing`. Native hosts and tests install a
//! subscriber with [`init_tracing`]; embedding hosts without one receive the records through
//! their own [`Logger`] after [`set_logger`]. Both are tuned with a [`LogFilter`], which sets
//! a level per [`LogArea`] of the crate.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tracing_subscriber::EnvFilter;

use crate::error::{SignerKitError, SignerKitResult};

const CRATE: &str = "signerkit_core";

/// Receives the crate's log records.
///
/// # Examples
///
/// ```rust
/// use signerkit_core::logger::{LogArea, LogLevel, Logger};
///
/// #[derive(Debug)]
/// struct StderrLogger;
///
/// impl Logger for StderrLogger {
///     fn log(&self, level: LogLevel, area: Option<LogArea>, message: String) {
///         let area = area.map_or_else(|| "deps".to_string(), |area| area.to_string());
///         eprintln!("[{level}] {area}: {message}");
///     }
/// }
/// ```
pub trait Logger: Send + Sync + std::fmt::Debug {
    /// Logs `message`. `area` is `None` for records of dependencies.
    fn log(&self, level: LogLevel, area: Option<LogArea>, message: String);
}

/// Severity, from the most to the least verbose.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    /// Step-by-step detail.
    Trace,
    /// State transitions.
    Debug,
    /// Lifecycle milestones.
    Info,
    /// Fallbacks and recoverable failures.
    Warn,
    /// Failures.
    Error,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

/// Part of the crate a record comes from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogArea {
    /// Topologies, signer kinds, state and chain access, stores.
    Core,
    /// The signature request engine.
    Signatures,
    /// Signer handlers and their prompts.
    Handlers,
    /// Transactions and relayers.
    Transactions,
    /// Signup, login, logout and devices.
    Wallets,
    /// Message signatures.
    Messages,
    /// Recovery signers and queued payloads.
    Recovery,
    /// Session manager tree and implicit sessions.
    Sessions,
    /// HTTP transport.
    Http,
}

impl LogArea {
    const fn modules(self) -> &'static [&'static str] {
        match self {
            Self::Core => &[
                "chain",
                "config",
                "envelope",
                "kinds",
                "logger",
                "primitives",
                "signer",
                "state",
                "store",
                "subscription",
                "topology",
            ],
            Self::Signatures => &["signatures"],
            Self::Handlers => &["handlers"],
            Self::Transactions => &["transactions"],
            Self::Wallets => &["wallets", "manager"],
            Self::Messages => &["messages"],
            Self::Recovery => &["recovery"],
            Self::Sessions => &["sessions"],
            Self::Http => &["http_request"],
        }
    }

    /// Area of the record logged from `module_path`, `None` outside the crate.
    #[must_use]
    pub fn of(module_path: &str) -> Option<Self> {
        let rest = module_path.strip_prefix(CRATE)?;
        if !rest.is_empty() && !rest.starts_with("::") {
            return None;
        }
        let module = rest.trim_start_matches("::").split("::").next().unwrap_or_default();
        Some(
            Self::iter()
                .find(|area| area.modules().contains(&module))
                .unwrap_or(Self::Core),
        )
    }
}

/// Minimum level per [`LogArea`].
///
/// Parsed from comma-separated directives: a bare level sets the default of the crate,
/// `area=level` overrides one area, e.g. `"info,signatures=debug,http=warn"`. Records of
/// dependencies pass from `info` up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    default: LogLevel,
    areas: BTreeMap<LogArea, LogLevel>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            default: LogLevel::Info,
            areas: BTreeMap::new(),
        }
    }
}

impl LogFilter {
    /// Parses `directives`.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InvalidInput`] for unknown areas or levels.
    pub fn parse(directives: &str) -> SignerKitResult<Self> {
        let mut filter = Self::default();
        for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            match directive.split_once('=') {
                None => filter.default = parse_part(directive)?,
                Some((area, level)) => {
                    filter
                        .areas
                        .insert(parse_part(area.trim())?, parse_part(level.trim())?);
                }
            }
        }
        Ok(filter)
    }

    /// Overrides the level of `area`.
    #[must_use]
    pub fn with_area(mut self, area: LogArea, level: LogLevel) -> Self {
        self.areas.insert(area, level);
        self
    }

    /// Level a record of `area` must reach.
    #[must_use]
    pub fn level(&self, area: Option<LogArea>) -> LogLevel {
        area.map_or(LogLevel::Info, |area| {
            self.areas.get(&area).copied().unwrap_or(self.default)
        })
    }

    /// Whether a record of `level` logged from `module_path` passes.
    #[must_use]
    pub fn enabled(&self, module_path: &str, level: LogLevel) -> bool {
        level >= self.level(LogArea::of(module_path))
    }

    /// The filter as `tracing-subscriber` directives.
    #[must_use]
    pub fn directives(&self) -> String {
        let mut directives = vec![LogLevel::Info.to_string(), format!("{CRATE}={}", self.default)];
        for (area, level) in &self.areas {
            directives.extend(
                area.modules()
                    .iter()
                    .map(|module| format!("{CRATE}::{module}={level}")),
            );
        }
        directives.join(",")
    }
}

fn parse_part<T>(part: &str) -> SignerKitResult<T>
where
    T: std::str::FromStr,
{
    part.parse().map_err(|_| SignerKitError::InvalidInput {
        attribute: "log_filter".to_string(),
        reason: format!("unknown area or level `{part}`"),
    })
}

struct ForeignLogger {
    logger: Arc<dyn Logger>,
    filter: LogFilter,
}

impl log::Log for ForeignLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.filter
            .enabled(metadata.target(), metadata.level().into())
    }

    fn log(&self, record: &log::Record) {
        let module_path = record.module_path().unwrap_or_else(|| record.target());
        let level = record.level().into();
        if !self.filter.enabled(module_path, level) {
            return;
        }
        self.logger
            .log(level, LogArea::of(module_path), record.args().to_string());
    }

    fn flush(&self) {}
}

static FOREIGN_LOGGER: OnceLock<ForeignLogger> = OnceLock::new();

/// Routes the crate's records to `logger`.
///
/// Only the first call takes effect, and only when no other `log` logger is installed.
/// `tracing` events reach the `log` facade only while no `tracing` subscriber is set.
pub fn set_logger(logger: Arc<dyn Logger>, filter: LogFilter) {
    if FOREIGN_LOGGER.set(ForeignLogger { logger, filter }).is_err() {
        tracing::warn!("logger already set");
        return;
    }
    let Some(installed) = FOREIGN_LOGGER.get() else {
        return;
    };
    match log::set_logger(installed) {
        Ok(()) => log::set_max_level(log::LevelFilter::Trace),
        Err(err) => eprintln!("failed to set logger: {err}"),
    }
}

/// Installs a `tracing` subscriber printing to stderr, for native hosts and tests.
///
/// `RUST_LOG` wins over `filter` when set. Does nothing if a subscriber is already set.
pub fn init_tracing(filter: &LogFilter) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.directives()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}

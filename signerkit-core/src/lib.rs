//! `signerkit-core` is the orchestration core of a smart-contract wallet client.
//!
//! A wallet is a contract whose authority is a weighted tree of signers (a configuration).
//! This crate composes those trees for the login signer, device keys, an optional guard and
//! the sapient modules, collects signatures for what the wallet is asked to authorize, and
//! drives the lifecycles built on top: signup and device logins, transactions through
//! relayers, messages, recovery and sessions.
//!
//! Every external service is a trait the host implements; [`Manager`] wires them together.
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Deployment the defaults of [`config::DefaultConfig`] are taken from.
#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Test networks and staging services.
    Staging,
    /// Main networks and production services.
    Production,
}

mod error;
pub use error::*;

pub mod config;
pub use config::{DefaultConfig, SignerKitConfig};

mod manager;
pub use manager::{Collaborators, Databases, Manager};

pub mod chain;
pub mod envelope;
pub mod handlers;
pub mod kinds;
pub mod logger;
pub mod messages;
pub mod primitives;
pub mod recovery;
pub mod sessions;
pub mod signatures;
pub mod signer;
pub mod state;
pub mod store;
pub mod subscription;
pub mod topology;
pub mod transactions;
pub mod wallets;

// private modules
mod http_request;

#[cfg(test)]
mod test_support;

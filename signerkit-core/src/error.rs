use alloy_primitives::Address;
use thiserror::Error;

use crate::signatures::Action;

/// Result alias used across `SignerKit`.
pub type SignerKitResult<T, E = SignerKitError> = std::result::Result<T, E>;

/// Broad classification of a [`SignerKitError`], used by hosts to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A logic or data-corruption bug. Never retried.
    Invariant,
    /// The operation was invoked in the wrong state. Safe to retry once the precondition holds.
    Precondition,
    /// An interactive step failed (wrong answer, declined prompt). The host may re-prompt.
    Interaction,
    /// A collaborator (relayer, identity service, storage, network) failed.
    External,
}

/// Error outputs from `SignerKit`
#[derive(Debug, Error)]
pub enum SignerKitError {
    /// The configuration does not have the `[[login, devices], guard?], modules]` shape.
    #[error("unknown_config_format: {0}")]
    UnknownConfigFormat(String),
    /// A state that should be unreachable was observed.
    #[error("impossible_state: {0}")]
    ImpossibleState(String),
    /// Per-call overrides do not line up with the calls of the transaction.
    #[error("mismatched_call_overrides: expected {expected}, got {found}")]
    MismatchedCallOverrides {
        /// Number of calls in the payload.
        expected: usize,
        /// Number of overrides supplied.
        found: usize,
    },
    /// The wallet's checkpoint cannot be incremented.
    #[error("checkpoint_overflow: {0}")]
    CheckpointOverflow(Address),

    /// The presented input is not valid for the requested operation
    #[error("invalid_input_{attribute}: {reason}")]
    InvalidInput {
        /// The attribute that is invalid
        attribute: String,
        /// The reason the input is invalid
        reason: String,
    },
    /// No signature request exists with the given id.
    #[error("signature_request_not_found: {0}")]
    SignatureRequestNotFound(String),
    /// The signature request is already completed or cancelled.
    #[error("signature_request_not_pending: {0}")]
    SignatureRequestNotPending(String),
    /// The signature request carries a different action than the operation expects.
    #[error("invalid_action for {id}: expected {expected}, found {found}")]
    InvalidAction {
        /// Signature request id.
        id: String,
        /// Action expected by the operation.
        expected: Action,
        /// Action found on the request.
        found: Action,
    },
    /// No transaction exists with the given id.
    #[error("transaction_not_found: {0}")]
    TransactionNotFound(String),
    /// The transaction is not in the state required by the transition.
    #[error("transaction {id} is not in {expected} state (found {found})")]
    InvalidTransactionStatus {
        /// Transaction id.
        id: String,
        /// Status required by the transition.
        expected: &'static str,
        /// Status currently held by the transaction.
        found: &'static str,
    },
    /// No message exists with the given id.
    #[error("message_not_found: {0}")]
    MessageNotFound(String),
    /// The collected signatures do not reach the threshold.
    #[error("insufficient weight: {weight} < {threshold}")]
    InsufficientWeight {
        /// Weight of the collected signatures.
        weight: u64,
        /// Threshold of the configuration.
        threshold: u64,
    },
    /// The wallet is unknown to this session or to the state provider.
    #[error("wallet_not_found: {0}")]
    WalletNotFound(Address),
    /// The wallet already has a local session.
    #[error("wallet_already_logged_in: {0}")]
    WalletAlreadyLoggedIn(Address),
    /// No relayer is registered under the given id.
    #[error("relayer_not_found: {0}")]
    RelayerNotFound(String),
    /// The selected relayer option is not part of the transaction.
    #[error("relayer_option_not_found: {0}")]
    RelayerOptionNotFound(String),
    /// A guard was requested but no guard is configured.
    #[error("guard_not_configured")]
    GuardNotConfigured,
    /// An identity login was requested but no identity instrument is configured.
    #[error("identity_not_configured")]
    IdentityNotConfigured,
    /// A passkey login was requested but no passkey authenticator is configured.
    #[error("passkeys_not_configured")]
    PasskeysNotConfigured,
    /// The interactive prompt required by the operation has not been registered.
    #[error("ui_not_registered: {0}")]
    UiNotRegistered(&'static str),

    /// The mnemonic does not derive the expected signer.
    #[error("wrong_mnemonic")]
    WrongMnemonic,
    /// The answer to the identity challenge is incorrect. The challenge stays open.
    #[error("answer_incorrect")]
    AnswerIncorrect,
    /// The identity challenge expired and must be restarted.
    #[error("challenge_expired")]
    ChallengeExpired,
    /// Too many wrong answers; the identity challenge must be restarted.
    #[error("too_many_attempts")]
    TooManyAttempts,
    /// The user declined or abandoned the interaction.
    #[error("user_cancelled")]
    UserCancelled,
    /// The OAuth redirect came back with an unexpected state parameter.
    #[error("invalid_oauth_state")]
    InvalidOAuthState,

    /// Network connection error with details
    #[error("network_error at {url}: {error}")]
    NetworkError {
        /// The URL that failed
        url: String,
        /// The HTTP status code of the response, if any
        status: Option<u16>,
        /// The error message
        error: String,
    },
    /// HTTP request failure
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// The relayer rejected or failed the request.
    #[error("relayer_error: {0}")]
    Relayer(String),
    /// The identity service failed.
    #[error("identity_error: {0}")]
    Identity(String),
    /// The state provider failed.
    #[error("state_provider_error: {0}")]
    StateProvider(String),
    /// A record store failed.
    #[error("storage_error: {0}")]
    Storage(String),
    /// A signer failed to produce a signature.
    #[error("signer_error: {0}")]
    Signer(String),
    /// Unexpected error serializing information
    #[error("serialization_error: {0}")]
    Serialization(String),
}

impl SignerKitError {
    /// Returns the category of the error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownConfigFormat(_)
            | Self::ImpossibleState(_)
            | Self::MismatchedCallOverrides { .. }
            | Self::CheckpointOverflow(_) => ErrorCategory::Invariant,
            Self::InvalidInput { .. }
            | Self::SignatureRequestNotFound(_)
            | Self::SignatureRequestNotPending(_)
            | Self::InvalidAction { .. }
            | Self::TransactionNotFound(_)
            | Self::InvalidTransactionStatus { .. }
            | Self::MessageNotFound(_)
            | Self::InsufficientWeight { .. }
            | Self::WalletNotFound(_)
            | Self::WalletAlreadyLoggedIn(_)
            | Self::RelayerNotFound(_)
            | Self::RelayerOptionNotFound(_)
            | Self::GuardNotConfigured
            | Self::IdentityNotConfigured
            | Self::PasskeysNotConfigured
            | Self::UiNotRegistered(_) => ErrorCategory::Precondition,
            Self::WrongMnemonic
            | Self::AnswerIncorrect
            | Self::ChallengeExpired
            | Self::TooManyAttempts
            | Self::UserCancelled
            | Self::InvalidOAuthState => ErrorCategory::Interaction,
            Self::NetworkError { .. }
            | Self::Reqwest(_)
            | Self::Relayer(_)
            | Self::Identity(_)
            | Self::StateProvider(_)
            | Self::Storage(_)
            | Self::Signer(_)
            | Self::Serialization(_) => ErrorCategory::External,
        }
    }

    /// Whether the same operation may succeed when attempted again.
    ///
    /// Invariant violations are never retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self.category(), ErrorCategory::Invariant)
    }

    pub(crate) fn serialization(error: impl std::fmt::Display) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<serde_json::Error> for SignerKitError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error)
    }
}

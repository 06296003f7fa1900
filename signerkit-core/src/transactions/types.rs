use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use super::relayer::{FeeOption, OperationStatus};
use crate::envelope::{Call, Envelope, Payload};
use crate::primitives::{Address, U256};

/// How a transaction pays its relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayerOptionKind {
    /// A quoted fee, paid by a call prepended to the transaction.
    Fee {
        /// The quote.
        option: FeeOption,
        /// Opaque relayer quote.
        quote: Option<String>,
    },
    /// The relayer quoted nothing; no fee call is added.
    Manual,
}

/// A relayer and the way it gets paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerOption {
    /// Unique id of the option.
    pub id: String,
    /// Relayer the option belongs to.
    pub relayer_id: String,
    /// Payment.
    pub kind: RelayerOptionKind,
}

/// Lifecycle of a transaction: `requested → defined → formed → relayed`.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum TransactionStatus {
    /// Calls prepared, waiting for fee quotes.
    Requested,
    /// Quotes collected.
    Defined {
        /// Available relayer options.
        #[serde(rename = "relayerOptions")]
        relayer_options: Vec<RelayerOption>,
    },
    /// A relayer option was chosen and a signature requested.
    Formed {
        /// Chosen option.
        #[serde(rename = "relayerOption")]
        relayer_option: RelayerOption,
        /// Companion signature request.
        #[serde(rename = "signatureId")]
        signature_id: String,
    },
    /// Submitted to the relayer.
    Relayed {
        /// Chosen option.
        #[serde(rename = "relayerOption")]
        relayer_option: RelayerOption,
        /// Companion signature request.
        #[serde(rename = "signatureId")]
        signature_id: String,
        /// Operation hash returned by the relayer.
        #[serde(rename = "opHash")]
        op_hash: String,
        /// Last known progress.
        #[serde(rename = "opStatus")]
        op_status: Option<OperationStatus>,
    },
}

impl TransactionStatus {
    /// Name of the state.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Companion signature request, once formed.
    #[must_use]
    pub fn signature_id(&self) -> Option<&str> {
        match self {
            Self::Formed { signature_id, .. } | Self::Relayed { signature_id, .. } => {
                Some(signature_id)
            }
            Self::Requested | Self::Defined { .. } => None,
        }
    }
}

/// A wallet transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Time-ordered unique id.
    pub id: String,
    /// Wallet executing the calls.
    pub wallet: Address,
    /// Target chain.
    pub chain_id: u64,
    /// Who requested the transaction.
    pub source: String,
    /// Creation time, in milliseconds.
    pub created_at: u64,
    /// Calls payload with the configuration it is signed against.
    pub envelope: Envelope,
    /// Lifecycle state.
    #[serde(flatten)]
    pub status: TransactionStatus,
}

impl Transaction {
    /// Calls of the transaction.
    #[must_use]
    pub fn calls(&self) -> &[Call] {
        match &self.envelope.payload {
            Payload::Calls { calls, .. } => calls,
            _ => &[],
        }
    }
}

/// Options of [`super::Transactions::request`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Nonce space; zero when absent.
    pub space: Option<U256>,
    /// Sign against the on-chain configuration instead of the latest one.
    pub no_config_update: bool,
    /// Who requests the transaction.
    pub source: Option<String>,
}

/// Overrides accepted by [`super::Transactions::define`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefineChanges {
    /// Replacement nonce.
    pub nonce: Option<U256>,
    /// Replacement nonce space.
    pub space: Option<U256>,
    /// Per-call gas limits; must have one entry per call.
    pub gas_limits: Option<Vec<U256>>,
}

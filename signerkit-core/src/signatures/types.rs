use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::envelope::Envelope;
use crate::handlers::SignerStatus;
use crate::kinds::SignerKind;
use crate::primitives::{Address, ImageHash, Weight};

/// What a signature request authorizes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Remove this device from the wallet.
    Logout,
    /// Remove another device from the wallet.
    RemoteLogout,
    /// Add this device to the wallet.
    Login,
    /// Execute calls.
    SendTransaction,
    /// Sign an arbitrary message.
    SignMessage,
    /// Update the session manager tree.
    SessionUpdate,
    /// Queue a recovery payload.
    Recovery,
    /// Add a recovery signer.
    AddRecoverySigner,
    /// Remove a recovery signer.
    RemoveRecoverySigner,
    /// Authorize an implicit session.
    SessionImplicitAuthorize,
}

/// Lifecycle of a signature request.
///
/// Terminal states carry the time (ms) after which the record is pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RequestStatus {
    /// Collecting signatures.
    Pending,
    /// Abandoned.
    Cancelled {
        /// Pruning time, in milliseconds.
        #[serde(rename = "scheduledPruning")]
        scheduled_pruning: u64,
    },
    /// Signed and applied.
    Completed {
        /// Pruning time, in milliseconds.
        #[serde(rename = "scheduledPruning")]
        scheduled_pruning: u64,
    },
}

impl RequestStatus {
    /// Whether the request still accepts signatures.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Pruning time of a terminal request.
    #[must_use]
    pub const fn scheduled_pruning(&self) -> Option<u64> {
        match self {
            Self::Pending => None,
            Self::Cancelled { scheduled_pruning } | Self::Completed { scheduled_pruning } => {
                Some(*scheduled_pruning)
            }
        }
    }

    /// Whether a terminal request is due for pruning at `now` (ms).
    #[must_use]
    pub fn is_overdue(&self, now: u64) -> bool {
        self.scheduled_pruning().is_some_and(|at| at <= now)
    }
}

/// The persisted part of a signature request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseSignatureRequest {
    /// Time-ordered unique id.
    pub id: String,
    /// Wallet asked to sign.
    pub wallet: Address,
    /// Who raised the request.
    pub origin: String,
    /// Creation time, in milliseconds.
    pub created_at: u64,
    /// What the request authorizes.
    pub action: Action,
    /// Payload, configuration and collected signatures.
    pub envelope: Envelope,
    /// Lifecycle state.
    #[serde(flatten)]
    pub status: RequestStatus,
}

/// One leaf of the request configuration, with what it can do right now.
#[derive(Debug, Clone)]
pub struct SignerView {
    /// Leaf address.
    pub address: Address,
    /// Leaf image hash, for sapient signers.
    pub image_hash: Option<ImageHash>,
    /// Resolved kind, `None` when the signer never witnessed joining the wallet.
    pub kind: Option<SignerKind>,
    /// Whether the leaf already signed.
    pub signed: bool,
    /// Availability.
    pub status: SignerStatus,
}

/// A signature request hydrated with its progress and per-signer status.
#[derive(Debug, Clone)]
pub struct SignatureRequest {
    /// The persisted record.
    pub base: BaseSignatureRequest,
    /// Weight reached so far.
    pub weight: Weight,
    /// Weight required.
    pub threshold: Weight,
    /// Leaves of the configuration.
    pub signers: Vec<SignerView>,
}

impl SignatureRequest {
    /// Whether enough weight was collected to complete the request.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        self.weight >= self.threshold
    }
}

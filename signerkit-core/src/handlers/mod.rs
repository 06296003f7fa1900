//! Per-kind signer handlers.
//!
//! A [`Handler`] reports whether a signer of its kind can contribute to a request right now and
//! hands out a [`SignerHandle`] that performs the signing. Handlers never write requests
//! directly; every signature goes through [`SignatureRequests::add_signature`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tokio::sync::broadcast;

use crate::envelope::SignerSignature;
use crate::error::SignerKitResult;
use crate::kinds::SignerKind;
use crate::primitives::{Address, ImageHash, B256};
use crate::signatures::{BaseSignatureRequest, SignatureRequests};
use crate::signer::Signer;

mod devices;
mod guard;
pub mod identity;
mod mnemonic;
mod oauth;
mod otp;
mod passkey;
mod recovery;

pub use devices::DevicesHandler;
pub use guard::{GuardHandler, GuardService};
pub use mnemonic::{MnemonicHandler, MnemonicPrompt, MnemonicUi};
pub use oauth::{OAuthHandler, OAuthRedirect, OAuthRedirectUi};
pub use otp::{OtpHandler, OtpResponder, OtpUi};
pub use passkey::{PasskeyAuthenticator, PasskeyCredential, PasskeyHandler};
pub use recovery::RecoveryHandler;

const UPDATE_CAPACITY: usize = 16;

/// Performs the signing of one signer for one request.
///
/// Resolves to `false` when the user declined.
#[derive(Clone)]
pub struct SignerHandle(Arc<dyn Fn() -> BoxFuture<'static, SignerKitResult<bool>> + Send + Sync>);

impl SignerHandle {
    /// Wraps an async closure.
    pub fn new<F, Fut>(handle: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SignerKitResult<bool>> + Send + 'static,
    {
        Self(Arc::new(move || handle().boxed()))
    }

    /// Runs the signing.
    ///
    /// # Errors
    ///
    /// Propagates the failure of the underlying signer or interaction.
    pub async fn handle(&self) -> SignerKitResult<bool> {
        (self.0)().await
    }
}

impl fmt::Debug for SignerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignerHandle")
    }
}

/// Why a signer cannot contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum UnavailableReason {
    /// The signer never witnessed joining the wallet.
    UnknownSignerKind,
    /// No handler is registered for the kind.
    NoHandler,
    /// The device key lives on another device.
    NotLocalKey,
    /// The prompt the signer needs has not been registered.
    UiNotRegistered,
    /// The wallet record has no login email.
    MissingLoginEmail,
    /// No passkey credential matches the leaf.
    CredentialNotFound,
    /// Nothing was queued on the recovery module for this payload.
    NoRecoveryPayloadQueued,
    /// A payload is queued but its timelock has not elapsed.
    TimelockNotMet,
    /// The leaf is not the configured guard.
    NotGuard,
}

/// The interaction an actionable signer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ActionMessage {
    /// Type the recovery mnemonic.
    EnterMnemonic,
    /// Type the one-time password sent by email.
    EnterOtp,
    /// Touch the passkey.
    RequestInteractionWithPasskey,
    /// Complete the OAuth redirect.
    CompleteOauthRedirect,
}

/// Whether and how a signer can contribute to a request.
#[derive(Debug, Clone)]
pub enum SignerStatus {
    /// The signer cannot contribute.
    Unavailable {
        /// Why.
        reason: UnavailableReason,
    },
    /// The signer can sign without user interaction.
    Ready {
        /// Performs the signing.
        handle: SignerHandle,
    },
    /// The signer can sign once the user does something.
    Actionable {
        /// What the user has to do.
        message: ActionMessage,
        /// Starts the interaction and signs.
        handle: SignerHandle,
    },
}

impl SignerStatus {
    pub(crate) const fn unavailable(reason: UnavailableReason) -> Self {
        Self::Unavailable { reason }
    }

    /// The signing handle of a ready or actionable signer.
    #[must_use]
    pub const fn handle(&self) -> Option<&SignerHandle> {
        match self {
            Self::Unavailable { .. } => None,
            Self::Ready { handle } | Self::Actionable { handle, .. } => Some(handle),
        }
    }

    /// Whether the signer can sign without interaction.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Signer strategy for one [`SignerKind`].
#[async_trait]
pub trait Handler: Send + Sync + fmt::Debug {
    /// Kind handled.
    fn kind(&self) -> SignerKind;

    /// Status of the leaf `(address, image_hash)` for `request`.
    ///
    /// # Errors
    ///
    /// Returns an error if a collaborator needed to decide the status fails.
    async fn status(
        &self,
        address: Address,
        image_hash: Option<ImageHash>,
        request: &BaseSignatureRequest,
    ) -> SignerKitResult<SignerStatus>;

    /// Fires when statuses reported by this handler may have changed.
    fn updates(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}

/// Handlers keyed by the kind they drive.
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<SignerKind, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for its kind, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Handler of `kind`.
    #[must_use]
    pub fn get(&self, kind: SignerKind) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(&kind)
    }

    /// Update channels of every handler that has one.
    #[must_use]
    pub fn updates(&self) -> Vec<broadcast::Receiver<()>> {
        self.handlers.values().filter_map(|h| h.updates()).collect()
    }
}

/// Broadcasts handler status changes to subscriptions.
#[derive(Debug, Clone)]
pub(crate) struct UpdateNotifier(broadcast::Sender<()>);

impl UpdateNotifier {
    pub(crate) fn new() -> Self {
        Self(broadcast::channel(UPDATE_CAPACITY).0)
    }

    pub(crate) fn notify(&self) {
        let _ = self.0.send(());
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<()> {
        self.0.subscribe()
    }
}

/// A handle signing `digest` with `signer` and adding the ECDSA signature to request `id`.
pub(crate) fn ecdsa_handle(
    requests: Arc<SignatureRequests>,
    id: String,
    digest: B256,
    signer: Arc<dyn Signer>,
) -> SignerHandle {
    SignerHandle::new(move || {
        let requests = requests.clone();
        let id = id.clone();
        let signer = signer.clone();
        async move {
            let signature = signer.sign_digest(digest).await?;
            requests
                .add_signature(
                    &id,
                    SignerSignature::Ecdsa {
                        address: signer.address(),
                        signature,
                    },
                )
                .await?;
            Ok(true)
        }
    })
}

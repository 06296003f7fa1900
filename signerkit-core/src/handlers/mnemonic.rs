use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    ecdsa_handle, ActionMessage, Handler, SignerHandle, SignerStatus, UnavailableReason,
    UpdateNotifier,
};
use crate::envelope::SignerSignature;
use crate::error::{SignerKitError, SignerKitResult};
use crate::kinds::SignerKind;
use crate::primitives::{Address, ImageHash};
use crate::signatures::{Action, BaseSignatureRequest, SignatureRequests};
use crate::signer::{Signer, SignerFactory};

/// What the mnemonic prompt is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MnemonicPrompt {
    /// Wallet the request belongs to.
    pub wallet: Address,
    /// Signer the mnemonic must derive.
    pub signer: Address,
    /// Action being authorized.
    pub action: Action,
}

/// Host prompt asking the user for a mnemonic.
#[async_trait]
pub trait MnemonicUi: Send + Sync + std::fmt::Debug {
    /// Asks for the mnemonic. `None` means the user declined.
    async fn prompt(&self, prompt: MnemonicPrompt) -> SignerKitResult<Option<SecretString>>;
}

/// Signs with mnemonic-derived login keys.
#[derive(Debug)]
pub struct MnemonicHandler {
    factory: Arc<dyn SignerFactory>,
    requests: Arc<SignatureRequests>,
    ready: RwLock<HashMap<Address, Arc<dyn Signer>>>,
    ui: RwLock<Option<Arc<dyn MnemonicUi>>>,
    updates: UpdateNotifier,
}

impl MnemonicHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(factory: Arc<dyn SignerFactory>, requests: Arc<SignatureRequests>) -> Self {
        Self {
            factory,
            requests,
            ready: RwLock::new(HashMap::new()),
            ui: RwLock::new(None),
            updates: UpdateNotifier::new(),
        }
    }

    /// Keeps `signer` available without prompting, for the rest of the session.
    pub fn add_ready_signer(&self, signer: Arc<dyn Signer>) {
        if let Ok(mut ready) = self.ready.write() {
            ready.insert(signer.address(), signer);
        }
        self.updates.notify();
    }

    /// Registers the prompt used for signers that are not ready.
    pub fn register_ui(&self, ui: Arc<dyn MnemonicUi>) {
        if let Ok(mut slot) = self.ui.write() {
            *slot = Some(ui);
        }
        self.updates.notify();
    }

    /// Derives the signer of `mnemonic`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::InvalidInput`] for an invalid phrase.
    pub fn signer_from_mnemonic(&self, mnemonic: &SecretString) -> SignerKitResult<Arc<dyn Signer>> {
        self.factory.from_mnemonic(mnemonic)
    }

    fn ready_signer(&self, address: Address) -> Option<Arc<dyn Signer>> {
        self.ready.read().ok()?.get(&address).cloned()
    }

    fn ui(&self) -> Option<Arc<dyn MnemonicUi>> {
        self.ui.read().ok()?.clone()
    }
}

#[async_trait]
impl Handler for MnemonicHandler {
    fn kind(&self) -> SignerKind {
        SignerKind::LoginMnemonic
    }

    async fn status(
        &self,
        address: Address,
        _image_hash: Option<ImageHash>,
        request: &BaseSignatureRequest,
    ) -> SignerKitResult<SignerStatus> {
        let digest = request.envelope.digest();
        if let Some(signer) = self.ready_signer(address) {
            return Ok(SignerStatus::Ready {
                handle: ecdsa_handle(self.requests.clone(), request.id.clone(), digest, signer),
            });
        }
        let Some(ui) = self.ui() else {
            return Ok(SignerStatus::unavailable(UnavailableReason::UiNotRegistered));
        };

        let factory = self.factory.clone();
        let requests = self.requests.clone();
        let id = request.id.clone();
        let prompt = MnemonicPrompt {
            wallet: request.wallet,
            signer: address,
            action: request.action,
        };
        Ok(SignerStatus::Actionable {
            message: ActionMessage::EnterMnemonic,
            handle: SignerHandle::new(move || {
                let (ui, factory, requests, id, prompt) = (
                    ui.clone(),
                    factory.clone(),
                    requests.clone(),
                    id.clone(),
                    prompt.clone(),
                );
                async move {
                    let Some(mnemonic) = ui.prompt(prompt).await? else {
                        debug!(%id, "mnemonic prompt declined");
                        return Ok(false);
                    };
                    let signer = factory.from_mnemonic(&mnemonic)?;
                    if signer.address() != address {
                        return Err(SignerKitError::WrongMnemonic);
                    }
                    let signature = signer.sign_digest(digest).await?;
                    requests
                        .add_signature(&id, SignerSignature::Ecdsa { address, signature })
                        .await?;
                    Ok(true)
                }
            }),
        })
    }

    fn updates(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.updates.subscribe())
    }
}

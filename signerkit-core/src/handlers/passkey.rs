use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::{ActionMessage, Handler, SignerHandle, SignerStatus, UnavailableReason, UpdateNotifier};
use crate::envelope::SignerSignature;
use crate::error::SignerKitResult;
use crate::kinds::SignerKind;
use crate::primitives::{Address, Bytes, ImageHash, B256};
use crate::signatures::{BaseSignatureRequest, SignatureRequests};

/// A WebAuthn credential registered as a sapient signer of the passkeys module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyCredential {
    /// WebAuthn credential id.
    pub credential_id: String,
    /// Uncompressed P-256 public key.
    pub public_key: Bytes,
    /// Image hash of the credential leaf on the passkeys module.
    pub image_hash: ImageHash,
}

/// Host WebAuthn access.
#[async_trait]
pub trait PasskeyAuthenticator: Send + Sync + std::fmt::Debug {
    /// Registers a new credential.
    async fn create(&self, name: &str) -> SignerKitResult<PasskeyCredential>;

    /// Looks up a known credential by its leaf image hash.
    async fn find(&self, image_hash: ImageHash) -> SignerKitResult<Option<PasskeyCredential>>;

    /// Asserts `digest` with the credential. `None` means the user dismissed the prompt.
    async fn sign(
        &self,
        credential: &PasskeyCredential,
        digest: B256,
    ) -> SignerKitResult<Option<Bytes>>;
}

type ReadyCredentials = Arc<RwLock<HashMap<String, PasskeyCredential>>>;

/// Signs with passkeys.
#[derive(Debug)]
pub struct PasskeyHandler {
    authenticator: Arc<dyn PasskeyAuthenticator>,
    module: Address,
    requests: Arc<SignatureRequests>,
    ready: ReadyCredentials,
    updates: UpdateNotifier,
}

impl PasskeyHandler {
    /// Creates the handler for credentials of the passkeys `module`.
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn PasskeyAuthenticator>,
        module: Address,
        requests: Arc<SignatureRequests>,
    ) -> Self {
        Self {
            authenticator,
            module,
            requests,
            ready: Arc::new(RwLock::new(HashMap::new())),
            updates: UpdateNotifier::new(),
        }
    }

    /// Passkeys module address.
    #[must_use]
    pub const fn module(&self) -> Address {
        self.module
    }

    /// Registers a new credential, which is ready for the rest of the session.
    ///
    /// # Errors
    ///
    /// Propagates the authenticator failure.
    pub async fn create_credential(&self, name: &str) -> SignerKitResult<PasskeyCredential> {
        let credential = self.authenticator.create(name).await?;
        mark_ready(&self.ready, &credential);
        self.updates.notify();
        Ok(credential)
    }

    /// Signs `digest` with `credential` as a sapient signature of the module.
    ///
    /// # Errors
    ///
    /// Propagates the authenticator failure.
    pub async fn sign(
        &self,
        credential: &PasskeyCredential,
        digest: B256,
    ) -> SignerKitResult<Option<SignerSignature>> {
        Ok(self
            .authenticator
            .sign(credential, digest)
            .await?
            .map(|signature| SignerSignature::Sapient {
                address: self.module,
                image_hash: credential.image_hash,
                signature,
            }))
    }

    fn ready_credential(&self, image_hash: ImageHash) -> Option<PasskeyCredential> {
        self.ready
            .read()
            .ok()?
            .values()
            .find(|credential| credential.image_hash == image_hash)
            .cloned()
    }

    fn handle(&self, request: &BaseSignatureRequest, credential: PasskeyCredential) -> SignerHandle {
        let authenticator = self.authenticator.clone();
        let requests = self.requests.clone();
        let ready = self.ready.clone();
        let updates = self.updates.clone();
        let module = self.module;
        let id = request.id.clone();
        let digest = request.envelope.digest();
        SignerHandle::new(move || {
            let (authenticator, requests, ready, updates, id, credential) = (
                authenticator.clone(),
                requests.clone(),
                ready.clone(),
                updates.clone(),
                id.clone(),
                credential.clone(),
            );
            async move {
                let Some(signature) = authenticator.sign(&credential, digest).await? else {
                    debug!(%id, "passkey prompt dismissed");
                    return Ok(false);
                };
                requests
                    .add_signature(
                        &id,
                        SignerSignature::Sapient {
                            address: module,
                            image_hash: credential.image_hash,
                            signature,
                        },
                    )
                    .await?;
                if mark_ready(&ready, &credential) {
                    updates.notify();
                }
                Ok(true)
            }
        })
    }
}

/// Caches a credential. Returns whether it was new.
fn mark_ready(ready: &ReadyCredentials, credential: &PasskeyCredential) -> bool {
    ready.write().is_ok_and(|mut ready| {
        ready
            .insert(credential.credential_id.clone(), credential.clone())
            .is_none()
    })
}

#[async_trait]
impl Handler for PasskeyHandler {
    fn kind(&self) -> SignerKind {
        SignerKind::LoginPasskey
    }

    async fn status(
        &self,
        address: Address,
        image_hash: Option<ImageHash>,
        request: &BaseSignatureRequest,
    ) -> SignerKitResult<SignerStatus> {
        let Some(image_hash) = image_hash.filter(|_| address == self.module) else {
            return Ok(SignerStatus::unavailable(UnavailableReason::CredentialNotFound));
        };
        if let Some(credential) = self.ready_credential(image_hash) {
            return Ok(SignerStatus::Ready {
                handle: self.handle(request, credential),
            });
        }
        match self.authenticator.find(image_hash).await? {
            Some(credential) => Ok(SignerStatus::Actionable {
                message: ActionMessage::RequestInteractionWithPasskey,
                handle: self.handle(request, credential),
            }),
            None => Ok(SignerStatus::unavailable(UnavailableReason::CredentialNotFound)),
        }
    }

    fn updates(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.updates.subscribe())
    }
}

use std::sync::Arc;

use async_trait::async_trait;

use super::{Handler, SignerHandle, SignerStatus, UnavailableReason};
use crate::envelope::{Envelope, SignerSignature};
use crate::error::SignerKitResult;
use crate::kinds::SignerKind;
use crate::primitives::{Address, Bytes, ImageHash};
use crate::signatures::{BaseSignatureRequest, SignatureRequests};

/// The remote guard co-signer.
#[async_trait]
pub trait GuardService: Send + Sync + std::fmt::Debug {
    /// Address the guard signs with.
    fn address(&self) -> Address;

    /// Asks the guard to co-sign `envelope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the guard refuses or cannot be reached.
    async fn sign(&self, envelope: &Envelope) -> SignerKitResult<Bytes>;
}

/// Co-signs with the configured guard.
#[derive(Debug)]
pub struct GuardHandler {
    guard: Arc<dyn GuardService>,
    requests: Arc<SignatureRequests>,
}

impl GuardHandler {
    /// Creates the handler for `guard`.
    #[must_use]
    pub fn new(guard: Arc<dyn GuardService>, requests: Arc<SignatureRequests>) -> Self {
        Self { guard, requests }
    }
}

#[async_trait]
impl Handler for GuardHandler {
    fn kind(&self) -> SignerKind {
        SignerKind::Guard
    }

    async fn status(
        &self,
        address: Address,
        _image_hash: Option<ImageHash>,
        request: &BaseSignatureRequest,
    ) -> SignerKitResult<SignerStatus> {
        if address != self.guard.address() {
            return Ok(SignerStatus::unavailable(UnavailableReason::NotGuard));
        }
        let guard = self.guard.clone();
        let requests = self.requests.clone();
        let id = request.id.clone();
        Ok(SignerStatus::Ready {
            handle: SignerHandle::new(move || {
                let guard = guard.clone();
                let requests = requests.clone();
                let id = id.clone();
                async move {
                    let envelope = requests.get_base(&id).await?.envelope;
                    let signature = guard.sign(&envelope).await?;
                    requests
                        .add_signature(
                            &id,
                            SignerSignature::Ecdsa {
                                address: guard.address(),
                                signature,
                            },
                        )
                        .await?;
                    Ok(true)
                }
            }),
        })
    }
}

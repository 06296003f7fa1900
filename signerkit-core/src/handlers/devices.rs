use std::sync::Arc;

use async_trait::async_trait;

use super::{ecdsa_handle, Handler, SignerStatus, UnavailableReason};
use crate::error::SignerKitResult;
use crate::kinds::SignerKind;
use crate::primitives::{Address, ImageHash};
use crate::signatures::{BaseSignatureRequest, SignatureRequests};
use crate::signer::DeviceKeyStore;

/// Signs with device keys held by this device.
#[derive(Debug)]
pub struct DevicesHandler {
    keys: Arc<dyn DeviceKeyStore>,
    requests: Arc<SignatureRequests>,
}

impl DevicesHandler {
    /// Creates the handler over the local key store.
    #[must_use]
    pub fn new(keys: Arc<dyn DeviceKeyStore>, requests: Arc<SignatureRequests>) -> Self {
        Self { keys, requests }
    }
}

#[async_trait]
impl Handler for DevicesHandler {
    fn kind(&self) -> SignerKind {
        SignerKind::LocalDevice
    }

    async fn status(
        &self,
        address: Address,
        _image_hash: Option<ImageHash>,
        request: &BaseSignatureRequest,
    ) -> SignerKitResult<SignerStatus> {
        let Some(signer) = self.keys.get(address).await? else {
            return Ok(SignerStatus::unavailable(UnavailableReason::NotLocalKey));
        };
        Ok(SignerStatus::Ready {
            handle: ecdsa_handle(
                self.requests.clone(),
                request.id.clone(),
                request.envelope.digest(),
                signer,
            ),
        })
    }
}

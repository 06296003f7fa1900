use std::sync::Arc;

use alloy_core::sol_types::SolValue;
use async_trait::async_trait;

use super::{Handler, SignerHandle, SignerStatus, UnavailableReason};
use crate::envelope::SignerSignature;
use crate::error::SignerKitResult;
use crate::kinds::SignerKind;
use crate::primitives::{Address, Bytes, Clock, ImageHash};
use crate::recovery::QueuedRecoveryPayload;
use crate::signatures::{BaseSignatureRequest, SignatureRequests};
use crate::state::{StateProvider, StoredTree};
use crate::store::RecordStore;

/// Signs with the recovery module once a queued payload's timelock has elapsed.
#[derive(Debug)]
pub struct RecoveryHandler {
    queue: Arc<dyn RecordStore<String, QueuedRecoveryPayload>>,
    state: Arc<dyn StateProvider>,
    module: Address,
    requests: Arc<SignatureRequests>,
    clock: Arc<dyn Clock>,
}

impl RecoveryHandler {
    /// Creates the handler for the recovery `module`.
    #[must_use]
    pub fn new(
        queue: Arc<dyn RecordStore<String, QueuedRecoveryPayload>>,
        state: Arc<dyn StateProvider>,
        module: Address,
        requests: Arc<SignatureRequests>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            state,
            module,
            requests,
            clock,
        }
    }
}

#[async_trait]
impl Handler for RecoveryHandler {
    fn kind(&self) -> SignerKind {
        SignerKind::Recovery
    }

    async fn status(
        &self,
        address: Address,
        image_hash: Option<ImageHash>,
        request: &BaseSignatureRequest,
    ) -> SignerKitResult<SignerStatus> {
        let no_payload = || Ok(SignerStatus::unavailable(UnavailableReason::NoRecoveryPayloadQueued));
        let Some(image_hash) = image_hash.filter(|_| address == self.module) else {
            return no_payload();
        };
        let Some(StoredTree::Recovery { leaves }) = self.state.get_tree(image_hash).await? else {
            return no_payload();
        };

        let digest = request.envelope.digest();
        let queued: Vec<_> = self
            .queue
            .list()
            .await?
            .into_iter()
            .filter(|payload| {
                payload.wallet == request.wallet
                    && payload.chain_id == request.envelope.chain_id
                    && payload.payload_hash == digest
                    && leaves.iter().any(|leaf| leaf.signer == payload.signer)
            })
            .collect();
        if queued.is_empty() {
            return no_payload();
        }

        let now = self.clock.now_secs();
        let Some(ready) = queued.into_iter().find(|payload| payload.end_timestamp <= now) else {
            return Ok(SignerStatus::unavailable(UnavailableReason::TimelockNotMet));
        };

        let requests = self.requests.clone();
        let id = request.id.clone();
        let module = self.module;
        Ok(SignerStatus::Ready {
            handle: SignerHandle::new(move || {
                let requests = requests.clone();
                let id = id.clone();
                let signature = Bytes::from((ready.signer,).abi_encode_params());
                async move {
                    requests
                        .add_signature(
                            &id,
                            SignerSignature::Sapient {
                                address: module,
                                image_hash,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::ManualClock;
    use crate::state::MemoryStateProvider;
    use crate::store::MemoryStore;
    use crate::test_support::{digest_request, signature_requests};
    use crate::topology::recovery::RecoveryLeaf;
    use crate::topology::Topology;

    const MODULE: Address = Address::repeat_byte(0x5e);
    const WALLET: Address = Address::repeat_byte(0x11);
    const RECOVERY_SIGNER: Address = Address::repeat_byte(0x5f);

    #[tokio::test]
    async fn test_module_signs_once_timelock_elapses() {
        let state = Arc::new(MemoryStateProvider::new());
        let tree = StoredTree::Recovery {
            leaves: vec![RecoveryLeaf {
                signer: RECOVERY_SIGNER,
                required_delta_time: 3_600,
                min_timestamp: 0,
            }],
        };
        let image_hash = tree.image_hash().unwrap();
        state.save_tree(tree).await.unwrap();

        let clock = Arc::new(ManualClock::new(1_000_000));
        let requests = signature_requests(clock.clone());
        let queue: Arc<MemoryStore<String, QueuedRecoveryPayload>> =
            Arc::new(MemoryStore::new());
        let handler = RecoveryHandler::new(
            queue.clone(),
            state,
            MODULE,
            requests.clone(),
            clock.clone(),
        );
        let request =
            digest_request(&requests, WALLET, Topology::sapient(MODULE, image_hash, 1)).await;

        assert!(matches!(
            handler.status(MODULE, Some(image_hash), &request).await.unwrap(),
            SignerStatus::Unavailable {
                reason: UnavailableReason::NoRecoveryPayloadQueued
            }
        ));

        queue
            .set(
                "queued".to_string(),
                QueuedRecoveryPayload {
                    id: "queued".to_string(),
                    wallet: WALLET,
                    chain_id: request.envelope.chain_id,
                    signer: RECOVERY_SIGNER,
                    index: 0,
                    payload_hash: request.envelope.digest(),
                    start_timestamp: 1_000,
                    end_timestamp: 4_600,
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            handler.status(MODULE, Some(image_hash), &request).await.unwrap(),
            SignerStatus::Unavailable {
                reason: UnavailableReason::TimelockNotMet
            }
        ));

        clock.advance(3_600 * 1_000);
        let status = handler.status(MODULE, Some(image_hash), &request).await.unwrap();
        assert!(status.is_ready());
        assert!(status.handle().unwrap().handle().await.unwrap());
        assert!(requests
            .get_base(&request.id)
            .await
            .unwrap()
            .envelope
            .has_signature(MODULE, Some(image_hash)));
    }
}

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::types::{Action, BaseSignatureRequest, RequestStatus};
use crate::envelope::{Envelope, SignerSignature};
use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::{new_id, Clock};
use crate::store::{RecordStore, StoreEvent};

/// Persisted signature requests and every write made to them.
///
/// Handlers and lifecycles only change requests through this type.
#[derive(Clone)]
pub struct SignatureRequests {
    store: Arc<dyn RecordStore<String, BaseSignatureRequest>>,
    clock: Arc<dyn Clock>,
    prune_delay_ms: u64,
    default_origin: String,
}

impl std::fmt::Debug for SignatureRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureRequests")
            .field("prune_delay_ms", &self.prune_delay_ms)
            .finish_non_exhaustive()
    }
}

impl SignatureRequests {
    /// Creates the request set over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore<String, BaseSignatureRequest>>,
        clock: Arc<dyn Clock>,
        prune_delay_ms: u64,
        default_origin: String,
    ) -> Self {
        Self {
            store,
            clock,
            prune_delay_ms,
            default_origin,
        }
    }

    /// Opens a request for `envelope`.
    ///
    /// A configuration update supersedes every other pending configuration update of the same
    /// wallet, which is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn request(
        &self,
        envelope: Envelope,
        action: Action,
        origin: Option<String>,
    ) -> SignerKitResult<String> {
        if envelope.payload.is_config_update() {
            for other in self.list().await? {
                if other.wallet == envelope.wallet
                    && other.status.is_pending()
                    && other.envelope.payload.is_config_update()
                {
                    debug!(id = %other.id, "superseded by a new configuration update");
                    self.set_terminal(other, false).await?;
                }
            }
        }

        let request = BaseSignatureRequest {
            id: new_id(),
            wallet: envelope.wallet,
            origin: origin.unwrap_or_else(|| self.default_origin.clone()),
            created_at: self.clock.now_millis(),
            action,
            envelope,
            status: RequestStatus::Pending,
        };
        let id = request.id.clone();
        info!(%id, %action, wallet = %request.wallet, "signature request created");
        self.store.set(id.clone(), request).await?;
        Ok(id)
    }

    /// Reads a request. Terminal requests past their pruning time are deleted and reported as
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::SignatureRequestNotFound`] if there is no such live request.
    pub async fn get_base(&self, id: &str) -> SignerKitResult<BaseSignatureRequest> {
        let key = id.to_string();
        let request = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| SignerKitError::SignatureRequestNotFound(key.clone()))?;
        if request.status.is_overdue(self.clock.now_millis()) {
            debug!(%id, "pruning overdue signature request on read");
            self.store.del(&key).await?;
            return Err(SignerKitError::SignatureRequestNotFound(key));
        }
        Ok(request)
    }

    /// Reads a pending request and checks it authorizes `action`.
    ///
    /// # Errors
    ///
    /// Fails if the request is missing, not pending, or carries another action.
    pub async fn get_pending(
        &self,
        id: &str,
        action: Action,
    ) -> SignerKitResult<BaseSignatureRequest> {
        let request = self.get_base(id).await?;
        if request.action != action {
            return Err(SignerKitError::InvalidAction {
                id: id.to_string(),
                expected: action,
                found: request.action,
            });
        }
        if !request.status.is_pending() {
            return Err(SignerKitError::SignatureRequestNotPending(id.to_string()));
        }
        Ok(request)
    }

    /// Adds a signature to a pending request. A second signature of the same leaf replaces the
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::SignatureRequestNotPending`] on terminal requests.
    pub async fn add_signature(
        &self,
        id: &str,
        signature: SignerSignature,
    ) -> SignerKitResult<()> {
        let mut request = self.get_base(id).await?;
        if !request.status.is_pending() {
            return Err(SignerKitError::SignatureRequestNotPending(id.to_string()));
        }
        request
            .envelope
            .signatures
            .retain(|existing| !existing.matches(signature.address(), signature.image_hash()));
        debug!(%id, signer = %signature.address(), "signature added");
        request.envelope.signatures.push(signature);
        self.store.set(request.id.clone(), request).await
    }

    /// Marks a request completed.
    ///
    /// Completing a configuration update cancels the other pending configuration updates of
    /// the wallet at the same or an earlier checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::InsufficientWeight`] if the threshold is not reached, and
    /// [`SignerKitError::SignatureRequestNotPending`] on terminal requests.
    pub async fn complete(&self, id: &str) -> SignerKitResult<BaseSignatureRequest> {
        let request = self.get_base(id).await?;
        if !request.status.is_pending() {
            return Err(SignerKitError::SignatureRequestNotPending(id.to_string()));
        }
        let weight = request.envelope.weight();
        let threshold = request.envelope.threshold();
        if weight < threshold {
            return Err(SignerKitError::InsufficientWeight { weight, threshold });
        }

        let completed = self.set_terminal(request, true).await?;
        info!(%id, action = %completed.action, "signature request completed");

        if completed.envelope.payload.is_config_update() {
            let checkpoint = completed.envelope.configuration.checkpoint;
            for other in self.list().await? {
                if other.id != completed.id
                    && other.wallet == completed.wallet
                    && other.status.is_pending()
                    && other.envelope.payload.is_config_update()
                    && other.envelope.configuration.checkpoint <= checkpoint
                {
                    debug!(id = %other.id, "stale configuration update cancelled");
                    self.set_terminal(other, false).await?;
                }
            }
        }
        Ok(completed)
    }

    /// Cancels a request. Cancelling a cancelled request does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::SignatureRequestNotPending`] if the request was completed.
    pub async fn cancel(&self, id: &str) -> SignerKitResult<()> {
        let request = self.get_base(id).await?;
        match request.status {
            RequestStatus::Pending => {
                info!(%id, "signature request cancelled");
                self.set_terminal(request, false).await.map(|_| ())
            }
            RequestStatus::Cancelled { .. } => Ok(()),
            RequestStatus::Completed { .. } => {
                Err(SignerKitError::SignatureRequestNotPending(id.to_string()))
            }
        }
    }

    /// Deletes every terminal request past its pruning time. Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn prune(&self) -> SignerKitResult<usize> {
        let now = self.clock.now_millis();
        let mut pruned = 0;
        for request in self.store.list().await? {
            if request.status.is_overdue(now) {
                self.store.del(&request.id).await?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, "pruned signature requests");
        }
        Ok(pruned)
    }

    /// Lists live requests, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list(&self) -> SignerKitResult<Vec<BaseSignatureRequest>> {
        let now = self.clock.now_millis();
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|request| !request.status.is_overdue(now))
            .collect())
    }

    /// Deletes a request regardless of its state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn delete(&self, id: &str) -> SignerKitResult<()> {
        self.store.del(&id.to_string()).await
    }

    /// Subscribes to request changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent<String>> {
        self.store.subscribe()
    }

    async fn set_terminal(
        &self,
        mut request: BaseSignatureRequest,
        completed: bool,
    ) -> SignerKitResult<BaseSignatureRequest> {
        let scheduled_pruning = self.clock.now_millis().saturating_add(self.prune_delay_ms);
        request.status = if completed {
            RequestStatus::Completed { scheduled_pruning }
        } else {
            RequestStatus::Cancelled { scheduled_pruning }
        };
        self.store.set(request.id.clone(), request.clone()).await?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Payload;
    use crate::primitives::{Address, Bytes, ManualClock, B256};
    use crate::store::MemoryStore;
    use crate::topology::{Configuration, Topology};

    const DELAY: u64 = 1_000;

    fn requests(clock: Arc<ManualClock>) -> SignatureRequests {
        SignatureRequests::new(
            Arc::new(MemoryStore::new()),
            clock,
            DELAY,
            "test".to_string(),
        )
    }

    fn config_update(wallet: Address, checkpoint: u64) -> Envelope {
        Envelope::new(
            wallet,
            0,
            Payload::ConfigUpdate {
                image_hash: B256::repeat_byte(checkpoint as u8),
            },
            Configuration {
                checkpoint,
                threshold: 1,
                topology: Topology::signer(Address::repeat_byte(1), 1),
            },
        )
    }

    fn signature() -> SignerSignature {
        SignerSignature::Ecdsa {
            address: Address::repeat_byte(1),
            signature: Bytes::from_static(&[1; 65]),
        }
    }

    #[tokio::test]
    async fn test_new_config_update_cancels_pending_ones() {
        let requests = requests(Arc::new(ManualClock::new(0)));
        let wallet = Address::repeat_byte(0xaa);
        let first = requests
            .request(config_update(wallet, 1), Action::Login, None)
            .await
            .unwrap();
        let other_wallet = requests
            .request(config_update(Address::repeat_byte(0xbb), 1), Action::Login, None)
            .await
            .unwrap();
        let second = requests
            .request(config_update(wallet, 1), Action::Logout, None)
            .await
            .unwrap();

        assert!(matches!(
            requests.get_base(&first).await.unwrap().status,
            RequestStatus::Cancelled { .. }
        ));
        assert!(requests.get_base(&other_wallet).await.unwrap().status.is_pending());
        assert!(requests.get_base(&second).await.unwrap().status.is_pending());
    }

    #[tokio::test]
    async fn test_complete_requires_weight() {
        let requests = requests(Arc::new(ManualClock::new(0)));
        let id = requests
            .request(config_update(Address::repeat_byte(0xaa), 1), Action::Login, None)
            .await
            .unwrap();

        let err = requests.complete(&id).await.unwrap_err();
        assert!(matches!(
            err,
            SignerKitError::InsufficientWeight {
                weight: 0,
                threshold: 1
            }
        ));

        requests.add_signature(&id, signature()).await.unwrap();
        let completed = requests.complete(&id).await.unwrap();
        assert_eq!(
            completed.status,
            RequestStatus::Completed {
                scheduled_pruning: DELAY
            }
        );
    }

    #[tokio::test]
    async fn test_terminal_requests_reject_signatures() {
        let requests = requests(Arc::new(ManualClock::new(0)));
        let id = requests
            .request(config_update(Address::repeat_byte(0xaa), 1), Action::Login, None)
            .await
            .unwrap();
        requests.cancel(&id).await.unwrap();
        requests.cancel(&id).await.unwrap();

        let err = requests.add_signature(&id, signature()).await.unwrap_err();
        assert!(matches!(err, SignerKitError::SignatureRequestNotPending(_)));
        assert!(requests.get_base(&id).await.unwrap().envelope.signatures.is_empty());
    }

    #[tokio::test]
    async fn test_pruning() {
        let clock = Arc::new(ManualClock::new(0));
        let requests = requests(clock.clone());
        let wallet = Address::repeat_byte(0xaa);
        let cancelled = requests
            .request(config_update(wallet, 1), Action::Login, None)
            .await
            .unwrap();
        requests.cancel(&cancelled).await.unwrap();
        let pending = requests
            .request(
                Envelope::new(
                    wallet,
                    1,
                    Payload::Digest {
                        digest: B256::ZERO,
                    },
                    config_update(wallet, 1).configuration,
                ),
                Action::SignMessage,
                None,
            )
            .await
            .unwrap();

        clock.advance(DELAY - 1);
        assert_eq!(requests.list().await.unwrap().len(), 2);

        clock.advance(1);
        assert_eq!(requests.list().await.unwrap().len(), 1);
        assert!(matches!(
            requests.get_base(&cancelled).await,
            Err(SignerKitError::SignatureRequestNotFound(_))
        ));
        assert_eq!(requests.prune().await.unwrap(), 0);
        assert!(requests.get_base(&pending).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_pending_checks_action() {
        let requests = requests(Arc::new(ManualClock::new(0)));
        let id = requests
            .request(config_update(Address::repeat_byte(0xaa), 1), Action::Login, None)
            .await
            .unwrap();
        let err = requests.get_pending(&id, Action::Logout).await.unwrap_err();
        assert!(matches!(
            err,
            SignerKitError::InvalidAction {
                expected: Action::Logout,
                found: Action::Login,
                ..
            }
        ));
    }
}

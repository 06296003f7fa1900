//! The signature request engine.
//!
//! [`SignatureRequests`] owns the persisted request records. [`Signatures`] hydrates them into
//! live [`SignatureRequest`] views by resolving the kind of every configuration leaf and asking
//! the matching handler whether it can sign.

use std::sync::Arc;

use tracing::debug;

use crate::error::SignerKitResult;
use crate::handlers::{HandlerRegistry, SignerStatus, UnavailableReason};
use crate::kinds::SignerResolver;
use crate::primitives::{Address, ImageHash};
use crate::subscription::{watch, Subscription};

mod requests;
mod types;

pub use requests::SignatureRequests;
pub use types::{
    Action, BaseSignatureRequest, RequestStatus, SignatureRequest, SignerView,
};

/// Read side of the engine: hydrated requests and subscriptions.
#[derive(Debug, Clone)]
pub struct Signatures {
    requests: Arc<SignatureRequests>,
    resolver: SignerResolver,
    handlers: Arc<HandlerRegistry>,
}

impl Signatures {
    /// Creates the engine.
    #[must_use]
    pub fn new(
        requests: Arc<SignatureRequests>,
        resolver: SignerResolver,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            requests,
            resolver,
            handlers,
        }
    }

    /// The request records.
    #[must_use]
    pub const fn requests(&self) -> &Arc<SignatureRequests> {
        &self.requests
    }

    /// Reads a request with its weight and the status of every signer.
    ///
    /// # Errors
    ///
    /// [`crate::SignerKitError::SignatureRequestNotFound`] for missing or pruned requests, or a
    /// collaborator failure while resolving signers.
    pub async fn get(&self, id: &str) -> SignerKitResult<SignatureRequest> {
        let base = self.requests.get_base(id).await?;
        let signers = base.envelope.configuration.signers();

        let leaves = signers
            .signers
            .iter()
            .map(|address| (*address, None))
            .chain(
                signers
                    .sapient_signers
                    .iter()
                    .map(|leaf| (leaf.address, Some(leaf.image_hash))),
            );

        let mut views = Vec::with_capacity(signers.signers.len() + signers.sapient_signers.len());
        for (address, image_hash) in leaves {
            views.push(self.signer_view(&base, address, image_hash).await?);
        }

        Ok(SignatureRequest {
            weight: base.envelope.weight(),
            threshold: base.envelope.threshold(),
            signers: views,
            base,
        })
    }

    async fn signer_view(
        &self,
        base: &BaseSignatureRequest,
        address: Address,
        image_hash: Option<ImageHash>,
    ) -> SignerKitResult<SignerView> {
        let kind = self.resolver.kind_of(base.wallet, address, image_hash).await?;
        let status = match kind {
            None => SignerStatus::unavailable(UnavailableReason::UnknownSignerKind),
            Some(kind) => match self.handlers.get(kind) {
                Some(handler) => handler.status(address, image_hash, base).await?,
                None => SignerStatus::unavailable(UnavailableReason::NoHandler),
            },
        };
        Ok(SignerView {
            address,
            image_hash,
            kind,
            signed: base.envelope.has_signature(address, image_hash),
            status,
        })
    }

    /// Lists live request records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list(&self) -> SignerKitResult<Vec<BaseSignatureRequest>> {
        self.requests.list().await
    }

    /// Pushes the hydrated request `id` whenever it or a handler status changes.
    #[must_use]
    pub fn on_signature_request_update(
        &self,
        id: &str,
        trigger: bool,
    ) -> Subscription<SignatureRequest> {
        let engine = self.clone();
        let id = id.to_string();
        let watched = id.clone();
        watch(
            self.requests.subscribe(),
            self.handlers.updates(),
            move |key: &String| *key == watched,
            trigger,
            move || {
                let engine = engine.clone();
                let id = id.clone();
                async move {
                    engine
                        .get(&id)
                        .await
                        .map_err(|err| debug!(%id, "signature request not emitted: {err}"))
                        .ok()
                }
            },
        )
    }

    /// Pushes the list of live requests whenever any of them changes.
    #[must_use]
    pub fn on_signature_requests_update(
        &self,
        trigger: bool,
    ) -> Subscription<Vec<BaseSignatureRequest>> {
        let requests = self.requests.clone();
        watch(
            self.requests.subscribe(),
            Vec::new(),
            |_: &String| true,
            trigger,
            move || {
                let requests = requests.clone();
                async move {
                    requests
                        .list()
                        .await
                        .map_err(|err| debug!("signature request list not emitted: {err}"))
                        .ok()
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::*;
    use crate::config::Extensions;
    use crate::handlers::{Handler, SignerHandle};
    use crate::kinds::SignerKind;
    use crate::primitives::ManualClock;
    use crate::state::MemoryStateProvider;
    use crate::test_support::{digest_request, signature_requests};
    use crate::topology::Topology;

    const GUARD: Address = Address::repeat_byte(0x6a);
    const WALLET: Address = Address::repeat_byte(0x11);

    /// Guard handler that becomes ready when switched on.
    #[derive(Debug)]
    struct SwitchHandler {
        ready: AtomicBool,
        updates: broadcast::Sender<()>,
    }

    impl SwitchHandler {
        fn switch_on(&self) {
            self.ready.store(true, Ordering::SeqCst);
            let _ = self.updates.send(());
        }
    }

    #[async_trait]
    impl Handler for SwitchHandler {
        fn kind(&self) -> SignerKind {
            SignerKind::Guard
        }

        async fn status(
            &self,
            _address: Address,
            _image_hash: Option<ImageHash>,
            _request: &BaseSignatureRequest,
        ) -> SignerKitResult<SignerStatus> {
            if self.ready.load(Ordering::SeqCst) {
                return Ok(SignerStatus::Ready {
                    handle: SignerHandle::new(|| async { Ok(true) }),
                });
            }
            Ok(SignerStatus::unavailable(UnavailableReason::NotGuard))
        }

        fn updates(&self) -> Option<broadcast::Receiver<()>> {
            Some(self.updates.subscribe())
        }
    }

    #[tokio::test]
    async fn test_handler_status_change_is_pushed() {
        let requests = signature_requests(Arc::new(ManualClock::new(0)));
        let handler = Arc::new(SwitchHandler {
            ready: AtomicBool::new(false),
            updates: broadcast::channel(4).0,
        });
        let mut handlers = HandlerRegistry::new();
        handlers.register(handler.clone());
        let signatures = Signatures::new(
            requests.clone(),
            SignerResolver::new(
                Arc::new(MemoryStateProvider::new()),
                Extensions::default(),
                Some(GUARD),
            ),
            Arc::new(handlers),
        );
        let request = digest_request(&requests, WALLET, Topology::signer(GUARD, 1)).await;

        let mut subscription = signatures.on_signature_request_update(&request.id, true);
        let first = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.signers[0].kind, Some(SignerKind::Guard));
        assert!(!first.signers[0].status.is_ready());

        handler.switch_on();
        let second = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert!(second.signers[0].status.is_ready());
        assert_eq!(second.base.envelope, first.base.envelope);
    }
}

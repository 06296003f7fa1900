use std::sync::Arc;

use tracing::info;

use crate::envelope::{Envelope, Payload};
use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::Address;
use crate::signatures::{Action, BaseSignatureRequest, SignatureRequests};
use crate::state::{StateProvider, StoredTree};
use crate::topology::recovery::{normalize_recovery_leaves, RecoveryLeaf};
use crate::topology::{Configuration, WalletTopology};

/// Moves wallets between configurations through signature requests.
///
/// An update is signed by the configuration it replaces and targets the next checkpoint, so
/// competing updates of one wallet can never both apply.
#[derive(Debug, Clone)]
pub struct ConfigurationUpdates {
    state: Arc<dyn StateProvider>,
    requests: Arc<SignatureRequests>,
}

impl ConfigurationUpdates {
    /// Creates the updater.
    #[must_use]
    pub fn new(state: Arc<dyn StateProvider>, requests: Arc<SignatureRequests>) -> Self {
        Self { state, requests }
    }

    pub(crate) const fn requests(&self) -> &Arc<SignatureRequests> {
        &self.requests
    }

    /// Latest configuration of `wallet`, decomposed.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::WalletNotFound`] for unknown wallets and
    /// [`SignerKitError::UnknownConfigFormat`] for configurations of an unknown shape.
    pub async fn latest(&self, wallet: Address) -> SignerKitResult<(Configuration, WalletTopology)> {
        let configuration = self.state.latest_configuration(wallet).await?;
        let parts = WalletTopology::from_config(&configuration)?;
        Ok((configuration, parts))
    }

    /// Opens a request moving `wallet` to `parts` at the next checkpoint. Returns its id.
    ///
    /// # Errors
    ///
    /// Fails if the wallet is unknown, its checkpoint is already `u64::MAX`, or a collaborator
    /// fails.
    pub async fn request(
        &self,
        wallet: Address,
        parts: &WalletTopology,
        action: Action,
        origin: Option<String>,
    ) -> SignerKitResult<String> {
        let current = self.state.latest_configuration(wallet).await?;
        let checkpoint = current
            .checkpoint
            .checked_add(1)
            .ok_or(SignerKitError::CheckpointOverflow(wallet))?;
        let next = parts.to_config(checkpoint);
        let image_hash = next.image_hash();
        self.state.save_configuration(next).await?;

        let envelope = Envelope::new(wallet, 0, Payload::ConfigUpdate { image_hash }, current);
        let id = self.requests.request(envelope, action, origin).await?;
        info!(%id, %wallet, %action, %image_hash, "configuration update requested");
        Ok(id)
    }

    /// Saves the signed update of request `id` and completes the request.
    ///
    /// # Errors
    ///
    /// Fails if the request is not a pending configuration update or lacks weight.
    pub async fn complete(&self, id: &str) -> SignerKitResult<BaseSignatureRequest> {
        let request = self.requests.get_base(id).await?;
        if !request.status.is_pending() {
            return Err(SignerKitError::SignatureRequestNotPending(id.to_string()));
        }
        let Payload::ConfigUpdate { image_hash } = request.envelope.payload else {
            return Err(SignerKitError::InvalidInput {
                attribute: "signature_request".to_string(),
                reason: format!("{id} is not a configuration update"),
            });
        };
        let (weight, threshold) = (request.envelope.weight(), request.envelope.threshold());
        if weight < threshold {
            return Err(SignerKitError::InsufficientWeight { weight, threshold });
        }

        let next = self
            .state
            .get_configuration(image_hash)
            .await?
            .ok_or_else(|| {
                SignerKitError::ImpossibleState(format!("configuration {image_hash} is unknown"))
            })?;
        self.state
            .save_update(request.wallet, next, request.envelope.encode_signature())
            .await?;
        let completed = self.requests.complete(id).await?;
        info!(%id, wallet = %completed.wallet, "configuration update applied");
        Ok(completed)
    }

    /// Applies `edit` to the recovery tree of `parts` and points the module leaf at the result.
    /// Wallets without a recovery module are left untouched.
    pub(crate) async fn edit_recovery(
        &self,
        parts: &mut WalletTopology,
        module: Address,
        edit: impl FnOnce(&mut Vec<RecoveryLeaf>) + Send,
    ) -> SignerKitResult<()> {
        let Some(image_hash) = parts.module_image_hash(module) else {
            return Ok(());
        };
        let Some(StoredTree::Recovery { mut leaves }) = self.state.get_tree(image_hash).await?
        else {
            return Err(SignerKitError::ImpossibleState(format!(
                "recovery tree {image_hash} is unknown"
            )));
        };
        edit(&mut leaves);
        let tree = StoredTree::Recovery {
            leaves: normalize_recovery_leaves(leaves),
        };
        let image_hash = tree.image_hash()?;
        self.state.save_tree(tree).await?;
        parts.upsert_module(module, image_hash);
        Ok(())
    }
}

//! Read access to on-chain wallet state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::{Address, Bytes, ImageHash, B256, U256};
use crate::state::StateProvider;

/// A payload queued on the recovery module, as seen on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainQueuedPayload {
    /// Recovery signer that queued the payload.
    pub signer: Address,
    /// Hash of the queued payload.
    pub payload_hash: B256,
    /// Block timestamp (seconds) the payload was queued at.
    pub timestamp: u64,
}

/// On-chain reads needed by the lifecycles.
#[async_trait]
pub trait ChainProvider: Send + Sync + std::fmt::Debug {
    /// Whether `wallet` has code on `chain_id`.
    async fn is_deployed(&self, wallet: Address, chain_id: u64) -> SignerKitResult<bool>;

    /// Image hash currently set on chain, or `None` for an undeployed wallet.
    async fn image_hash(
        &self,
        wallet: Address,
        chain_id: u64,
    ) -> SignerKitResult<Option<ImageHash>>;

    /// Next nonce of `space`.
    async fn nonce(&self, wallet: Address, chain_id: u64, space: U256) -> SignerKitResult<U256>;

    /// Payloads queued by `signers` for `wallet` on the recovery module.
    async fn queued_recovery_payloads(
        &self,
        wallet: Address,
        chain_id: u64,
        recovery_module: Address,
        signers: &[Address],
    ) -> SignerKitResult<Vec<OnChainQueuedPayload>>;
}

/// What the chain knows about a wallet, relative to the state provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OnChainView {
    /// Whether the wallet has code.
    pub deployed: bool,
    /// Image hash the wallet was derived from.
    pub deploy_image_hash: ImageHash,
    /// Signed updates (image hash, signature) the chain has not applied, oldest first.
    pub pending_updates: Vec<(ImageHash, Bytes)>,
}

pub(crate) async fn on_chain_view(
    state: &dyn StateProvider,
    chain: &dyn ChainProvider,
    wallet: Address,
    chain_id: u64,
) -> SignerKitResult<OnChainView> {
    let deploy_image_hash = state
        .get_deploy(wallet)
        .await?
        .ok_or(SignerKitError::WalletNotFound(wallet))?;
    let deployed = chain.is_deployed(wallet, chain_id).await?;
    let current = if deployed {
        chain
            .image_hash(wallet, chain_id)
            .await?
            .unwrap_or(deploy_image_hash)
    } else {
        deploy_image_hash
    };
    let pending_updates = state
        .config_updates(wallet, current)
        .await?
        .into_iter()
        .map(|update| (update.image_hash, update.signature))
        .collect();
    Ok(OnChainView {
        deployed,
        deploy_image_hash,
        pending_updates,
    })
}

#[derive(Debug, Default)]
struct ChainInner {
    deployed: BTreeSet<(Address, u64)>,
    image_hashes: BTreeMap<(Address, u64), ImageHash>,
    nonces: BTreeMap<(Address, u64, U256), U256>,
    queued: BTreeMap<(Address, u64), Vec<OnChainQueuedPayload>>,
}

/// In-memory [`ChainProvider`] whose state is set by the caller.
#[derive(Debug, Default)]
pub struct MemoryChainProvider {
    inner: RwLock<ChainInner>,
}

impl MemoryChainProvider {
    /// Creates a chain where no wallet is deployed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> SignerKitResult<std::sync::RwLockWriteGuard<'_, ChainInner>> {
        self.inner
            .write()
            .map_err(|_| SignerKitError::StateProvider("chain lock poisoned".to_string()))
    }

    fn read(&self) -> SignerKitResult<std::sync::RwLockReadGuard<'_, ChainInner>> {
        self.inner
            .read()
            .map_err(|_| SignerKitError::StateProvider("chain lock poisoned".to_string()))
    }

    /// Marks `wallet` as deployed with `image_hash`.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn set_deployed(
        &self,
        wallet: Address,
        chain_id: u64,
        image_hash: ImageHash,
    ) -> SignerKitResult<()> {
        let mut inner = self.write()?;
        inner.deployed.insert((wallet, chain_id));
        inner.image_hashes.insert((wallet, chain_id), image_hash);
        Ok(())
    }

    /// Sets the next nonce of `space`.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn set_nonce(
        &self,
        wallet: Address,
        chain_id: u64,
        space: U256,
        nonce: U256,
    ) -> SignerKitResult<()> {
        self.write()?.nonces.insert((wallet, chain_id, space), nonce);
        Ok(())
    }

    /// Queues a recovery payload.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn queue_recovery_payload(
        &self,
        wallet: Address,
        chain_id: u64,
        payload: OnChainQueuedPayload,
    ) -> SignerKitResult<()> {
        self.write()?
            .queued
            .entry((wallet, chain_id))
            .or_default()
            .push(payload);
        Ok(())
    }
}

#[async_trait]
impl ChainProvider for MemoryChainProvider {
    async fn is_deployed(&self, wallet: Address, chain_id: u64) -> SignerKitResult<bool> {
        Ok(self.read()?.deployed.contains(&(wallet, chain_id)))
    }

    async fn image_hash(
        &self,
        wallet: Address,
        chain_id: u64,
    ) -> SignerKitResult<Option<ImageHash>> {
        Ok(self.read()?.image_hashes.get(&(wallet, chain_id)).copied())
    }

    async fn nonce(&self, wallet: Address, chain_id: u64, space: U256) -> SignerKitResult<U256> {
        Ok(self
            .read()?
            .nonces
            .get(&(wallet, chain_id, space))
            .copied()
            .unwrap_or_default())
    }

    async fn queued_recovery_payloads(
        &self,
        wallet: Address,
        chain_id: u64,
        _recovery_module: Address,
        signers: &[Address],
    ) -> SignerKitResult<Vec<OnChainQueuedPayload>> {
        Ok(self
            .read()?
            .queued
            .get(&(wallet, chain_id))
            .map(|queued| {
                queued
                    .iter()
                    .filter(|payload| signers.contains(&payload.signer))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

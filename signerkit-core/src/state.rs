//! The state provider: off-chain storage of wallet configurations and witnesses.
//!
//! Wallet configurations are identified by their image hash. A wallet starts at the
//! configuration it was counterfactually deployed with and moves through signed configuration
//! updates, each raising the checkpoint. Witnesses are signatures a signer gave when joining a
//! wallet; they are how the rest of the crate learns which kind of signer a leaf is and which
//! wallets a signer belongs to.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::{Payload, SignerSignature};
use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::{Address, Bytes, ImageHash};
use crate::topology::recovery::{recovery_image_hash, RecoveryLeaf};
use crate::topology::sessions::SessionsTopology;
use crate::topology::Configuration;

/// A signature a signer gave over a wallet-scoped payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Witness {
    /// Wallet the signer joined.
    pub wallet: Address,
    /// Chain the payload was signed for.
    pub chain_id: u64,
    /// The signed payload.
    pub payload: Payload,
    /// The signature.
    pub signature: SignerSignature,
}

/// A module tree stored under its image hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StoredTree {
    /// Recovery signers.
    Recovery {
        /// Leaves, sorted by signer.
        leaves: Vec<RecoveryLeaf>,
    },
    /// Session manager tree.
    Sessions {
        /// The sessions.
        sessions: SessionsTopology,
    },
}

impl StoredTree {
    /// Image hash the tree is stored under.
    ///
    /// # Errors
    ///
    /// Fails only if a sessions tree cannot be serialized.
    pub fn image_hash(&self) -> SignerKitResult<ImageHash> {
        match self {
            Self::Recovery { leaves } => Ok(recovery_image_hash(leaves)),
            Self::Sessions { sessions } => sessions.image_hash(),
        }
    }
}

/// A signed move to a new configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    /// Image hash of the new configuration.
    pub image_hash: ImageHash,
    /// Checkpoint of the new configuration.
    pub checkpoint: u64,
    /// Wallet signature authorizing the move.
    pub signature: Bytes,
}

/// Off-chain storage of configurations, trees, witnesses and configuration updates.
#[async_trait]
pub trait StateProvider: Send + Sync + std::fmt::Debug {
    /// Witness of a plain signer for `wallet`.
    async fn get_witness_for(
        &self,
        wallet: Address,
        signer: Address,
    ) -> SignerKitResult<Option<Witness>>;

    /// Witness of a sapient signer for `wallet`.
    async fn get_witness_for_sapient(
        &self,
        wallet: Address,
        signer: Address,
        image_hash: ImageHash,
    ) -> SignerKitResult<Option<Witness>>;

    /// Stores the witnesses carried by `signatures` over `payload`.
    async fn save_witnesses(
        &self,
        wallet: Address,
        chain_id: u64,
        payload: Payload,
        signatures: Vec<SignerSignature>,
    ) -> SignerKitResult<()>;

    /// Wallets a signer has a witness for. `image_hash` selects a sapient signer.
    async fn wallets_for_signer(
        &self,
        signer: Address,
        image_hash: Option<ImageHash>,
    ) -> SignerKitResult<Vec<Address>>;

    /// Configuration committed by `image_hash`.
    async fn get_configuration(
        &self,
        image_hash: ImageHash,
    ) -> SignerKitResult<Option<Configuration>>;

    /// Stores a configuration under its image hash.
    async fn save_configuration(&self, configuration: Configuration) -> SignerKitResult<()>;

    /// Module tree committed by `image_hash`.
    async fn get_tree(&self, image_hash: ImageHash) -> SignerKitResult<Option<StoredTree>>;

    /// Stores a module tree under its image hash.
    async fn save_tree(&self, tree: StoredTree) -> SignerKitResult<()>;

    /// Records the counterfactual deployment of `wallet` with its initial configuration.
    async fn save_wallet(
        &self,
        wallet: Address,
        configuration: Configuration,
    ) -> SignerKitResult<()>;

    /// Initial image hash of `wallet`.
    async fn get_deploy(&self, wallet: Address) -> SignerKitResult<Option<ImageHash>>;

    /// Stores a signed configuration update of `wallet`.
    async fn save_update(
        &self,
        wallet: Address,
        configuration: Configuration,
        signature: Bytes,
    ) -> SignerKitResult<()>;

    /// Updates of `wallet` with a checkpoint above the configuration `from`, in order.
    async fn config_updates(
        &self,
        wallet: Address,
        from: ImageHash,
    ) -> SignerKitResult<Vec<ConfigUpdate>>;

    /// Most recent configuration of `wallet`, following every saved update.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::WalletNotFound`] if the wallet was never saved.
    async fn latest_configuration(&self, wallet: Address) -> SignerKitResult<Configuration> {
        let deploy = self
            .get_deploy(wallet)
            .await?
            .ok_or(SignerKitError::WalletNotFound(wallet))?;
        let image_hash = self
            .config_updates(wallet, deploy)
            .await?
            .last()
            .map_or(deploy, |update| update.image_hash);
        self.get_configuration(image_hash).await?.ok_or_else(|| {
            SignerKitError::StateProvider(format!("configuration {image_hash} not found"))
        })
    }
}

#[derive(Debug, Default)]
struct StateInner {
    witnesses: BTreeMap<(Address, Address, Option<ImageHash>), Witness>,
    configurations: BTreeMap<ImageHash, Configuration>,
    trees: BTreeMap<ImageHash, StoredTree>,
    deploys: BTreeMap<Address, ImageHash>,
    updates: BTreeMap<Address, Vec<ConfigUpdate>>,
}

/// In-memory [`StateProvider`].
#[derive(Debug, Default)]
pub struct MemoryStateProvider {
    inner: RwLock<StateInner>,
}

impl MemoryStateProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> SignerKitResult<std::sync::RwLockReadGuard<'_, StateInner>> {
        self.inner
            .read()
            .map_err(|_| SignerKitError::StateProvider("lock poisoned".to_string()))
    }

    fn write(&self) -> SignerKitResult<std::sync::RwLockWriteGuard<'_, StateInner>> {
        self.inner
            .write()
            .map_err(|_| SignerKitError::StateProvider("lock poisoned".to_string()))
    }
}

#[async_trait]
impl StateProvider for MemoryStateProvider {
    async fn get_witness_for(
        &self,
        wallet: Address,
        signer: Address,
    ) -> SignerKitResult<Option<Witness>> {
        Ok(self.read()?.witnesses.get(&(signer, wallet, None)).cloned())
    }

    async fn get_witness_for_sapient(
        &self,
        wallet: Address,
        signer: Address,
        image_hash: ImageHash,
    ) -> SignerKitResult<Option<Witness>> {
        Ok(self
            .read()?
            .witnesses
            .get(&(signer, wallet, Some(image_hash)))
            .cloned())
    }

    async fn save_witnesses(
        &self,
        wallet: Address,
        chain_id: u64,
        payload: Payload,
        signatures: Vec<SignerSignature>,
    ) -> SignerKitResult<()> {
        let mut inner = self.write()?;
        for signature in signatures {
            let key = (signature.address(), wallet, signature.image_hash());
            inner.witnesses.insert(
                key,
                Witness {
                    wallet,
                    chain_id,
                    payload: payload.clone(),
                    signature,
                },
            );
        }
        Ok(())
    }

    async fn wallets_for_signer(
        &self,
        signer: Address,
        image_hash: Option<ImageHash>,
    ) -> SignerKitResult<Vec<Address>> {
        Ok(self
            .read()?
            .witnesses
            .keys()
            .filter(|(address, _, hash)| *address == signer && *hash == image_hash)
            .map(|(_, wallet, _)| *wallet)
            .collect())
    }

    async fn get_configuration(
        &self,
        image_hash: ImageHash,
    ) -> SignerKitResult<Option<Configuration>> {
        Ok(self.read()?.configurations.get(&image_hash).cloned())
    }

    async fn save_configuration(&self, configuration: Configuration) -> SignerKitResult<()> {
        self.write()?
            .configurations
            .insert(configuration.image_hash(), configuration);
        Ok(())
    }

    async fn get_tree(&self, image_hash: ImageHash) -> SignerKitResult<Option<StoredTree>> {
        Ok(self.read()?.trees.get(&image_hash).cloned())
    }

    async fn save_tree(&self, tree: StoredTree) -> SignerKitResult<()> {
        let image_hash = tree.image_hash()?;
        self.write()?.trees.insert(image_hash, tree);
        Ok(())
    }

    async fn save_wallet(
        &self,
        wallet: Address,
        configuration: Configuration,
    ) -> SignerKitResult<()> {
        let image_hash = configuration.image_hash();
        let mut inner = self.write()?;
        inner.configurations.insert(image_hash, configuration);
        inner.deploys.insert(wallet, image_hash);
        Ok(())
    }

    async fn get_deploy(&self, wallet: Address) -> SignerKitResult<Option<ImageHash>> {
        Ok(self.read()?.deploys.get(&wallet).copied())
    }

    async fn save_update(
        &self,
        wallet: Address,
        configuration: Configuration,
        signature: Bytes,
    ) -> SignerKitResult<()> {
        let update = ConfigUpdate {
            image_hash: configuration.image_hash(),
            checkpoint: configuration.checkpoint,
            signature,
        };
        let mut inner = self.write()?;
        inner.configurations.insert(update.image_hash, configuration);
        let updates = inner.updates.entry(wallet).or_default();
        updates.retain(|existing| existing.checkpoint != update.checkpoint);
        updates.push(update);
        updates.sort_by_key(|update| update.checkpoint);
        Ok(())
    }

    async fn config_updates(
        &self,
        wallet: Address,
        from: ImageHash,
    ) -> SignerKitResult<Vec<ConfigUpdate>> {
        let inner = self.read()?;
        let Some(from) = inner.configurations.get(&from) else {
            return Ok(Vec::new());
        };
        Ok(inner
            .updates
            .get(&wallet)
            .map(|updates| {
                updates
                    .iter()
                    .filter(|update| update.checkpoint > from.checkpoint)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

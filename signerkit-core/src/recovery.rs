//! Recovery module management.
//!
//! Recovery signers are kept in a tree committed as a sapient leaf of the wallet configuration.
//! A recovery signer can queue a payload on the module; once the timelock of its leaf elapses
//! the module itself signs the payload (see [`crate::handlers::RecoveryHandler`]).

use std::sync::Arc;

use alloy_core::sol_types::SolValue;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::ChainProvider;
use crate::config::RecoveryDefaults;
use crate::envelope::{function_call, Envelope, Payload, SignerSignature};
use crate::error::{SignerKitError, SignerKitResult};
use crate::handlers::MnemonicHandler;
use crate::kinds::{sign_witness, SignerKind};
use crate::primitives::{Address, Bytes, Clock, B256};
use crate::signatures::Action;
use crate::state::{StateProvider, StoredTree};
use crate::store::RecordStore;
use crate::subscription::{watch, Subscription};
use crate::topology::recovery::{recovery_signers_configuration, RecoveryLeaf};
use crate::wallets::ConfigurationUpdates;

/// A payload queued on the recovery module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRecoveryPayload {
    /// Unique per wallet, chain, signer and payload.
    pub id: String,
    /// Wallet the payload executes on.
    pub wallet: Address,
    /// Chain the payload was queued on.
    pub chain_id: u64,
    /// Recovery signer that queued it.
    pub signer: Address,
    /// Position among the payloads of the signer.
    pub index: u64,
    /// Signing digest of the payload.
    pub payload_hash: B256,
    /// Queue time, in seconds.
    pub start_timestamp: u64,
    /// Time (seconds) from which the module signs.
    pub end_timestamp: u64,
}

/// Manages recovery signers and queued recovery payloads.
#[derive(Debug, Clone)]
pub struct Recovery {
    queue: Arc<dyn RecordStore<String, QueuedRecoveryPayload>>,
    updates: ConfigurationUpdates,
    state: Arc<dyn StateProvider>,
    chain: Arc<dyn ChainProvider>,
    mnemonic: Arc<MnemonicHandler>,
    module: Address,
    defaults: RecoveryDefaults,
    networks: Vec<u64>,
    clock: Arc<dyn Clock>,
}

impl Recovery {
    /// Creates the controller for the recovery `module`.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        queue: Arc<dyn RecordStore<String, QueuedRecoveryPayload>>,
        updates: ConfigurationUpdates,
        state: Arc<dyn StateProvider>,
        chain: Arc<dyn ChainProvider>,
        mnemonic: Arc<MnemonicHandler>,
        module: Address,
        defaults: RecoveryDefaults,
        networks: Vec<u64>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            updates,
            state,
            chain,
            mnemonic,
            module,
            defaults,
            networks,
            clock,
        }
    }

    /// Recovery signers of `wallet`, or `None` if the wallet has no recovery module.
    ///
    /// # Errors
    ///
    /// Fails if the wallet is unknown or its recovery tree is missing.
    pub async fn recovery_signers(
        &self,
        wallet: Address,
    ) -> SignerKitResult<Option<Vec<RecoveryLeaf>>> {
        let (_, parts) = self.updates.latest(wallet).await?;
        let Some(image_hash) = parts.module_image_hash(self.module) else {
            return Ok(None);
        };
        match self.state.get_tree(image_hash).await? {
            Some(StoredTree::Recovery { leaves }) => Ok(Some(leaves)),
            _ => Err(SignerKitError::ImpossibleState(format!(
                "recovery tree {image_hash} is unknown"
            ))),
        }
    }

    /// Registers the signer of `mnemonic` as a recovery signer. Returns the id of the
    /// `add-recovery-signer` request.
    ///
    /// # Errors
    ///
    /// Fails for invalid phrases or unknown wallets.
    pub async fn add_recovery_mnemonic(
        &self,
        wallet: Address,
        mnemonic: &SecretString,
    ) -> SignerKitResult<String> {
        let signer = self.mnemonic.signer_from_mnemonic(mnemonic)?;
        let (payload, signature) = sign_witness(
            signer.as_ref(),
            wallet,
            SignerKind::LoginMnemonic,
            self.clock.now_millis(),
        )
        .await?;
        self.state
            .save_witnesses(wallet, 0, payload, vec![signature])
            .await?;
        self.add_recovery_signer(wallet, signer.address()).await
    }

    /// Adds `signer` to the recovery tree, creating the module leaf if needed. Returns the id
    /// of the `add-recovery-signer` request.
    ///
    /// # Errors
    ///
    /// Fails if the wallet is unknown or a collaborator fails.
    pub async fn add_recovery_signer(
        &self,
        wallet: Address,
        signer: Address,
    ) -> SignerKitResult<String> {
        let (_, mut parts) = self.updates.latest(wallet).await?;
        let leaf = RecoveryLeaf {
            signer,
            required_delta_time: self.defaults.required_delta_time,
            min_timestamp: self.defaults.min_timestamp,
        };
        if parts.module_image_hash(self.module).is_some() {
            self.updates
                .edit_recovery(&mut parts, self.module, |leaves| leaves.push(leaf))
                .await?;
        } else {
            let tree = StoredTree::Recovery {
                leaves: vec![leaf],
            };
            parts.upsert_module(self.module, tree.image_hash()?);
            self.state.save_tree(tree).await?;
        }
        self.updates
            .request(wallet, &parts, Action::AddRecoverySigner, None)
            .await
    }

    /// Removes `signer` from the recovery tree. Returns the id of the
    /// `remove-recovery-signer` request.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InvalidInput`] if `signer` is not a recovery signer of the wallet.
    pub async fn remove_recovery_signer(
        &self,
        wallet: Address,
        signer: Address,
    ) -> SignerKitResult<String> {
        let known = self
            .recovery_signers(wallet)
            .await?
            .is_some_and(|leaves| leaves.iter().any(|leaf| leaf.signer == signer));
        if !known {
            return Err(SignerKitError::InvalidInput {
                attribute: "signer".to_string(),
                reason: format!("{signer} is not a recovery signer of {wallet}"),
            });
        }
        let (_, mut parts) = self.updates.latest(wallet).await?;
        self.updates
            .edit_recovery(&mut parts, self.module, |leaves| {
                leaves.retain(|leaf| leaf.signer != signer);
            })
            .await?;
        self.updates
            .request(wallet, &parts, Action::RemoveRecoverySigner, None)
            .await
    }

    /// Applies a signed `add-recovery-signer` or `remove-recovery-signer` request.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InvalidInput`] for other requests, or the failure of the update.
    pub async fn complete_recovery_update(&self, id: &str) -> SignerKitResult<()> {
        let request = self.updates.requests().get_base(id).await?;
        if !matches!(
            request.action,
            Action::AddRecoverySigner | Action::RemoveRecoverySigner
        ) {
            return Err(SignerKitError::InvalidInput {
                attribute: "signature_request".to_string(),
                reason: format!("{id} is a {} request", request.action),
            });
        }
        self.updates.complete(id).await.map(|_| ())
    }

    /// Opens a `recovery` request in which any recovery signer authorizes queueing `payload`.
    ///
    /// # Errors
    ///
    /// [`SignerKitError::InvalidInput`] if the wallet has no recovery signers.
    pub async fn queue_payload(
        &self,
        wallet: Address,
        chain_id: u64,
        payload: &Payload,
    ) -> SignerKitResult<String> {
        let leaves = self
            .recovery_signers(wallet)
            .await?
            .filter(|leaves| !leaves.is_empty())
            .ok_or_else(|| SignerKitError::InvalidInput {
                attribute: "wallet".to_string(),
                reason: format!("{wallet} has no recovery signers"),
            })?;
        let envelope = Envelope::new(
            wallet,
            chain_id,
            Payload::Digest {
                digest: payload.hash(wallet, chain_id),
            },
            recovery_signers_configuration(&leaves),
        );
        self.updates
            .requests()
            .request(envelope, Action::Recovery, None)
            .await
    }

    /// Completes a signed `recovery` request. Returns the recovery module and the calldata
    /// queueing the payload on it.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not a pending `recovery` request or no recovery signer signed it.
    pub async fn complete_payload(&self, id: &str) -> SignerKitResult<(Address, Bytes)> {
        let request = self
            .updates
            .requests()
            .get_pending(id, Action::Recovery)
            .await?;
        let Payload::Digest { digest } = request.envelope.payload else {
            return Err(SignerKitError::ImpossibleState(format!(
                "recovery request {id} does not carry a digest"
            )));
        };
        let Some(SignerSignature::Ecdsa { address, signature }) = request
            .envelope
            .signatures
            .iter()
            .find(|signature| matches!(signature, SignerSignature::Ecdsa { .. }))
            .cloned()
        else {
            let (weight, threshold) = (request.envelope.weight(), request.envelope.threshold());
            return Err(SignerKitError::InsufficientWeight { weight, threshold });
        };
        self.updates.requests().complete(id).await?;
        info!(%id, wallet = %request.wallet, signer = %address, "recovery payload ready to queue");
        Ok((
            self.module,
            function_call(
                "queuePayload(address,address,bytes32,bytes)",
                &(request.wallet, address, digest, signature).abi_encode_params(),
            ),
        ))
    }

    /// Refreshes the queued payloads of `wallet` from the chain. Returns them.
    ///
    /// # Errors
    ///
    /// Fails if the wallet is unknown or a collaborator fails.
    pub async fn update_queued_payloads(
        &self,
        wallet: Address,
    ) -> SignerKitResult<Vec<QueuedRecoveryPayload>> {
        let leaves = self.recovery_signers(wallet).await?.unwrap_or_default();
        let signers: Vec<_> = leaves.iter().map(|leaf| leaf.signer).collect();

        let mut fresh = Vec::new();
        if !signers.is_empty() {
            for &chain_id in &self.networks {
                let on_chain = self
                    .chain
                    .queued_recovery_payloads(wallet, chain_id, self.module, &signers)
                    .await?;
                for leaf in &leaves {
                    let queued = on_chain.iter().filter(|payload| {
                        payload.signer == leaf.signer && payload.timestamp >= leaf.min_timestamp
                    });
                    for (index, payload) in (0u64..).zip(queued) {
                        fresh.push(QueuedRecoveryPayload {
                            id: format!(
                                "{wallet}-{chain_id}-{}-{}",
                                leaf.signer, payload.payload_hash
                            ),
                            wallet,
                            chain_id,
                            signer: leaf.signer,
                            index,
                            payload_hash: payload.payload_hash,
                            start_timestamp: payload.timestamp,
                            end_timestamp: payload
                                .timestamp
                                .saturating_add(leaf.required_delta_time),
                        });
                    }
                }
            }
        }

        for stale in self.queued_payloads(wallet).await? {
            if !fresh.iter().any(|payload| payload.id == stale.id) {
                self.queue.del(&stale.id).await?;
            }
        }
        for payload in &fresh {
            if self.queue.get(&payload.id).await?.as_ref() != Some(payload) {
                self.queue.set(payload.id.clone(), payload.clone()).await?;
            }
        }
        debug!(%wallet, queued = fresh.len(), "queued recovery payloads refreshed");
        Ok(fresh)
    }

    /// Locally known queued payloads of `wallet`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn queued_payloads(
        &self,
        wallet: Address,
    ) -> SignerKitResult<Vec<QueuedRecoveryPayload>> {
        Ok(self
            .queue
            .list()
            .await?
            .into_iter()
            .filter(|payload| payload.wallet == wallet)
            .collect())
    }

    /// Pushes the queued payloads of `wallet` whenever they change.
    #[must_use]
    pub fn on_queued_payloads_update(
        &self,
        wallet: Address,
        trigger: bool,
    ) -> Subscription<Vec<QueuedRecoveryPayload>> {
        let recovery = self.clone();
        watch(
            self.queue.subscribe(),
            Vec::new(),
            |_: &String| true,
            trigger,
            move || {
                let recovery = recovery.clone();
                async move { recovery.queued_payloads(wallet).await.ok() }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MemoryChainProvider, OnChainQueuedPayload};
    use crate::primitives::ManualClock;
    use crate::signatures::SignatureRequests;
    use crate::state::MemoryStateProvider;
    use crate::store::MemoryStore;
    use crate::test_support::FakeSignerFactory;
    use crate::topology::{build_capped_tree, CappedMember, Topology, WalletTopology};

    const WALLET: Address = Address::repeat_byte(0x11);
    const MODULE: Address = Address::repeat_byte(0x0e);

    struct Fixture {
        recovery: Recovery,
        chain: Arc<MemoryChainProvider>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let state: Arc<dyn StateProvider> = Arc::new(MemoryStateProvider::new());
        let parts = WalletTopology {
            login: build_capped_tree(&[CappedMember::signer(Address::repeat_byte(1))]),
            devices: build_capped_tree(&[CappedMember::signer(Address::repeat_byte(2))]),
            guard: None,
            modules: Topology::empty(),
        };
        state.save_wallet(WALLET, parts.to_config(0)).await.unwrap();
        let requests = Arc::new(SignatureRequests::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            600_000,
            "test".to_string(),
        ));
        let chain = Arc::new(MemoryChainProvider::new());
        let recovery = Recovery::new(
            Arc::new(MemoryStore::new()),
            ConfigurationUpdates::new(state.clone(), requests.clone()),
            state,
            chain.clone(),
            Arc::new(MnemonicHandler::new(
                Arc::new(FakeSignerFactory::default()),
                requests,
            )),
            MODULE,
            RecoveryDefaults {
                required_delta_time: 60,
                min_timestamp: 0,
            },
            vec![1],
            clock,
        );
        Fixture { recovery, chain }
    }

    #[tokio::test]
    async fn test_add_recovery_signer_creates_module_leaf() {
        let Fixture { recovery, .. } = fixture().await;
        assert_eq!(recovery.recovery_signers(WALLET).await.unwrap(), None);

        let signer = Address::repeat_byte(0x51);
        let id = recovery.add_recovery_signer(WALLET, signer).await.unwrap();
        let request = recovery.updates.requests().get_base(&id).await.unwrap();
        assert_eq!(request.action, Action::AddRecoverySigner);
        assert_eq!(request.envelope.configuration.checkpoint, 0);

        // Unsigned updates do not change the wallet.
        assert!(matches!(
            recovery.complete_recovery_update(&id).await,
            Err(SignerKitError::InsufficientWeight { .. })
        ));
        assert_eq!(recovery.recovery_signers(WALLET).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_unknown_recovery_signer() {
        let Fixture { recovery, .. } = fixture().await;
        assert!(matches!(
            recovery
                .remove_recovery_signer(WALLET, Address::repeat_byte(0x51))
                .await,
            Err(SignerKitError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_queue_payload_requires_recovery_signers() {
        let Fixture { recovery, .. } = fixture().await;
        let payload = Payload::Digest {
            digest: B256::repeat_byte(7),
        };
        assert!(matches!(
            recovery.queue_payload(WALLET, 1, &payload).await,
            Err(SignerKitError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_queued_payloads_applies_timelock() {
        let Fixture { recovery, chain } = fixture().await;
        let signer = Address::repeat_byte(0x51);
        let id = recovery.add_recovery_signer(WALLET, signer).await.unwrap();
        // Apply the update directly, as if the login signer had signed it.
        let request = recovery.updates.requests().get_base(&id).await.unwrap();
        let Payload::ConfigUpdate { image_hash } = request.envelope.payload else {
            panic!("not a configuration update");
        };
        let next = recovery
            .state
            .get_configuration(image_hash)
            .await
            .unwrap()
            .unwrap();
        recovery
            .state
            .save_update(WALLET, next, Bytes::new())
            .await
            .unwrap();

        chain
            .queue_recovery_payload(
                WALLET,
                1,
                OnChainQueuedPayload {
                    signer,
                    payload_hash: B256::repeat_byte(9),
                    timestamp: 500,
                },
            )
            .unwrap();
        let queued = recovery.update_queued_payloads(WALLET).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].start_timestamp, 500);
        assert_eq!(queued[0].end_timestamp, 560);
        assert_eq!(recovery.queued_payloads(WALLET).await.unwrap(), queued);
    }
}

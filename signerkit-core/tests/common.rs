//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::keccak256;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use signerkit_core::chain::MemoryChainProvider;
use signerkit_core::envelope::Call;
use signerkit_core::kinds::SignerKind;
use signerkit_core::primitives::{Address, Bytes, ManualClock, B256};
use signerkit_core::signatures::{BaseSignatureRequest, Signatures};
use signerkit_core::signer::{MemoryDeviceKeys, Signer, SignerFactory};
use signerkit_core::state::MemoryStateProvider;
use signerkit_core::store::{MemoryStore, RecordStore};
use signerkit_core::transactions::{FeeOptions, OperationStatus, Relayer};
use signerkit_core::{
    Collaborators, Databases, DefaultConfig, Environment, Manager, SignerKitConfig,
    SignerKitResult,
};

pub const MNEMONIC: &str = "test test test test test test test test test test test junk";

pub fn mnemonic() -> SecretString {
    SecretString::from(MNEMONIC)
}

/// Signer whose address and signatures are keccak derivations of a seed.
#[derive(Debug)]
pub struct FakeSigner {
    seed: B256,
}

impl FakeSigner {
    pub fn from_phrase(phrase: &str) -> Self {
        Self {
            seed: keccak256(phrase.as_bytes()),
        }
    }
}

#[async_trait]
impl Signer for FakeSigner {
    fn address(&self) -> Address {
        Address::from_slice(&keccak256(self.seed)[12..])
    }

    async fn sign_digest(&self, digest: B256) -> SignerKitResult<Bytes> {
        let mut preimage = self.seed.to_vec();
        preimage.extend_from_slice(digest.as_slice());
        Ok(Bytes::from(keccak256(preimage).to_vec()))
    }
}

/// Deterministic keys, namespaced so that two devices never share one.
#[derive(Debug)]
pub struct FakeSignerFactory {
    namespace: String,
    counter: AtomicU64,
}

impl FakeSignerFactory {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            counter: AtomicU64::new(0),
        }
    }
}

impl SignerFactory for FakeSignerFactory {
    fn random(&self) -> Arc<dyn Signer> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(FakeSigner::from_phrase(&format!("{} key {n}", self.namespace)))
    }

    fn from_mnemonic(&self, mnemonic: &SecretString) -> SignerKitResult<Arc<dyn Signer>> {
        Ok(Arc::new(FakeSigner::from_phrase(mnemonic.expose_secret())))
    }
}

/// Relayer quoting no fee and recording what it relays.
#[derive(Debug, Default)]
pub struct ManualRelayer {
    pub relayed: Mutex<Vec<(Address, Bytes, u64)>>,
}

#[async_trait]
impl Relayer for ManualRelayer {
    fn id(&self) -> &str {
        "manual"
    }

    async fn is_available(&self, _wallet: Address, _chain_id: u64) -> SignerKitResult<bool> {
        Ok(true)
    }

    async fn fee_options(
        &self,
        _wallet: Address,
        _chain_id: u64,
        _calls: &[Call],
    ) -> SignerKitResult<FeeOptions> {
        Ok(FeeOptions::default())
    }

    async fn relay(
        &self,
        to: Address,
        data: Bytes,
        chain_id: u64,
        _quote: Option<String>,
    ) -> SignerKitResult<String> {
        let op_hash = keccak256(&data).to_string();
        if let Ok(mut relayed) = self.relayed.lock() {
            relayed.push((to, data, chain_id));
        }
        Ok(op_hash)
    }

    async fn status(&self, _op_hash: &str, _chain_id: u64) -> SignerKitResult<OperationStatus> {
        Ok(OperationStatus::Pending)
    }
}

/// Services shared by every device of a test: the remote state, the chain and the synchronized
/// signature requests.
#[derive(Debug, Clone)]
pub struct Network {
    pub state: Arc<MemoryStateProvider>,
    pub chain: Arc<MemoryChainProvider>,
    pub signatures: Arc<dyn RecordStore<String, BaseSignatureRequest>>,
    pub relayer: Arc<ManualRelayer>,
    pub clock: Arc<ManualClock>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemoryStateProvider::new()),
            chain: Arc::new(MemoryChainProvider::new()),
            signatures: Arc::new(MemoryStore::new()),
            relayer: Arc::new(ManualRelayer::default()),
            clock: Arc::new(ManualClock::new(1_700_000_000_000)),
        }
    }

    /// A device with its own keys and local records.
    pub fn device(&self, name: &str) -> Manager {
        let config = SignerKitConfig::from_environment(&Environment::Staging);
        let factory = Arc::new(FakeSignerFactory::new(name));
        let databases = Databases {
            signatures: self.signatures.clone(),
            ..Databases::in_memory()
        };
        Manager::new(
            &config,
            Collaborators {
                state: self.state.clone(),
                chain: self.chain.clone(),
                relayers: vec![self.relayer.clone() as Arc<dyn Relayer>],
                device_keys: Arc::new(MemoryDeviceKeys::new(factory.clone())),
                signer_factory: factory,
                identity: None,
                passkeys: None,
                guard: None,
                clock: self.clock.clone(),
            },
            databases,
        )
    }
}

/// Runs the handle of every ready signer of `kind` on request `id`.
pub async fn sign_with(signatures: &Signatures, id: &str, kind: SignerKind) -> usize {
    let request = signatures.get(id).await.unwrap();
    let mut signed = 0;
    for signer in request.signers {
        if signer.kind != Some(kind) || signer.signed || !signer.status.is_ready() {
            continue;
        }
        if let Some(handle) = signer.status.handle() {
            assert!(handle.handle().await.unwrap());
            signed += 1;
        }
    }
    signed
}

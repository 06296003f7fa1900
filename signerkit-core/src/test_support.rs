//! Deterministic fakes shared by unit tests.

#![allow(dead_code)]
#![allow(clippy::missing_const_for_fn)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::keccak256;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::envelope::{Envelope, Payload};
use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::{Address, Bytes, ManualClock, B256};
use crate::signatures::{Action, BaseSignatureRequest, SignatureRequests};
use crate::signer::{Signer, SignerFactory};
use crate::store::MemoryStore;
use crate::topology::{Configuration, Topology};

/// Signer whose address and signatures are derived from a seed with keccak.
#[derive(Debug, Clone)]
pub struct FakeSigner {
    seed: B256,
}

impl FakeSigner {
    pub fn from_seed(seed: B256) -> Self {
        Self { seed }
    }

    pub fn from_phrase(phrase: &str) -> Self {
        Self::from_seed(keccak256(phrase.as_bytes()))
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

#[derive(Debug, Default)]
pub struct FakeSignerFactory {
    counter: AtomicU64,
}

impl SignerFactory for FakeSignerFactory {
    fn random(&self) -> Arc<dyn Signer> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(FakeSigner::from_phrase(&format!("random key {n}")))
    }

    fn from_mnemonic(&self, mnemonic: &SecretString) -> SignerKitResult<Arc<dyn Signer>> {
        let phrase = mnemonic.expose_secret();
        let words = phrase.split_whitespace().count();
        if words != 12 && words != 24 {
            return Err(SignerKitError::InvalidInput {
                attribute: "mnemonic".to_string(),
                reason: format!("expected 12 or 24 words, got {words}"),
            });
        }
        Ok(Arc::new(FakeSigner::from_phrase(phrase)))
    }
}

pub const MNEMONIC: &str =
    "test test test test test test test test test test test junk";

pub fn mnemonic() -> SecretString {
    SecretString::from(MNEMONIC)
}

pub fn signature_requests(clock: Arc<ManualClock>) -> Arc<SignatureRequests> {
    Arc::new(SignatureRequests::new(
        Arc::new(MemoryStore::new()),
        clock,
        600_000,
        "test".to_string(),
    ))
}

/// Opens a threshold-1 digest request of `wallet` over `topology`.
pub async fn digest_request(
    requests: &SignatureRequests,
    wallet: Address,
    topology: Topology,
) -> BaseSignatureRequest {
    let envelope = Envelope::new(
        wallet,
        1,
        Payload::Digest {
            digest: B256::repeat_byte(0x42),
        },
        Configuration {
            checkpoint: 0,
            threshold: 1,
            topology,
        },
    );
    let id = requests
        .request(envelope, Action::SignMessage, None)
        .await
        .unwrap();
    requests.get_base(&id).await.unwrap()
}

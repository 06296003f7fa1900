//! Key material seams.
//!
//! Concrete cryptography lives with the host: this crate only asks a [`Signer`] for a signature
//! over a digest, a [`SignerFactory`] for new or mnemonic-derived keys, and a [`DeviceKeyStore`]
//! for the keys held by the current device.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{SignerKitError, SignerKitResult};
use crate::primitives::{Address, Bytes, B256};

/// An ECDSA key able to sign digests.
#[async_trait]
pub trait Signer: Send + Sync + Debug {
    /// Address of the key.
    fn address(&self) -> Address;

    /// Signs `digest`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::Signer`] if the key cannot sign.
    async fn sign_digest(&self, digest: B256) -> SignerKitResult<Bytes>;
}

/// Creates signers.
pub trait SignerFactory: Send + Sync + Debug {
    /// Generates a fresh random key.
    fn random(&self) -> Arc<dyn Signer>;

    /// Derives the key of a mnemonic phrase.
    ///
    /// # Errors
    ///
    /// Returns [`SignerKitError::InvalidInput`] if the phrase is not a valid mnemonic.
    fn from_mnemonic(&self, mnemonic: &SecretString) -> SignerKitResult<Arc<dyn Signer>>;
}

/// Keys held by the current device.
#[async_trait]
pub trait DeviceKeyStore: Send + Sync + Debug {
    /// Creates and persists a new device key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be persisted.
    async fn create(&self) -> SignerKitResult<Arc<dyn Signer>>;

    /// Looks up the device key for `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key store cannot be read.
    async fn get(&self, address: Address) -> SignerKitResult<Option<Arc<dyn Signer>>>;

    /// Addresses of every device key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key store cannot be read.
    async fn list(&self) -> SignerKitResult<Vec<Address>>;

    /// Deletes the device key for `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key store cannot be written.
    async fn remove(&self, address: Address) -> SignerKitResult<()>;
}

/// In-memory [`DeviceKeyStore`] creating keys through a [`SignerFactory`].
///
/// Keys are lost when the store is dropped.
#[derive(Debug)]
pub struct MemoryDeviceKeys {
    factory: Arc<dyn SignerFactory>,
    keys: RwLock<BTreeMap<Address, Arc<dyn Signer>>>,
}

impl MemoryDeviceKeys {
    /// Creates an empty key store.
    #[must_use]
    pub fn new(factory: Arc<dyn SignerFactory>) -> Self {
        Self {
            factory,
            keys: RwLock::new(BTreeMap::new()),
        }
    }
}

fn poisoned() -> SignerKitError {
    SignerKitError::Storage("device key lock poisoned".to_string())
}

#[async_trait]
impl DeviceKeyStore for MemoryDeviceKeys {
    async fn create(&self) -> SignerKitResult<Arc<dyn Signer>> {
        let signer = self.factory.random();
        self.keys
            .write()
            .map_err(|_| poisoned())?
            .insert(signer.address(), signer.clone());
        Ok(signer)
    }

    async fn get(&self, address: Address) -> SignerKitResult<Option<Arc<dyn Signer>>> {
        Ok(self
            .keys
            .read()
            .map_err(|_| poisoned())?
            .get(&address)
            .cloned())
    }

    async fn list(&self) -> SignerKitResult<Vec<Address>> {
        Ok(self
            .keys
            .read()
            .map_err(|_| poisoned())?
            .keys()
            .copied()
            .collect())
    }

    async fn remove(&self, address: Address) -> SignerKitResult<()> {
        self.keys.write().map_err(|_| poisoned())?.remove(&address);
        Ok(())
    }
}

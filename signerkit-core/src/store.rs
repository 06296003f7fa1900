//! Keyed record stores.
//!
//! Every lifecycle keeps its records (signature requests, transactions, wallets, messages,
//! queued recovery payloads) in a [`RecordStore`]. Stores broadcast a [`StoreEvent`] on every
//! change so subscriptions can re-read the affected records.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{SignerKitError, SignerKitResult};

const EVENT_CAPACITY: usize = 256;

/// A change to a record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent<K> {
    /// The record was created or overwritten.
    Set(K),
    /// The record was deleted.
    Deleted(K),
}

impl<K> StoreEvent<K> {
    /// Key of the changed record.
    pub const fn key(&self) -> &K {
        match self {
            Self::Set(key) | Self::Deleted(key) => key,
        }
    }
}

/// Persistent key/value storage for one record type.
#[async_trait]
pub trait RecordStore<K, V>: Send + Sync + Debug
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Reads the record at `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get(&self, key: &K) -> SignerKitResult<Option<V>>;

    /// Writes the record at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn set(&self, key: K, value: V) -> SignerKitResult<()>;

    /// Deletes the record at `key`. Deleting a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn del(&self, key: &K) -> SignerKitResult<()>;

    /// Lists every record, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn list(&self) -> SignerKitResult<Vec<V>>;

    /// Subscribes to changes.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent<K>>;
}

/// In-memory [`RecordStore`].
///
/// Nothing is persisted across restarts.
#[derive(Debug)]
pub struct MemoryStore<K, V> {
    records: RwLock<BTreeMap<K, V>>,
    events: broadcast::Sender<StoreEvent<K>>,
}

impl<K: Clone, V> MemoryStore<K, V> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(BTreeMap::new()),
            events,
        }
    }
}

impl<K: Clone, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> SignerKitError {
    SignerKitError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl<K, V> RecordStore<K, V> for MemoryStore<K, V>
where
    K: Ord + Clone + Debug + Send + Sync + 'static,
    V: Clone + Debug + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> SignerKitResult<Option<V>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(key).cloned())
    }

    async fn set(&self, key: K, value: V) -> SignerKitResult<()> {
        {
            let mut records = self.records.write().map_err(|_| poisoned())?;
            records.insert(key.clone(), value);
        }
        // No receivers is fine.
        let _ = self.events.send(StoreEvent::Set(key));
        Ok(())
    }

    async fn del(&self, key: &K) -> SignerKitResult<()> {
        let removed = {
            let mut records = self.records.write().map_err(|_| poisoned())?;
            records.remove(key).is_some()
        };
        if removed {
            let _ = self.events.send(StoreEvent::Deleted(key.clone()));
        }
        Ok(())
    }

    async fn list(&self) -> SignerKitResult<Vec<V>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.values().cloned().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent<K>> {
        self.events.subscribe()
    }
}

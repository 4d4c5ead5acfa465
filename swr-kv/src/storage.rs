//! Storage backend contract and the in-memory reference backend
//!
//! The cache never owns its data. Every value, write timestamp and
//! revalidation marker lives in an external key-value store reached through
//! the [`Storage`] trait. Backends that can also delete keys implement
//! [`RemovableStorage`], which is what enables the revalidation cooldown.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Minimal key-value capability: read and write string values
#[async_trait]
pub trait Storage: Send + Sync {
    /// Return the value stored under `key`, or `None` when absent
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: String) -> StorageResult<()>;
}

/// Storage that can also delete keys
#[async_trait]
pub trait RemovableStorage: Storage {
    /// Delete `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

#[async_trait]
impl<T: Storage + ?Sized> Storage for Arc<T> {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        (**self).set(key, value).await
    }
}

#[async_trait]
impl<T: RemovableStorage + ?Sized> RemovableStorage for Arc<T> {
    async fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key).await
    }
}

/// A configured backend together with the capability level it was given at
#[derive(Clone)]
pub(crate) enum StorageHandle {
    ReadWrite(Arc<dyn Storage>),
    Removable(Arc<dyn RemovableStorage>),
}

impl StorageHandle {
    pub(crate) fn supports_remove(&self) -> bool {
        matches!(self, StorageHandle::Removable(_))
    }

    pub(crate) async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match self {
            StorageHandle::ReadWrite(storage) => storage.get(key).await,
            StorageHandle::Removable(storage) => storage.get(key).await,
        }
    }

    pub(crate) async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        match self {
            StorageHandle::ReadWrite(storage) => storage.set(key, value).await,
            StorageHandle::Removable(storage) => storage.set(key, value).await,
        }
    }

    pub(crate) async fn remove(&self, key: &str) -> StorageResult<()> {
        match self {
            StorageHandle::ReadWrite(_) => Err(StorageError::Unsupported("remove")),
            StorageHandle::Removable(storage) => storage.remove(key).await,
        }
    }
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageHandle::ReadWrite(_) => write!(f, "StorageHandle::ReadWrite"),
            StorageHandle::Removable(_) => write!(f, "StorageHandle::Removable"),
        }
    }
}

/// The three storage keys backing one logical cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    /// Serialized value
    pub value: String,

    /// Millisecond timestamp of the last successful write
    pub write_time: String,

    /// Millisecond timestamp of the revalidation in flight, if any
    pub revalidate: String,
}

impl StorageKeys {
    pub fn new(key: &str) -> Self {
        Self {
            value: key.to_string(),
            write_time: format!("{}_time", key),
            revalidate: format!("{}_revalidate", key),
        }
    }
}

/// In-process storage backed by a `HashMap`
///
/// Clones share the same underlying map, so a test can hand one clone to the
/// cache configuration and inspect the stored keys through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys (values, timestamps and markers all count)
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Check if a raw storage key is present
    pub async fn contains_key(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Copy of every stored key and value
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.entries.read().await.clone()
    }

    /// Drop every stored key
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        debug!("Cleared {} keys from memory storage", count);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self.entries.read().await.get(key).cloned();
        trace!("memory get {} -> {}", key, if value.is_some() { "hit" } else { "miss" });
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        trace!("memory set {} ({} bytes)", key, value.len());
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl RemovableStorage for MemoryStorage {
    async fn remove(&self, key: &str) -> StorageResult<()> {
        trace!("memory remove {}", key);
        self.entries.write().await.remove(key);
        Ok(())
    }
}

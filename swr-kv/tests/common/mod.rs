//! Shared helpers for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use swr_kv::{
    CacheEventKind, MemoryStorage, RemovableStorage, StaleWhileRevalidate, Storage, StorageError,
    StorageResult,
};

/// Memory storage whose operations can be switched to fail
#[derive(Clone, Default)]
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    pub fail_get: Arc<AtomicBool>,
    pub fail_set: Arc<AtomicBool>,
    pub fail_remove: Arc<AtomicBool>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("get {}", key)));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(format!("set {}", key)));
        }
        self.inner.set(key, value).await
    }
}

#[async_trait]
impl RemovableStorage for FlakyStorage {
    async fn remove(&self, key: &str) -> StorageResult<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(format!("remove {}", key)));
        }
        self.inner.remove(key).await
    }
}

/// Records the kind of every event a cache emits
#[derive(Clone, Default)]
pub struct EventLog {
    kinds: Arc<Mutex<Vec<CacheEventKind>>>,
}

impl EventLog {
    pub fn attach<V: 'static>(cache: &StaleWhileRevalidate<V>) -> Self
    where
        V: Clone + Send + Sync,
    {
        let log = Self::default();
        let sink = Arc::clone(&log.kinds);
        cache
            .events()
            .on_any(move |event| sink.lock().unwrap().push(event.kind()));
        log
    }

    pub fn kinds(&self) -> Vec<CacheEventKind> {
        self.kinds.lock().unwrap().clone()
    }

    pub fn count(&self, kind: CacheEventKind) -> usize {
        self.kinds().iter().filter(|k| **k == kind).count()
    }

    pub fn contains(&self, kind: CacheEventKind) -> bool {
        self.count(kind) > 0
    }

    pub fn clear(&self) {
        self.kinds.lock().unwrap().clear();
    }
}

/// Producer returning `value` and counting its invocations
pub fn counting_producer(
    calls: &Arc<AtomicUsize>,
    value: &str,
) -> impl FnOnce() -> std::future::Ready<anyhow::Result<String>> + Send + 'static {
    let calls = Arc::clone(calls);
    let value = value.to_string();
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(value))
    }
}

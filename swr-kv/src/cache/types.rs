//! Core type definitions for the cache system

use crate::cache::events::{CacheEvent, CacheEventKind, EventEmitter, ListenerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache key, either given directly or computed on demand
///
/// A deferred key is evaluated exactly once per call, before anything else
/// happens, so expensive key construction can be handed to the cache.
pub enum CacheKey {
    Literal(String),
    Deferred(Box<dyn FnOnce() -> String + Send>),
}

impl CacheKey {
    /// Key computed by `build` when the call starts
    pub fn deferred<F, K>(build: F) -> Self
    where
        F: FnOnce() -> K + Send + 'static,
        K: ToString,
    {
        CacheKey::Deferred(Box::new(move || build().to_string()))
    }

    /// Evaluate the key
    pub fn resolve(self) -> String {
        match self {
            CacheKey::Literal(key) => key,
            CacheKey::Deferred(build) => build(),
        }
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Literal(key) => f.debug_tuple("Literal").field(key).finish(),
            CacheKey::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        CacheKey::Literal(key)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        CacheKey::Literal(key.to_string())
    }
}

impl From<&String> for CacheKey {
    fn from(key: &String) -> Self {
        CacheKey::Literal(key.clone())
    }
}

/// Statistics derived from cache events
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls to `get_or_compute`
    pub invocations: u64,

    /// Fresh or stale values served
    pub hits: u64,

    /// Calls that had to wait for the producer
    pub misses: u64,

    /// Hits past the staleness threshold
    pub stale: u64,

    /// Values ignored for being past the time-to-live
    pub expired: u64,

    /// Producer runs started
    pub revalidations: u64,

    /// Producer runs that failed
    pub revalidate_failures: u64,

    /// Revalidations skipped by the cooldown
    pub throttled: u64,

    /// Failed storage reads and decodes
    pub get_failures: u64,

    /// Failed storage writes, removes and encodes
    pub set_failures: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Storage failures of any kind
    pub fn storage_failures(&self) -> u64 {
        self.get_failures + self.set_failures
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, stale: {}, revalidations: {}, throttled: {}, storage_failures: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.stale,
            self.revalidations,
            self.throttled,
            self.storage_failures()
        )
    }
}

/// Counts events of one cache
#[derive(Debug, Default)]
pub struct StatsCollector {
    counters: [AtomicU64; 10],
}

impl StatsCollector {
    /// Start counting the events of `emitter`
    pub fn attach<V>(emitter: &EventEmitter<V>) -> (Arc<Self>, ListenerId)
    where
        V: 'static,
    {
        let collector = Arc::new(Self::default());
        let sink = Arc::clone(&collector);
        let id = emitter.on_any(move |event: &CacheEvent<V>| sink.record(event.kind()));
        (collector, id)
    }

    /// Count one event
    pub fn record(&self, kind: CacheEventKind) {
        self.counters[Self::slot(kind)].fetch_add(1, Ordering::Relaxed);
    }

    /// Current counts
    pub fn snapshot(&self) -> CacheStats {
        let count = |kind| self.counters[Self::slot(kind)].load(Ordering::Relaxed);
        CacheStats {
            invocations: count(CacheEventKind::Invoke),
            hits: count(CacheEventKind::CacheHit),
            misses: count(CacheEventKind::CacheMiss),
            stale: count(CacheEventKind::CacheStale),
            expired: count(CacheEventKind::CacheExpired),
            revalidations: count(CacheEventKind::Revalidate),
            revalidate_failures: count(CacheEventKind::RevalidateFailed),
            throttled: count(CacheEventKind::RevalidateTimeoutNotExceeded),
            get_failures: count(CacheEventKind::CacheGetFailed),
            set_failures: count(CacheEventKind::CacheSetFailed),
        }
    }

    /// Reset every counter to zero
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn slot(kind: CacheEventKind) -> usize {
        match kind {
            CacheEventKind::Invoke => 0,
            CacheEventKind::CacheHit => 1,
            CacheEventKind::CacheMiss => 2,
            CacheEventKind::CacheStale => 3,
            CacheEventKind::CacheExpired => 4,
            CacheEventKind::CacheGetFailed => 5,
            CacheEventKind::CacheSetFailed => 6,
            CacheEventKind::Revalidate => 7,
            CacheEventKind::RevalidateFailed => 8,
            CacheEventKind::RevalidateTimeoutNotExceeded => 9,
        }
    }
}

//! The revalidating cache engine
//!
//! [`StaleWhileRevalidate::get_or_compute`] serves whatever is cached as
//! long as it is within the time-to-live, and refreshes stale values on a
//! detached task so the caller never waits for them. Only a miss (or an
//! expired entry) makes the caller wait for the producer.
//!
//! Callers coordinate through storage alone: a revalidation writes a
//! timestamp marker next to the value, and other callers skip their own
//! revalidation while that marker is younger than the cooldown. The marker
//! is read, compared and written without any atomicity, so two callers
//! racing within one storage round-trip can both revalidate.

use crate::cache::config::CacheConfig;
use crate::cache::entry::{age_since, parse_timestamp, timestamp_now, CachedLookup, EntryState};
use crate::cache::events::{CacheEvent, CacheEventKind, EventEmitter};
use crate::cache::types::CacheKey;
use crate::error::{CacheError, Result, StorageError};
use crate::storage::StorageKeys;
use anyhow::anyhow;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Stale-while-revalidate cache over an external key-value store
///
/// Cloning is cheap; clones share configuration and listeners.
pub struct StaleWhileRevalidate<V> {
    inner: Arc<Inner<V>>,
}

struct Inner<V> {
    config: CacheConfig<V>,
    events: EventEmitter<V>,
}

impl<V> Clone for StaleWhileRevalidate<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for StaleWhileRevalidate<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaleWhileRevalidate")
            .field("config", &self.inner.config)
            .field("events", &self.inner.events)
            .finish()
    }
}

impl<V> StaleWhileRevalidate<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with its own, initially empty, listener registry
    pub fn new(config: CacheConfig<V>) -> Self {
        info!("Initializing stale-while-revalidate cache: {:?}", config);
        Self {
            inner: Arc::new(Inner {
                config,
                events: EventEmitter::new(),
            }),
        }
    }

    /// Listener registry of this cache
    pub fn events(&self) -> &EventEmitter<V> {
        &self.inner.events
    }

    pub fn config(&self) -> &CacheConfig<V> {
        &self.inner.config
    }

    /// Return the cached value for `key`, or compute it with `producer`
    ///
    /// - fresh hit: returned, `producer` untouched
    /// - stale hit: returned at once; `producer` runs on a detached task
    ///   unless another revalidation started within the cooldown
    /// - miss or expired: `producer` runs now and its value is stored and
    ///   returned
    ///
    /// Storage failures never surface here. The only error is
    /// [`CacheError::Producer`], and only when the caller had to wait for
    /// the producer.
    pub async fn get_or_compute<K, F, Fut>(&self, key: K, producer: F) -> Result<V>
    where
        K: Into<CacheKey>,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let key = key.into().resolve();
        let producer_name = std::any::type_name::<F>();

        self.emit(CacheEventKind::Invoke, || CacheEvent::Invoke {
            key: key.clone(),
            producer: producer_name,
        });

        let keys = StorageKeys::new(&key);
        let lookup = self.read_entry(&key, &keys).await;

        if let Some(value) = lookup.value {
            debug!("Cache hit: {} ({}, age {:?})", key, lookup.state, lookup.age);
            self.emit(CacheEventKind::CacheHit, || CacheEvent::CacheHit {
                key: key.clone(),
                value: value.clone(),
            });

            if lookup.state == EntryState::Stale {
                self.emit(CacheEventKind::CacheStale, || CacheEvent::CacheStale {
                    key: key.clone(),
                    value: value.clone(),
                    age: lookup.age,
                });
                if self.cooldown_cleared(&key, lookup.revalidate_age) {
                    self.emit_revalidate(&key, producer_name);
                    self.spawn_refresh(key, keys, producer, producer_name);
                }
            }

            return Ok(value);
        }

        debug!("Cache miss: {}", key);
        self.emit(CacheEventKind::CacheMiss, || CacheEvent::CacheMiss {
            key: key.clone(),
            producer: producer_name,
        });

        self.emit_revalidate(&key, producer_name);
        self.refresh(&key, &keys, producer, producer_name).await
    }

    /// Read and classify `key` without producing anything
    ///
    /// Emits the read-path events (`cacheGetFailed`, `cacheExpired`) only.
    pub async fn lookup<K>(&self, key: K) -> CachedLookup<V>
    where
        K: Into<CacheKey>,
    {
        let key = key.into().resolve();
        let keys = StorageKeys::new(&key);
        self.read_entry(&key, &keys).await
    }

    /// Write `value` and a fresh timestamp for `key`
    pub async fn persist<K>(&self, key: K, value: &V) -> Result<()>
    where
        K: Into<CacheKey>,
    {
        let key = key.into().resolve();
        self.write_entry(&StorageKeys::new(&key), value).await
    }

    /// Delete the value, timestamp and marker stored for `key`
    ///
    /// Needs a backend configured through `removable_storage`.
    pub async fn invalidate<K>(&self, key: K) -> Result<()>
    where
        K: Into<CacheKey>,
    {
        let key = key.into().resolve();
        let storage = self.inner.config.storage();
        if !storage.supports_remove() {
            return Err(StorageError::Unsupported("remove").into());
        }

        let keys = StorageKeys::new(&key);
        let (value, write_time, marker) = tokio::join!(
            storage.remove(&keys.value),
            storage.remove(&keys.write_time),
            storage.remove(&keys.revalidate),
        );
        value?;
        write_time?;
        marker?;

        debug!("Invalidated cache entry: {}", key);
        Ok(())
    }

    /// Read the three storage keys concurrently and classify the entry
    async fn read_entry(&self, key: &str, keys: &StorageKeys) -> CachedLookup<V> {
        let config = &self.inner.config;
        let storage = config.storage();

        let (value, write_time, marker) = tokio::join!(
            storage.get(&keys.value),
            storage.get(&keys.write_time),
            storage.get(&keys.revalidate),
        );

        let mut failures = Vec::new();
        let raw_value = value.map_err(|e| failures.push(e)).ok().flatten();
        let raw_write_time = write_time.map_err(|e| failures.push(e)).ok().flatten();
        let raw_marker = marker.map_err(|e| failures.push(e)).ok().flatten();

        if !failures.is_empty() {
            for error in failures {
                warn!("Cache read failed for {}: {}", key, error);
                self.emit(CacheEventKind::CacheGetFailed, || CacheEvent::CacheGetFailed {
                    key: key.to_string(),
                    error: error.to_string(),
                });
            }
            return CachedLookup::missing();
        }

        let Some(raw_value) = raw_value else {
            return CachedLookup::missing();
        };

        let value = match config.deserialize(raw_value) {
            Ok(Some(value)) => value,
            Ok(None) => return CachedLookup::missing(),
            Err(error) => {
                let error = CacheError::Serialization(format!("{:#}", error));
                warn!("Cache read failed for {}: {}", key, error);
                self.emit(CacheEventKind::CacheGetFailed, || CacheEvent::CacheGetFailed {
                    key: key.to_string(),
                    error: error.to_string(),
                });
                return CachedLookup::missing();
            }
        };

        let now = Utc::now();
        let write_time = raw_write_time.as_deref().and_then(parse_timestamp);
        // A torn read can see the value without its timestamp
        let age = write_time.map_or(Duration::ZERO, |t| age_since(now, t));
        let revalidate_age = raw_marker
            .as_deref()
            .and_then(parse_timestamp)
            .map(|t| age_since(now, t));

        let state = EntryState::classify(
            age,
            config.min_time_to_stale(),
            config.max_time_to_live(),
        );

        if state == EntryState::Expired {
            debug!("Cache entry expired: {} (age {:?})", key, age);
            self.emit(CacheEventKind::CacheExpired, || CacheEvent::CacheExpired {
                key: key.to_string(),
                age,
                write_time,
                value,
                max_time_to_live: config.max_time_to_live(),
            });
            return CachedLookup {
                value: None,
                age,
                write_time,
                revalidate_age,
                state,
            };
        }

        CachedLookup {
            value: Some(value),
            age,
            write_time,
            revalidate_age,
            state,
        }
    }

    /// Whether a revalidation may start now, given the marker age read
    /// with the entry. Emits `revalidateTimeoutNotExceeded` when it may not.
    fn cooldown_cleared(&self, key: &str, revalidate_age: Option<Duration>) -> bool {
        let cooldown = self.inner.config.stale_revalidate_timeout();
        let Some(age) = revalidate_age else {
            return true;
        };
        if age > cooldown {
            return true;
        }

        debug!(
            "Revalidation of {} skipped, previous attempt {:?} ago (cooldown {:?})",
            key, age, cooldown
        );
        self.emit(CacheEventKind::RevalidateTimeoutNotExceeded, || {
            CacheEvent::RevalidateTimeoutNotExceeded {
                key: key.to_string(),
            }
        });
        false
    }

    fn emit_revalidate(&self, key: &str, producer_name: &'static str) {
        self.emit(CacheEventKind::Revalidate, || CacheEvent::Revalidate {
            key: key.to_string(),
            producer: producer_name,
        });
    }

    /// Refresh on a detached task; the caller already has its value
    fn spawn_refresh<F, Fut>(
        &self,
        key: String,
        keys: StorageKeys,
        producer: F,
        producer_name: &'static str,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let cache = self.clone();
        let task = tokio::spawn(async move {
            match cache.refresh(&key, &keys, producer, producer_name).await {
                Ok(_) => debug!("Background revalidation refreshed {}", key),
                // Already reported as revalidateFailed
                Err(error) => debug!("Background revalidation of {} failed: {}", key, error),
            }
        });
        // Detached: nobody awaits or cancels it
        drop(task);
    }

    /// Mark, produce, unmark, persist
    ///
    /// A panicking producer counts as a failed one, so the marker is
    /// removed on every outcome.
    async fn refresh<F, Fut>(
        &self,
        key: &str,
        keys: &StorageKeys,
        producer: F,
        producer_name: &'static str,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let config = &self.inner.config;
        let track_marker = config.tracks_revalidation();

        if track_marker {
            if let Err(error) = config.storage().set(&keys.revalidate, timestamp_now()).await {
                self.report_set_failure(key, &CacheError::from(error));
            }
        }

        let produced = AssertUnwindSafe(async move { producer().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(anyhow!("producer panicked: {}", panic_message(&*panic))));

        if track_marker {
            self.clear_marker(key, keys).await;
        }

        match produced {
            Ok(value) => {
                if let Err(error) = self.write_entry(keys, &value).await {
                    self.report_set_failure(key, &error);
                }
                Ok(value)
            }
            Err(error) => {
                warn!("Producer for {} failed: {:#}", key, error);
                self.emit(CacheEventKind::RevalidateFailed, || {
                    CacheEvent::RevalidateFailed {
                        key: key.to_string(),
                        producer: producer_name,
                        error: format!("{:#}", error),
                    }
                });
                Err(CacheError::Producer(error))
            }
        }
    }

    /// Remove this attempt's marker. Without remove support it ages out.
    async fn clear_marker(&self, key: &str, keys: &StorageKeys) {
        let storage = self.inner.config.storage();
        if !storage.supports_remove() {
            trace!("Leaving revalidation marker for {} to age out", key);
            return;
        }
        if let Err(error) = storage.remove(&keys.revalidate).await {
            self.report_set_failure(key, &CacheError::from(error));
        }
    }

    /// Serialize `value` and write it with a fresh timestamp, concurrently
    async fn write_entry(&self, keys: &StorageKeys, value: &V) -> Result<()> {
        let config = &self.inner.config;
        let raw = config
            .serialize(value)
            .map_err(|e| CacheError::Serialization(format!("{:#}", e)))?;

        let storage = config.storage();
        let (value_written, time_written) = tokio::join!(
            storage.set(&keys.value, raw),
            storage.set(&keys.write_time, timestamp_now()),
        );
        value_written?;
        time_written?;

        trace!("Persisted cache entry: {}", keys.value);
        Ok(())
    }

    fn report_set_failure(&self, key: &str, error: &CacheError) {
        warn!("Cache write failed for {}: {}", key, error);
        self.emit(CacheEventKind::CacheSetFailed, || CacheEvent::CacheSetFailed {
            key: key.to_string(),
            error: error.to_string(),
        });
    }

    fn emit<F>(&self, kind: CacheEventKind, build: F)
    where
        F: FnOnce() -> CacheEvent<V>,
    {
        self.inner.events.emit_with(kind, build);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn cache_with(
        storage: MemoryStorage,
        stale: Duration,
        ttl: Duration,
    ) -> StaleWhileRevalidate<String> {
        let config = CacheConfig::builder()
            .removable_storage(storage)
            .min_time_to_stale(stale)
            .max_time_to_live(ttl)
            .resolve()
            .unwrap();
        StaleWhileRevalidate::new(config)
    }

    fn record(cache: &StaleWhileRevalidate<String>) -> Arc<Mutex<Vec<CacheEventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cache
            .events()
            .on_any(move |event| sink.lock().unwrap().push(event.kind()));
        seen
    }

    #[tokio::test]
    async fn test_miss_computes_and_stores() {
        let storage = MemoryStorage::new();
        let cache = cache_with(storage.clone(), Duration::from_secs(60), Duration::from_secs(120));
        let seen = record(&cache);

        let value = cache
            .get_or_compute("k", || async { Ok("v1".to_string()) })
            .await
            .unwrap();

        assert_eq!(value, "v1");
        assert_eq!(storage.get("k").await.unwrap(), Some("v1".to_string()));
        assert!(storage.contains_key("k_time").await);
        // Marker is cleared once the producer finishes
        assert!(!storage.contains_key("k_revalidate").await);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                CacheEventKind::Invoke,
                CacheEventKind::CacheMiss,
                CacheEventKind::Revalidate
            ]
        );
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_producer() {
        let storage = MemoryStorage::new();
        let cache = cache_with(storage, Duration::from_secs(60), Duration::from_secs(120));
        cache.persist("k", &"cached".to_string()).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value = cache
            .get_or_compute("k", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("computed".to_string())
            })
            .await
            .unwrap();

        assert_eq!(value, "cached");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lookup_classifies_without_producing() {
        let storage = MemoryStorage::new();
        let cache = cache_with(storage.clone(), Duration::from_secs(60), Duration::from_secs(120));

        let lookup = cache.lookup("k").await;
        assert_eq!(lookup.state, EntryState::Missing);

        cache.persist("k", &"v".to_string()).await.unwrap();
        storage
            .set("k_revalidate", timestamp_now())
            .await
            .unwrap();

        let lookup = cache.lookup(CacheKey::deferred(|| "k")).await;
        assert_eq!(lookup.state, EntryState::Fresh);
        assert_eq!(lookup.value.as_deref(), Some("v"));
        assert!(lookup.write_time.is_some());
        assert!(lookup.revalidate_age.is_some());
    }

    #[tokio::test]
    async fn test_missing_write_time_reads_as_age_zero() {
        let storage = MemoryStorage::new();
        let cache = cache_with(storage.clone(), Duration::from_millis(10), Duration::from_secs(1));
        storage.set("k", "orphan".to_string()).await.unwrap();

        let lookup = cache.lookup("k").await;
        assert_eq!(lookup.state, EntryState::Fresh);
        assert_eq!(lookup.age, Duration::ZERO);
        assert!(lookup.write_time.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_keeps_marker_age() {
        let storage = MemoryStorage::new();
        let cache = cache_with(storage.clone(), Duration::from_millis(10), Duration::from_millis(50));
        let old = (Utc::now() - chrono::Duration::seconds(5)).timestamp_millis();
        storage.set("k", "old".to_string()).await.unwrap();
        storage.set("k_time", old.to_string()).await.unwrap();
        storage.set("k_revalidate", old.to_string()).await.unwrap();

        let lookup = cache.lookup("k").await;
        assert_eq!(lookup.state, EntryState::Expired);
        assert!(lookup.value.is_none());
        assert!(lookup.revalidate_age.unwrap() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_invalidate_removes_all_keys() {
        let storage = MemoryStorage::new();
        let cache = cache_with(storage.clone(), Duration::from_secs(1), Duration::from_secs(2));
        cache.persist("k", &"v".to_string()).await.unwrap();
        storage.set("k_revalidate", timestamp_now()).await.unwrap();

        cache.invalidate("k").await.unwrap();
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_needs_remove() {
        let config = CacheConfig::builder()
            .storage(MemoryStorage::new())
            .resolve()
            .unwrap();
        let cache = StaleWhileRevalidate::new(config);

        let err = cache.invalidate("k").await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Storage(StorageError::Unsupported("remove"))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_miss() {
        let storage = MemoryStorage::new();
        let config = CacheConfig::<Vec<u32>>::json_builder()
            .removable_storage(storage.clone())
            .resolve()
            .unwrap();
        let cache = StaleWhileRevalidate::new(config);
        storage.set("k", "{broken".to_string()).await.unwrap();

        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        cache.events().on(CacheEventKind::CacheGetFailed, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let value = cache
            .get_or_compute("k", || async { Ok(vec![1, 2, 3]) })
            .await
            .unwrap();

        assert_eq!(value, vec![1, 2, 3]);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(storage.get("k").await.unwrap(), Some("[1,2,3]".to_string()));
    }
}

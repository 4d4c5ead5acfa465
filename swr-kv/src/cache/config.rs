//! Configuration for the stale-while-revalidate cache
//!
//! Settings are collected by [`CacheConfigBuilder`] and checked once by
//! [`CacheConfigBuilder::resolve`], which either hands back an immutable
//! [`CacheConfig`] or fails with [`CacheError::Config`].

use crate::cache::codec::{
    identity_deserializer, identity_serializer, json_deserializer, json_serializer, DeserializeFn,
    SerializeFn,
};
use crate::error::{CacheError, Result};
use crate::storage::{RemovableStorage, Storage, StorageHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cooldown between two revalidations of the same key when none is configured
pub const DEFAULT_STALE_REVALIDATE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Upper bound for `max_time_to_live` (2^53 - 1 milliseconds)
pub const MAX_TIME_TO_LIVE: Duration = Duration::from_millis(9_007_199_254_740_991);

/// Environment variable overriding `min_time_to_stale`, in milliseconds
pub const ENV_MIN_TIME_TO_STALE: &str = "SWR_MIN_TIME_TO_STALE_MS";

/// Environment variable overriding `max_time_to_live`, in milliseconds
pub const ENV_MAX_TIME_TO_LIVE: &str = "SWR_MAX_TIME_TO_LIVE_MS";

/// Environment variable overriding `stale_revalidate_timeout`, in milliseconds
pub const ENV_STALE_REVALIDATE_TIMEOUT: &str = "SWR_STALE_REVALIDATE_TIMEOUT_MS";

/// Resolved cache configuration
///
/// Guarantees, once built:
/// - `min_time_to_stale < max_time_to_live <= MAX_TIME_TO_LIVE`
/// - a non-zero cooldown that was asked for explicitly has a removable backend
pub struct CacheConfig<V> {
    storage: StorageHandle,
    min_time_to_stale: Duration,
    max_time_to_live: Duration,
    stale_revalidate_timeout: Duration,
    serialize: SerializeFn<V>,
    deserialize: DeserializeFn<V>,
}

impl<V> Clone for CacheConfig<V> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            min_time_to_stale: self.min_time_to_stale,
            max_time_to_live: self.max_time_to_live,
            stale_revalidate_timeout: self.stale_revalidate_timeout,
            serialize: Arc::clone(&self.serialize),
            deserialize: Arc::clone(&self.deserialize),
        }
    }
}

impl<V> std::fmt::Debug for CacheConfig<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("storage", &self.storage)
            .field("min_time_to_stale", &self.min_time_to_stale)
            .field("max_time_to_live", &self.max_time_to_live)
            .field("stale_revalidate_timeout", &self.stale_revalidate_timeout)
            .finish_non_exhaustive()
    }
}

impl CacheConfig<String> {
    /// Builder for text values, stored as-is
    pub fn builder() -> CacheConfigBuilder<String> {
        CacheConfigBuilder::new()
            .serialize_with(identity_serializer())
            .deserialize_with(identity_deserializer())
    }
}

impl<V> CacheConfig<V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    /// Builder for serde values, stored as JSON
    pub fn json_builder() -> CacheConfigBuilder<V> {
        CacheConfigBuilder::new()
            .serialize_with(json_serializer())
            .deserialize_with(json_deserializer())
    }
}

impl<V> CacheConfig<V> {
    /// Age from which a cached value triggers background revalidation
    pub fn min_time_to_stale(&self) -> Duration {
        self.min_time_to_stale
    }

    /// Age beyond which a cached value is ignored
    pub fn max_time_to_live(&self) -> Duration {
        self.max_time_to_live
    }

    /// Cooldown between revalidation attempts for the same key
    pub fn stale_revalidate_timeout(&self) -> Duration {
        self.stale_revalidate_timeout
    }

    /// Whether revalidation markers are written at all
    pub fn tracks_revalidation(&self) -> bool {
        !self.stale_revalidate_timeout.is_zero()
    }

    /// Whether the backend can delete keys
    pub fn supports_remove(&self) -> bool {
        self.storage.supports_remove()
    }

    pub(crate) fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    pub(crate) fn serialize(&self, value: &V) -> anyhow::Result<String> {
        (self.serialize)(value)
    }

    pub(crate) fn deserialize(&self, raw: String) -> anyhow::Result<Option<V>> {
        (self.deserialize)(raw)
    }
}

/// Builder for cache configuration with validation
pub struct CacheConfigBuilder<V> {
    storage: Option<StorageHandle>,
    min_time_to_stale: Option<Duration>,
    max_time_to_live: Option<Duration>,
    stale_revalidate_timeout: Option<Duration>,
    serialize: Option<SerializeFn<V>>,
    deserialize: Option<DeserializeFn<V>>,
}

impl<V> Default for CacheConfigBuilder<V> {
    fn default() -> Self {
        Self {
            storage: None,
            min_time_to_stale: None,
            max_time_to_live: None,
            stale_revalidate_timeout: None,
            serialize: None,
            deserialize: None,
        }
    }
}

impl<V> CacheConfigBuilder<V> {
    /// Empty builder. Non-text values need both codec hooks before resolving.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a read/write backend. Revalidation markers are then never removed
    /// and simply age out after the cooldown.
    pub fn storage<S>(mut self, storage: S) -> Self
    where
        S: Storage + 'static,
    {
        self.storage = Some(StorageHandle::ReadWrite(Arc::new(storage)));
        self
    }

    /// Use a backend that can also delete keys
    pub fn removable_storage<S>(mut self, storage: S) -> Self
    where
        S: RemovableStorage + 'static,
    {
        self.storage = Some(StorageHandle::Removable(Arc::new(storage)));
        self
    }

    /// Set the age from which a hit triggers background revalidation
    pub fn min_time_to_stale(mut self, age: Duration) -> Self {
        self.min_time_to_stale = Some(age);
        self
    }

    /// Set the age beyond which a cached value is treated as missing
    pub fn max_time_to_live(mut self, age: Duration) -> Self {
        self.max_time_to_live = Some(age);
        self
    }

    /// Set the revalidation cooldown. Zero disables revalidation markers.
    pub fn stale_revalidate_timeout(mut self, timeout: Duration) -> Self {
        self.stale_revalidate_timeout = Some(timeout);
        self
    }

    /// Set the serializer hook
    pub fn serialize<F>(self, serialize: F) -> Self
    where
        F: Fn(&V) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.serialize_with(Arc::new(serialize))
    }

    /// Set the deserializer hook
    pub fn deserialize<F>(self, deserialize: F) -> Self
    where
        F: Fn(String) -> anyhow::Result<Option<V>> + Send + Sync + 'static,
    {
        self.deserialize_with(Arc::new(deserialize))
    }

    fn serialize_with(mut self, serialize: SerializeFn<V>) -> Self {
        self.serialize = Some(serialize);
        self
    }

    fn deserialize_with(mut self, deserialize: DeserializeFn<V>) -> Self {
        self.deserialize = Some(deserialize);
        self
    }

    /// Override thresholds from the environment (and a `.env` file if present)
    ///
    /// Reads [`ENV_MIN_TIME_TO_STALE`], [`ENV_MAX_TIME_TO_LIVE`] and
    /// [`ENV_STALE_REVALIDATE_TIMEOUT`]; unset variables leave the builder as is.
    pub fn from_env(mut self) -> Result<Self> {
        dotenv::dotenv().ok();

        if let Some(age) = env_millis(ENV_MIN_TIME_TO_STALE)? {
            self.min_time_to_stale = Some(age);
        }
        if let Some(age) = env_millis(ENV_MAX_TIME_TO_LIVE)? {
            self.max_time_to_live = Some(age);
        }
        if let Some(timeout) = env_millis(ENV_STALE_REVALIDATE_TIMEOUT)? {
            self.stale_revalidate_timeout = Some(timeout);
        }

        Ok(self)
    }

    /// Validate the settings and produce the canonical configuration
    pub fn resolve(self) -> Result<CacheConfig<V>> {
        let storage = self
            .storage
            .ok_or_else(|| CacheError::config("storage required"))?;

        let min_time_to_stale = self.min_time_to_stale.unwrap_or(Duration::ZERO);
        let max_time_to_live = self
            .max_time_to_live
            .unwrap_or(MAX_TIME_TO_LIVE)
            .min(MAX_TIME_TO_LIVE);

        let (serialize, deserialize) = match (self.serialize, self.deserialize) {
            (Some(serialize), Some(deserialize)) => (serialize, deserialize),
            _ => {
                return Err(CacheError::config(
                    "serialize and deserialize required for non-text values",
                ))
            }
        };

        if min_time_to_stale >= max_time_to_live {
            return Err(CacheError::config(
                "minTimeToStale must be less than maxTimeToLive",
            ));
        }

        let stale_revalidate_timeout = match self.stale_revalidate_timeout {
            Some(timeout) if !timeout.is_zero() && !storage.supports_remove() => {
                return Err(CacheError::config(
                    "remove required for staleRevalidateTimeout",
                ));
            }
            Some(timeout) => timeout,
            None => DEFAULT_STALE_REVALIDATE_TIMEOUT,
        };

        let config = CacheConfig {
            storage,
            min_time_to_stale,
            max_time_to_live,
            stale_revalidate_timeout,
            serialize,
            deserialize,
        };

        debug!("Resolved cache config: {:?}", config);
        Ok(config)
    }
}

fn env_millis(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| {
                CacheError::config(format!(
                    "{} must be a non-negative number of milliseconds: {}",
                    name, e
                ))
            }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(CacheError::config(format!("{}: {}", name, e))),
    }
}

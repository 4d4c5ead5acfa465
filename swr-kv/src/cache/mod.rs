//! # Stale-While-Revalidate Caching Layer
//!
//! Serves cached values immediately and refreshes them in the background.
//!
//! ## Features
//!
//! - **Stale serving**: values past the staleness threshold are still returned,
//!   and a background task recomputes them
//! - **Hard expiry**: values past the time-to-live are treated as missing
//! - **Revalidation cooldown**: a timestamp marker in storage throttles
//!   concurrent revalidations of the same key, across processes
//! - **Failure containment**: storage failures degrade to misses and are
//!   reported as events; only producer failures reach a waiting caller
//! - **Per-cache events**: every lifecycle step is observable through the
//!   cache's own listener registry
//!
//! ## Example
//!
//! ```rust
//! use swr_kv::cache::{CacheConfig, CacheEventKind, StaleWhileRevalidate};
//! use swr_kv::MemoryStorage;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .removable_storage(MemoryStorage::new())
//!     .min_time_to_stale(Duration::from_secs(60))
//!     .max_time_to_live(Duration::from_secs(3600))
//!     .resolve()?;
//!
//! let cache = StaleWhileRevalidate::new(config);
//! cache.events().on(CacheEventKind::CacheStale, |event| {
//!     println!("refreshing {}", event.key());
//! });
//!
//! let greeting = cache
//!     .get_or_compute("greeting", || async { Ok("hello".to_string()) })
//!     .await?;
//! assert_eq!(greeting, "hello");
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod entry;
pub mod events;
pub mod types;

pub use codec::{DeserializeFn, SerializeFn};
pub use config::{
    CacheConfig, CacheConfigBuilder, DEFAULT_STALE_REVALIDATE_TIMEOUT, MAX_TIME_TO_LIVE,
};
pub use engine::StaleWhileRevalidate;
pub use entry::{CachedLookup, EntryState};
pub use events::{log_events, CacheEvent, CacheEventKind, EventEmitter, ListenerId};
pub use types::{CacheKey, CacheStats, StatsCollector};

//! # swr-kv
//!
//! A stale-while-revalidate cache on top of any key-value store.
//!
//! ## Features
//!
//! - Async-first design using tokio
//! - Bring-your-own storage through the [`Storage`] / [`RemovableStorage`] traits
//! - Stale values served instantly, refreshed on detached tasks
//! - Cross-process revalidation throttling through storage-resident markers
//! - Storage failures contained and reported as events, never as errors
//! - Pluggable serialization (text as-is, or JSON via serde)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use swr_kv::{CacheConfig, MemoryStorage, StaleWhileRevalidate};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CacheConfig::builder()
//!         .removable_storage(MemoryStorage::new())
//!         .min_time_to_stale(Duration::from_secs(30))
//!         .max_time_to_live(Duration::from_secs(600))
//!         .stale_revalidate_timeout(Duration::from_secs(5))
//!         .resolve()?;
//!
//!     let cache = StaleWhileRevalidate::new(config);
//!
//!     let rates = cache
//!         .get_or_compute("rates:eur", || async {
//!             // Slow upstream call
//!             Ok("1.08".to_string())
//!         })
//!         .await?;
//!     println!("EUR rate: {}", rates);
//!     Ok(())
//! }
//! ```
//!
//! ## Typed Values
//!
//! Any serde value can be cached as JSON:
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use swr_kv::{CacheConfig, MemoryStorage, StaleWhileRevalidate};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Profile {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CacheConfig::<Profile>::json_builder()
//!         .removable_storage(MemoryStorage::new())
//!         .resolve()?;
//!     let cache = StaleWhileRevalidate::new(config);
//!
//!     let profile = cache
//!         .get_or_compute("profile:7", || async {
//!             Ok(Profile { name: "ada".to_string() })
//!         })
//!         .await?;
//!     println!("{}", profile.name);
//!     Ok(())
//! }
//! ```
//!
//! ## Observability
//!
//! Each cache owns an [`EventEmitter`]. Attach [`log_events`] for `tracing`
//! output or [`StatsCollector`] for counters:
//!
//! ```no_run
//! use swr_kv::{log_events, CacheConfig, MemoryStorage, StaleWhileRevalidate, StatsCollector};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .removable_storage(MemoryStorage::new())
//!     .resolve()?;
//! let cache = StaleWhileRevalidate::new(config);
//!
//! log_events(cache.events());
//! let (stats, _listener) = StatsCollector::attach(cache.events());
//! println!("{}", stats.snapshot());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod storage;

// Re-export main types for convenience
pub use cache::{
    log_events, CacheConfig, CacheConfigBuilder, CacheEvent, CacheEventKind, CacheKey,
    CacheStats, CachedLookup, EntryState, EventEmitter, ListenerId, StaleWhileRevalidate,
    StatsCollector,
};
pub use error::{CacheError, Result, StorageError, StorageResult};
pub use storage::{MemoryStorage, RemovableStorage, Storage, StorageKeys};

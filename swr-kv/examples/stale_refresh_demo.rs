//! Stale-While-Revalidate Demo Application
//!
//! Walks one key through miss, fresh hit, stale hit with background refresh,
//! and expiry, logging every cache event.
//!
//! Usage:
//!   cargo run --example stale_refresh_demo
//!
//! Environment variables (all optional, milliseconds):
//!   SWR_MIN_TIME_TO_STALE_MS        - staleness threshold (default: 200)
//!   SWR_MAX_TIME_TO_LIVE_MS         - time-to-live (default: 1000)
//!   SWR_STALE_REVALIDATE_TIMEOUT_MS - revalidation cooldown (default: 10000)

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swr_kv::{log_events, CacheConfig, MemoryStorage, StaleWhileRevalidate, StatsCollector};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::DEBUG.into()))
        .init();

    info!("=== Stale-While-Revalidate Demo ===");

    let config = CacheConfig::builder()
        .removable_storage(MemoryStorage::new())
        .min_time_to_stale(Duration::from_millis(200))
        .max_time_to_live(Duration::from_millis(1000))
        .from_env()?
        .resolve()?;

    let cache = StaleWhileRevalidate::new(config);
    log_events(cache.events());
    let (stats, _listener) = StatsCollector::attach(cache.events());

    let version = Arc::new(AtomicU32::new(0));
    let fetch = || {
        let version = Arc::clone(&version);
        move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let v = version.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("report v{}", v))
        }
    };

    info!("\n--- Cold cache: caller waits for the producer ---");
    info!("got {}", cache.get_or_compute("report", fetch()).await?);

    info!("\n--- Fresh hit: producer not called ---");
    info!("got {}", cache.get_or_compute("report", fetch()).await?);

    info!("\n--- Stale hit: old value now, refresh in the background ---");
    tokio::time::sleep(Duration::from_millis(300)).await;
    info!("got {}", cache.get_or_compute("report", fetch()).await?);
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("got {}", cache.get_or_compute("report", fetch()).await?);

    info!("\n--- Expired: treated as a miss ---");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    info!("got {}", cache.get_or_compute("report", fetch()).await?);

    info!("\n{}", stats.snapshot());
    Ok(())
}

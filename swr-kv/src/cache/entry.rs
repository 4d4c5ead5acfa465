//! Cache entry classification
//!
//! A cache entry is never stored as one record. It is reassembled on every
//! request from the value key, its write timestamp and the revalidation
//! marker, then classified by age.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a cached value relates to the configured thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Nothing usable in storage (absent, unreadable or undecodable)
    Missing,

    /// Younger than the staleness threshold
    Fresh,

    /// Past the staleness threshold but within the time-to-live
    Stale,

    /// Past the time-to-live, served as a miss
    Expired,
}

impl EntryState {
    /// Classify an entry of the given age
    ///
    /// The staleness boundary is inclusive, the time-to-live boundary is not.
    pub fn classify(age: Duration, min_time_to_stale: Duration, max_time_to_live: Duration) -> Self {
        if age > max_time_to_live {
            EntryState::Expired
        } else if age >= min_time_to_stale {
            EntryState::Stale
        } else {
            EntryState::Fresh
        }
    }

    /// Whether a value in this state is returned to the caller
    pub fn is_servable(&self) -> bool {
        matches!(self, EntryState::Fresh | EntryState::Stale)
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryState::Missing => write!(f, "missing"),
            EntryState::Fresh => write!(f, "fresh"),
            EntryState::Stale => write!(f, "stale"),
            EntryState::Expired => write!(f, "expired"),
        }
    }
}

/// Per-request view of one logical key
#[derive(Debug, Clone)]
pub struct CachedLookup<V> {
    /// The servable value; `None` for missing and expired entries
    pub value: Option<V>,

    /// Time since the last write, zero when unknown
    pub age: Duration,

    /// When the value was last written, if a timestamp was stored
    pub write_time: Option<DateTime<Utc>>,

    /// Age of the in-flight revalidation marker, `None` without a marker
    pub revalidate_age: Option<Duration>,

    /// Classification of the entry
    pub state: EntryState,
}

impl<V> CachedLookup<V> {
    /// Lookup for a key with nothing usable in storage
    pub fn missing() -> Self {
        Self {
            value: None,
            age: Duration::ZERO,
            write_time: None,
            revalidate_age: None,
            state: EntryState::Missing,
        }
    }
}

/// Current time in the millisecond format written to storage
pub(crate) fn timestamp_now() -> String {
    Utc::now().timestamp_millis().to_string()
}

/// Parse a stored millisecond timestamp. Unparsable text reads as absent.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

/// Elapsed time since `then`. Timestamps from the future count as zero.
pub(crate) fn age_since(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

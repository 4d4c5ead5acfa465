//! Lifecycle events and the per-cache listener registry
//!
//! Every cache owns its own [`EventEmitter`]; there is no global emitter.
//! Listeners run synchronously, in registration order, on the task that
//! produced the event. A panicking listener is caught and logged so it can
//! never disturb the cache.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheEventKind {
    Invoke,
    CacheHit,
    CacheMiss,
    CacheStale,
    CacheExpired,
    CacheGetFailed,
    CacheSetFailed,
    Revalidate,
    RevalidateFailed,
    RevalidateTimeoutNotExceeded,
}

impl CacheEventKind {
    pub const ALL: [CacheEventKind; 10] = [
        CacheEventKind::Invoke,
        CacheEventKind::CacheHit,
        CacheEventKind::CacheMiss,
        CacheEventKind::CacheStale,
        CacheEventKind::CacheExpired,
        CacheEventKind::CacheGetFailed,
        CacheEventKind::CacheSetFailed,
        CacheEventKind::Revalidate,
        CacheEventKind::RevalidateFailed,
        CacheEventKind::RevalidateTimeoutNotExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEventKind::Invoke => "invoke",
            CacheEventKind::CacheHit => "cacheHit",
            CacheEventKind::CacheMiss => "cacheMiss",
            CacheEventKind::CacheStale => "cacheStale",
            CacheEventKind::CacheExpired => "cacheExpired",
            CacheEventKind::CacheGetFailed => "cacheGetFailed",
            CacheEventKind::CacheSetFailed => "cacheSetFailed",
            CacheEventKind::Revalidate => "revalidate",
            CacheEventKind::RevalidateFailed => "revalidateFailed",
            CacheEventKind::RevalidateTimeoutNotExceeded => "revalidateTimeoutNotExceeded",
        }
    }
}

impl std::fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cache lifecycle event with its payload
///
/// `producer` fields carry the type name of the producer closure, which is
/// enough to tell call sites apart in logs.
#[derive(Debug, Clone)]
pub enum CacheEvent<V> {
    /// Every call to `get_or_compute`
    Invoke { key: String, producer: &'static str },

    /// A fresh or stale value was found
    CacheHit { key: String, value: V },

    /// No usable value was found
    CacheMiss { key: String, producer: &'static str },

    /// The value found is past the staleness threshold
    CacheStale { key: String, value: V, age: Duration },

    /// The value found is past the time-to-live and will not be served
    CacheExpired {
        key: String,
        age: Duration,
        write_time: Option<DateTime<Utc>>,
        value: V,
        max_time_to_live: Duration,
    },

    /// A storage read or decode failed
    CacheGetFailed { key: String, error: String },

    /// A storage write, remove or encode failed
    CacheSetFailed { key: String, error: String },

    /// Revalidation cleared the cooldown and is running the producer
    Revalidate { key: String, producer: &'static str },

    /// The producer failed during revalidation
    RevalidateFailed {
        key: String,
        producer: &'static str,
        error: String,
    },

    /// A revalidation for this key started within the cooldown window
    RevalidateTimeoutNotExceeded { key: String },
}

impl<V> CacheEvent<V> {
    pub fn kind(&self) -> CacheEventKind {
        match self {
            CacheEvent::Invoke { .. } => CacheEventKind::Invoke,
            CacheEvent::CacheHit { .. } => CacheEventKind::CacheHit,
            CacheEvent::CacheMiss { .. } => CacheEventKind::CacheMiss,
            CacheEvent::CacheStale { .. } => CacheEventKind::CacheStale,
            CacheEvent::CacheExpired { .. } => CacheEventKind::CacheExpired,
            CacheEvent::CacheGetFailed { .. } => CacheEventKind::CacheGetFailed,
            CacheEvent::CacheSetFailed { .. } => CacheEventKind::CacheSetFailed,
            CacheEvent::Revalidate { .. } => CacheEventKind::Revalidate,
            CacheEvent::RevalidateFailed { .. } => CacheEventKind::RevalidateFailed,
            CacheEvent::RevalidateTimeoutNotExceeded { .. } => {
                CacheEventKind::RevalidateTimeoutNotExceeded
            }
        }
    }

    /// The cache key the event refers to
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Invoke { key, .. }
            | CacheEvent::CacheHit { key, .. }
            | CacheEvent::CacheMiss { key, .. }
            | CacheEvent::CacheStale { key, .. }
            | CacheEvent::CacheExpired { key, .. }
            | CacheEvent::CacheGetFailed { key, .. }
            | CacheEvent::CacheSetFailed { key, .. }
            | CacheEvent::Revalidate { key, .. }
            | CacheEvent::RevalidateFailed { key, .. }
            | CacheEvent::RevalidateTimeoutNotExceeded { key } => key,
        }
    }
}

/// Handle returned when registering a listener, used to unregister it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler<V> = Arc<dyn Fn(&CacheEvent<V>) + Send + Sync>;

struct Listener<V> {
    id: ListenerId,
    /// `None` listens to every event
    kind: Option<CacheEventKind>,
    once: bool,
    handler: Handler<V>,
}

impl<V> Listener<V> {
    fn matches(&self, kind: CacheEventKind) -> bool {
        self.kind.map_or(true, |k| k == kind)
    }
}

/// Listener registry owned by one cache instance
///
/// Clones share the same registry.
pub struct EventEmitter<V> {
    listeners: Arc<RwLock<Vec<Listener<V>>>>,
    next_id: Arc<AtomicU64>,
}

impl<V> Clone for EventEmitter<V> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<V> Default for EventEmitter<V> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl<V> std::fmt::Debug for EventEmitter<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.read().len())
            .finish()
    }
}

impl<V> EventEmitter<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every event of the given kind
    pub fn on<F>(&self, kind: CacheEventKind, handler: F) -> ListenerId
    where
        F: Fn(&CacheEvent<V>) + Send + Sync + 'static,
    {
        self.register(Some(kind), false, Arc::new(handler))
    }

    /// Call `handler` for the next event of the given kind only
    pub fn once<F>(&self, kind: CacheEventKind, handler: F) -> ListenerId
    where
        F: Fn(&CacheEvent<V>) + Send + Sync + 'static,
    {
        self.register(Some(kind), true, Arc::new(handler))
    }

    /// Call `handler` for every event
    pub fn on_any<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&CacheEvent<V>) + Send + Sync + 'static,
    {
        self.register(None, false, Arc::new(handler))
    }

    /// Unregister a listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Unregister every listener of `kind`, or every listener at all
    pub fn remove_all_listeners(&self, kind: Option<CacheEventKind>) {
        let mut listeners = self.write();
        match kind {
            Some(kind) => listeners.retain(|l| l.kind != Some(kind)),
            None => listeners.clear(),
        }
    }

    /// Number of listeners that would receive an event of `kind`
    pub fn listener_count(&self, kind: CacheEventKind) -> usize {
        self.read().iter().filter(|l| l.matches(kind)).count()
    }

    /// Whether anyone listens to `kind`
    pub fn has_listeners(&self, kind: CacheEventKind) -> bool {
        self.read().iter().any(|l| l.matches(kind))
    }

    /// Deliver `event` to every matching listener
    pub fn emit(&self, event: CacheEvent<V>) {
        let kind = event.kind();
        // One write section, so a `once` listener fires for one emit only
        let handlers: Vec<Handler<V>> = {
            let mut listeners = self.write();
            let handlers = listeners
                .iter()
                .filter(|l| l.matches(kind))
                .map(|l| Arc::clone(&l.handler))
                .collect();
            listeners.retain(|l| !(l.once && l.matches(kind)));
            handlers
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!("Listener for {} on key {} panicked", kind, event.key());
            }
        }
    }

    /// Build and deliver an event only if someone listens to `kind`
    pub(crate) fn emit_with<F>(&self, kind: CacheEventKind, build: F)
    where
        F: FnOnce() -> CacheEvent<V>,
    {
        if self.has_listeners(kind) {
            self.emit(build());
        }
    }

    fn register(&self, kind: Option<CacheEventKind>, once: bool, handler: Handler<V>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().push(Listener {
            id,
            kind,
            once,
            handler,
        });
        debug!(
            "Registered listener {:?} for {}",
            id,
            kind.map_or("all events", |k| k.as_str())
        );
        id
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Listener<V>>> {
        self.listeners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Listener<V>>> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Log every event of `emitter` through `tracing`
///
/// Misses, expiries and throttled revalidations log at debug level;
/// storage and producer failures log at warn level.
pub fn log_events<V>(emitter: &EventEmitter<V>) -> ListenerId
where
    V: 'static,
{
    emitter.on_any(|event: &CacheEvent<V>| match event {
        CacheEvent::CacheGetFailed { key, error } | CacheEvent::CacheSetFailed { key, error } => {
            warn!("{} for {}: {}", event.kind(), key, error)
        }
        CacheEvent::RevalidateFailed {
            key,
            producer,
            error,
        } => warn!("revalidateFailed for {} ({}): {}", key, producer, error),
        CacheEvent::CacheStale { key, age, .. } => debug!("cacheStale for {} (age {:?})", key, age),
        CacheEvent::CacheExpired {
            key,
            age,
            max_time_to_live,
            ..
        } => debug!(
            "cacheExpired for {} (age {:?} > {:?})",
            key, age, max_time_to_live
        ),
        other => debug!("{} for {}", other.kind(), other.key()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(emitter: &EventEmitter<String>) -> Arc<Mutex<Vec<CacheEventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        emitter.on_any(move |event| sink.lock().unwrap().push(event.kind()));
        seen
    }

    fn hit(key: &str) -> CacheEvent<String> {
        CacheEvent::CacheHit {
            key: key.to_string(),
            value: "v".to_string(),
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(CacheEventKind::CacheHit.to_string(), "cacheHit");
        assert_eq!(
            CacheEventKind::RevalidateTimeoutNotExceeded.as_str(),
            "revalidateTimeoutNotExceeded"
        );
        assert_eq!(
            serde_json::to_string(&CacheEventKind::CacheGetFailed).unwrap(),
            "\"cacheGetFailed\""
        );
        assert_eq!(CacheEventKind::ALL.len(), 10);
    }

    #[test]
    fn test_event_accessors() {
        let event = hit("k1");
        assert_eq!(event.kind(), CacheEventKind::CacheHit);
        assert_eq!(event.key(), "k1");

        let event: CacheEvent<String> = CacheEvent::RevalidateTimeoutNotExceeded {
            key: "k2".to_string(),
        };
        assert_eq!(event.key(), "k2");
    }

    #[test]
    fn test_listeners_filter_by_kind() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        emitter.on(CacheEventKind::CacheHit, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let all = recorder(&emitter);

        emitter.emit(hit("k"));
        emitter.emit(CacheEvent::CacheMiss {
            key: "k".to_string(),
            producer: "test",
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            *all.lock().unwrap(),
            vec![CacheEventKind::CacheHit, CacheEventKind::CacheMiss]
        );
        assert_eq!(emitter.listener_count(CacheEventKind::CacheHit), 2);
        assert_eq!(emitter.listener_count(CacheEventKind::CacheMiss), 1);
    }

    #[test]
    fn test_once_and_off() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = Arc::clone(&count);
        emitter.once(CacheEventKind::CacheHit, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(hit("a"));
        emitter.emit(hit("b"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!emitter.has_listeners(CacheEventKind::CacheHit));

        let c = Arc::clone(&count);
        let id = emitter.on(CacheEventKind::CacheHit, move |_| {
            c.fetch_add(10, Ordering::SeqCst);
        });
        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        emitter.emit(hit("c"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_fires_once_under_concurrent_emits() {
        let emitter: EventEmitter<String> = EventEmitter::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        emitter.once(CacheEventKind::CacheHit, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let barrier = Arc::new(std::sync::Barrier::new(8));
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let emitter = emitter.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    emitter.emit(hit(&format!("k{}", i)));
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!emitter.has_listeners(CacheEventKind::CacheHit));
    }

    #[test]
    fn test_remove_all_listeners() {
        let emitter: EventEmitter<String> = EventEmitter::new();
        emitter.on(CacheEventKind::CacheHit, |_| {});
        emitter.on(CacheEventKind::CacheMiss, |_| {});
        emitter.on_any(|_| {});

        emitter.remove_all_listeners(Some(CacheEventKind::CacheHit));
        assert_eq!(emitter.listener_count(CacheEventKind::CacheHit), 1);

        emitter.remove_all_listeners(None);
        assert!(!emitter.has_listeners(CacheEventKind::CacheMiss));
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let emitter = EventEmitter::new();
        emitter.on(CacheEventKind::CacheHit, |_| panic!("listener bug"));
        let seen = recorder(&emitter);

        emitter.emit(hit("k"));

        // Later listeners still run
        assert_eq!(*seen.lock().unwrap(), vec![CacheEventKind::CacheHit]);
    }

    #[test]
    fn test_emit_with_skips_unobserved_events() {
        let emitter: EventEmitter<String> = EventEmitter::new();
        let mut built = false;
        emitter.emit_with(CacheEventKind::CacheHit, || {
            built = true;
            hit("k")
        });
        assert!(!built);

        let seen = recorder(&emitter);
        emitter.emit_with(CacheEventKind::CacheHit, || hit("k"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_log_events_registers_catch_all() {
        let emitter: EventEmitter<String> = EventEmitter::new();
        log_events(&emitter);
        for kind in CacheEventKind::ALL {
            assert!(emitter.has_listeners(kind));
        }
        emitter.emit(CacheEvent::CacheSetFailed {
            key: "k".to_string(),
            error: "disk full".to_string(),
        });
    }
}

//! Versioned snapshot store
//!
//! Observable repository over a [`KeyValueBackend`]: owns the cached snapshot
//! and the listener list. Reads are memoized against the raw serialized
//! string, so repeated loads without an intervening change hand back the same
//! `Arc` (consumers can use `Arc::ptr_eq` for change detection).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, warn};

use super::backend::{KeyValueBackend, StorageEvents};

/// Legacy data converted into the current snapshot shape
pub struct LegacyMigration<S> {
    pub snapshot: S,
    /// Key to delete once the migrated snapshot is written
    pub legacy_key: String,
}

/// A persisted document type
pub trait Snapshot: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    /// Primary storage key
    const KEY: &'static str;

    /// Called once when the primary key is absent
    fn migrate_legacy(_backend: &dyn KeyValueBackend) -> Option<LegacyMigration<Self>> {
        None
    }

    /// Repair invariants after parsing
    fn normalize(&mut self) {}
}

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Handle returned by [`PersistenceStore::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    listeners: Weak<Mutex<Listeners>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut listeners = listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

struct CachedSnapshot<S> {
    /// Backend string this value was parsed from (or shadows, after a failed write)
    raw: Option<String>,
    value: Arc<S>,
}

pub struct PersistenceStore<S: Snapshot> {
    backend: Arc<dyn KeyValueBackend>,
    cache: Mutex<Option<CachedSnapshot<S>>>,
    listeners: Arc<Mutex<Listeners>>,
    events: Mutex<StorageEvents>,
    migration_checked: AtomicBool,
}

impl<S: Snapshot> PersistenceStore<S> {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        let events = backend.events();
        Self {
            backend,
            cache: Mutex::new(None),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            events: Mutex::new(events),
            migration_checked: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueBackend> {
        &self.backend
    }

    /// Current snapshot. Never fails: missing or corrupt data yields the default.
    pub fn load(&self) -> Arc<S> {
        self.ensure_migrated();

        let raw = self.read_raw();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.as_ref() {
            if cached.raw == raw {
                return Arc::clone(&cached.value);
            }
        }

        let value = Arc::new(Self::parse(raw.as_deref()));
        *cache = Some(CachedSnapshot {
            raw,
            value: Arc::clone(&value),
        });
        value
    }

    /// Write the snapshot. On failure the snapshot stays visible to `load()`
    /// in memory until the next successful write or external change.
    pub fn save(&self, snapshot: &S) -> bool {
        let raw = match serde_json::to_string(snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to serialize snapshot '{}': {}", S::KEY, e);
                return false;
            }
        };

        let saved = match self.backend.set(S::KEY, &raw) {
            Ok(()) => {
                self.invalidate();
                true
            }
            Err(e) => {
                warn!(kind = %e.kind(), "Failed to persist '{}': {}", S::KEY, e);
                let current = self.read_raw();
                *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedSnapshot {
                    raw: current,
                    value: Arc::new(snapshot.clone()),
                });
                false
            }
        };

        self.notify();
        saved
    }

    /// Read-modify-write in one synchronous call
    pub fn update<F: FnOnce(&mut S)>(&self, f: F) -> bool {
        let mut next = (*self.load()).clone();
        f(&mut next);
        self.save(&next)
    }

    /// Like [`update`](Self::update) but the closure may decline by returning
    /// `None`, in which case nothing is written
    pub fn mutate<R, F: FnOnce(&mut S) -> Option<R>>(&self, f: F) -> Option<R> {
        let mut next = (*self.load()).clone();
        let result = f(&mut next)?;
        self.save(&next);
        Some(result)
    }

    /// Register a change listener
    pub fn subscribe<F: Fn() + Send + Sync + 'static>(&self, listener: F) -> Subscription {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push((id, Arc::new(listener)));
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    /// Apply pending changes made through other backend handles. Returns true
    /// if this store's key was touched.
    pub fn sync_external(&self) -> bool {
        let mut changed = false;
        {
            let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            while let Some(change) = events.try_next() {
                if change.affects(S::KEY) {
                    changed = true;
                }
            }
        }

        if changed {
            debug!("External change to '{}' observed", S::KEY);
            self.invalidate();
            self.notify();
        }
        changed
    }

    /// Observe external changes until every backend handle is gone
    pub async fn watch_external(self: Arc<Self>) {
        let mut events = self.backend.events();
        while let Some(change) = events.next().await {
            if change.affects(S::KEY) {
                debug!("External change to '{}' observed", S::KEY);
                self.invalidate();
                self.notify();
            }
        }
    }

    fn read_raw(&self) -> Option<String> {
        match self.backend.get(S::KEY) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(kind = %e.kind(), "Failed to read '{}': {}", S::KEY, e);
                None
            }
        }
    }

    fn parse(raw: Option<&str>) -> S {
        let mut snapshot = match raw {
            None => S::default(),
            Some(text) => serde_json::from_str(text).unwrap_or_else(|e| {
                warn!("Corrupt snapshot under '{}', using defaults: {}", S::KEY, e);
                S::default()
            }),
        };
        snapshot.normalize();
        snapshot
    }

    fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener();
        }
    }

    fn ensure_migrated(&self) {
        if self.migration_checked.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.backend.get(S::KEY) {
            Ok(None) => {}
            _ => return,
        }

        let Some(migration) = S::migrate_legacy(self.backend.as_ref()) else {
            return;
        };

        let raw = match serde_json::to_string(&migration.snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to serialize migrated snapshot: {}", e);
                return;
            }
        };

        match self.backend.set(S::KEY, &raw) {
            Ok(()) => {
                if let Err(e) = self.backend.remove(&migration.legacy_key) {
                    warn!("Failed to remove legacy key '{}': {}", migration.legacy_key, e);
                }
                info!("Migrated legacy '{}' into '{}'", migration.legacy_key, S::KEY);
            }
            Err(e) => {
                warn!(kind = %e.kind(), "Failed to persist migrated snapshot: {}", e);
                // Serve the migrated data from memory; the legacy key stays put
                let current = self.read_raw();
                *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedSnapshot {
                    raw: current,
                    value: Arc::new(migration.snapshot),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::backend::MemoryBackend;
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Counter {
        version: u32,
        count: i64,
        label: String,
    }

    impl Default for Counter {
        fn default() -> Self {
            Self {
                version: 1,
                count: 0,
                label: "default".to_string(),
            }
        }
    }

    impl Snapshot for Counter {
        const KEY: &'static str = "counter";

        fn migrate_legacy(backend: &dyn KeyValueBackend) -> Option<LegacyMigration<Self>> {
            let raw = backend.get("old-counter").ok()??;
            let count: i64 = raw.trim().parse().ok()?;
            if count == 0 {
                return None;
            }
            Some(LegacyMigration {
                snapshot: Counter {
                    count,
                    ..Counter::default()
                },
                legacy_key: "old-counter".to_string(),
            })
        }
    }

    fn store(backend: &MemoryBackend) -> PersistenceStore<Counter> {
        PersistenceStore::new(Arc::new(backend.clone()))
    }

    #[test]
    fn test_load_is_memoized() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let a = store.load();
        let b = store.load();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(store.update(|c| c.count = 5));
        let c = store.load();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.count, 5);
    }

    #[test]
    fn test_missing_fields_are_defaulted() {
        let backend = MemoryBackend::new();
        backend.set("counter", r#"{"count":3}"#).unwrap();
        let store = store(&backend);
        let snapshot = store.load();
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.label, "default");
        assert_eq!(snapshot.version, 1);
    }

    #[test]
    fn test_corrupt_json_falls_back_to_default() {
        let backend = MemoryBackend::new();
        backend.set("counter", "{not json").unwrap();
        let store = store(&backend);
        assert_eq!(*store.load(), Counter::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let snapshot = Counter {
            version: 1,
            count: 42,
            label: "x".to_string(),
        };
        assert!(store.save(&snapshot));
        let loaded = store.load();
        assert_eq!(*loaded, snapshot);
        assert!(store.save(&loaded));
        assert_eq!(*store.load(), snapshot);
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = store.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.update(|c| c.count += 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        store.update(|c| c.count += 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_write_keeps_in_memory_state() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        assert!(store.update(|c| c.count = 1));

        backend.set_read_only(true);
        assert!(!store.update(|c| c.count = 2));
        assert_eq!(store.load().count, 2);
        assert_eq!(backend.get("counter").unwrap().as_deref(), Some(r#"{"version":1,"count":1,"label":"default"}"#));
    }

    #[test]
    fn test_cross_tab_change_invalidates_cache() {
        let tab_a = MemoryBackend::new();
        let tab_b = tab_a.tab();
        let store_a = store(&tab_a);
        let store_b = store(&tab_b);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = store_b.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let before = store_b.load();
        store_a.update(|c| c.count = 9);

        assert!(store_b.sync_external());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store_b.load().count, 9);
        assert_eq!(before.count, 0);

        // Own writes are not reported as external
        assert!(!store_a.sync_external());
    }

    #[test]
    fn test_legacy_migration_runs_once() {
        let backend = MemoryBackend::new();
        backend.set("old-counter", "7").unwrap();
        let store = store(&backend);

        assert_eq!(store.load().count, 7);
        assert_eq!(backend.get("old-counter").unwrap(), None);
        assert!(backend.get("counter").unwrap().is_some());
    }

    #[test]
    fn test_failed_migration_write_keeps_migrated_state() {
        let backend = MemoryBackend::new();
        backend.set("old-counter", "7").unwrap();
        backend.set_read_only(true);
        let store = store(&backend);

        assert_eq!(store.load().count, 7);
        assert_eq!(store.load().count, 7);
        assert_eq!(backend.get("old-counter").unwrap().as_deref(), Some("7"));
        assert_eq!(backend.get("counter").unwrap(), None);
    }

    #[test]
    fn test_trivial_legacy_data_is_ignored() {
        let backend = MemoryBackend::new();
        backend.set("old-counter", "0").unwrap();
        let store = store(&backend);

        assert_eq!(*store.load(), Counter::default());
        assert!(backend.get("old-counter").unwrap().is_some());
        assert_eq!(backend.get("counter").unwrap(), None);
    }

    #[tokio::test]
    async fn test_watch_external() {
        let tab_a = MemoryBackend::new();
        let tab_b = tab_a.tab();
        let store_a = store(&tab_a);
        let store_b = Arc::new(store(&tab_b));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = store_b.subscribe(move || {
            let _ = tx.send(());
        });
        let watcher = tokio::spawn(Arc::clone(&store_b).watch_external());
        tokio::task::yield_now().await;

        store_a.update(|c| c.count = 3);
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(store_b.load().count, 3);
        watcher.abort();
    }
}

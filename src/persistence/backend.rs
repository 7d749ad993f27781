//! Key-value storage backends
//!
//! A backend stores raw strings under keys and broadcasts a [`StorageEvent`]
//! on every write. Each backend handle carries an origin id; a handle never
//! observes its own writes through [`StorageEvents`], only writes from other
//! handles ("tabs") sharing the same data.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::debug;
use uuid::Uuid;

use super::error::StorageError;

/// Capacity of the change-notification channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A write observed on a shared backend
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: String,
    pub origin: Uuid,
}

/// Change seen from another origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalChange {
    /// A specific key was written or removed
    Key(String),
    /// Events were dropped; any key may have changed
    Unknown,
}

impl ExternalChange {
    pub fn affects(&self, key: &str) -> bool {
        match self {
            ExternalChange::Key(k) => k == key,
            ExternalChange::Unknown => true,
        }
    }
}

/// Receiver of change events from other origins
pub struct StorageEvents {
    rx: broadcast::Receiver<StorageEvent>,
    origin: Uuid,
}

impl StorageEvents {
    fn new(rx: broadcast::Receiver<StorageEvent>, origin: Uuid) -> Self {
        Self { rx, origin }
    }

    /// Next pending external change, without waiting
    pub fn try_next(&mut self) -> Option<ExternalChange> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.origin == self.origin => continue,
                Ok(event) => return Some(ExternalChange::Key(event.key)),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!("Storage event receiver lagged by {} events", skipped);
                    return Some(ExternalChange::Unknown);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next external change. Returns `None` once every backend
    /// handle has been dropped.
    pub async fn next(&mut self) -> Option<ExternalChange> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.origin => continue,
                Ok(event) => return Some(ExternalChange::Key(event.key)),
                Err(RecvError::Lagged(_)) => return Some(ExternalChange::Unknown),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Synchronous string key-value store with change notification
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// Subscribe to writes made through other handles
    fn events(&self) -> StorageEvents;
}

// ============================================================================
// In-memory backend
// ============================================================================

struct MemoryShared {
    entries: Mutex<HashMap<String, String>>,
    tx: broadcast::Sender<StorageEvent>,
    quota_bytes: Option<usize>,
    read_only: AtomicBool,
}

/// In-memory backend. Clones made with [`MemoryBackend::tab`] share data but
/// have their own origin.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<MemoryShared>,
    origin: Uuid,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Backend that rejects writes once total stored bytes exceed `bytes`
    pub fn with_quota(bytes: usize) -> Self {
        Self::build(Some(bytes))
    }

    fn build(quota_bytes: Option<usize>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(MemoryShared {
                entries: Mutex::new(HashMap::new()),
                tx,
                quota_bytes,
                read_only: AtomicBool::new(false),
            }),
            origin: Uuid::new_v4(),
        }
    }

    /// Another handle onto the same data with a distinct origin
    pub fn tab(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            origin: Uuid::new_v4(),
        }
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Make every handle reject writes with `AccessDenied`
    pub fn set_read_only(&self, read_only: bool) {
        self.shared.read_only.store(read_only, Ordering::SeqCst);
    }

    fn notify(&self, key: &str) {
        // No receivers is fine
        let _ = self.shared.tx.send(StorageEvent {
            key: key.to_string(),
            origin: self.origin,
        });
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.shared.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.shared.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::AccessDenied(format!("backend is read-only ({})", key)));
        }
        {
            let mut entries = self.shared.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(limit) = self.shared.quota_bytes {
                let others: usize = entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                let bytes = others + key.len() + value.len();
                if bytes > limit {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                        bytes,
                        limit,
                    });
                }
            }
            entries.insert(key.to_string(), value.to_string());
        }
        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.shared.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::AccessDenied(format!("backend is read-only ({})", key)));
        }
        let removed = self
            .shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            self.notify(key);
        }
        Ok(())
    }

    fn events(&self) -> StorageEvents {
        StorageEvents::new(self.shared.tx.subscribe(), self.origin)
    }
}

// ============================================================================
// File backend
// ============================================================================

/// Directory of `<key>.json` files. Change events are shared between handles
/// created with [`FileBackend::tab`] in the same process.
#[derive(Clone)]
pub struct FileBackend {
    dir: PathBuf,
    quota_bytes: Option<usize>,
    tx: broadcast::Sender<StorageEvent>,
    origin: Uuid,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            dir: dir.into(),
            quota_bytes: None,
            tx,
            origin: Uuid::new_v4(),
        }
    }

    /// Reject single values larger than `bytes`
    pub fn with_quota(mut self, bytes: Option<usize>) -> Self {
        self.quota_bytes = bytes;
        self
    }

    pub fn tab(&self) -> Self {
        Self {
            origin: Uuid::new_v4(),
            ..self.clone()
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(limit) = self.quota_bytes {
            if value.len() > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    bytes: value.len(),
                    limit,
                });
            }
        }

        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;

        let _ = self.tx.send(StorageEvent {
            key: key.to_string(),
            origin: self.origin,
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                let _ = self.tx.send(StorageEvent {
                    key: key.to_string(),
                    origin: self.origin,
                });
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn events(&self) -> StorageEvents {
        StorageEvents::new(self.tx.subscribe(), self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::error::StorageErrorKind;

    #[test]
    fn test_tabs_share_data_but_not_own_events() {
        let tab_a = MemoryBackend::new();
        let tab_b = tab_a.tab();
        let mut events_a = tab_a.events();
        let mut events_b = tab_b.events();

        tab_a.set("k", "v1").unwrap();

        assert_eq!(tab_b.get("k").unwrap().as_deref(), Some("v1"));
        assert_eq!(events_a.try_next(), None);
        assert_eq!(events_b.try_next(), Some(ExternalChange::Key("k".to_string())));
        assert_eq!(events_b.try_next(), None);
    }

    #[test]
    fn test_memory_quota() {
        let backend = MemoryBackend::with_quota(10);
        assert!(backend.set("a", "12345").is_ok());
        let err = backend.set("b", "1234567").unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::QuotaExceeded);
        // Overwriting the same key only counts the new value
        assert!(backend.set("a", "123456").is_ok());
    }

    #[test]
    fn test_read_only_denies_writes() {
        let backend = MemoryBackend::new();
        backend.set_read_only(true);
        let err = backend.set("a", "1").unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::AccessDenied);
    }

    #[test]
    fn test_file_backend_roundtrip() {
        let dir = std::env::temp_dir().join(format!("fib-workflow-test-{}", Uuid::new_v4()));
        let backend = FileBackend::new(&dir);

        assert_eq!(backend.get("store").unwrap(), None);
        backend.set("store", "{\"version\":2}").unwrap();
        assert_eq!(backend.get("store").unwrap().as_deref(), Some("{\"version\":2}"));

        backend.remove("store").unwrap();
        assert_eq!(backend.get("store").unwrap(), None);
        // Removing twice is not an error
        backend.remove("store").unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_backend_quota() {
        let dir = std::env::temp_dir().join(format!("fib-workflow-test-{}", Uuid::new_v4()));
        let backend = FileBackend::new(&dir).with_quota(Some(4));
        let err = backend.set("store", "too long").unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::QuotaExceeded);
        let _ = std::fs::remove_dir_all(&dir);
    }
}

//! Persistence - versioned snapshot storage
//!
//! - [`backend`] - key-value backends (in-memory "tabs", JSON files) with change events
//! - [`store`] - cached, observable snapshot store with legacy migration
//! - [`snapshot`] - the application snapshot shape
//! - [`archive`] - compressed backup/restore

pub mod archive;
pub mod backend;
pub mod error;
pub mod snapshot;
pub mod store;

pub use backend::{ExternalChange, FileBackend, KeyValueBackend, MemoryBackend, StorageEvent, StorageEvents};
pub use error::{StorageError, StorageErrorKind};
pub use snapshot::{
    AlertCondition, AppSnapshot, AutoRefresh, LevelVisibility, PivotStore, PriceAlert, Theme,
    ValidationSettings, LEGACY_STATE_KEY, SNAPSHOT_VERSION, STORE_KEY,
};
pub use store::{LegacyMigration, PersistenceStore, Snapshot, Subscription};

/// Store shared by the pivot and workflow managers
pub type AppStore = PersistenceStore<AppSnapshot>;

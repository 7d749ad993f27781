//! Storage backend errors and their classification

use thiserror::Error;

/// Broad failure class, used for logging and for callers that want to react
/// differently to a full store versus a locked one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    QuotaExceeded,
    AccessDenied,
    Other,
}

impl std::fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageErrorKind::QuotaExceeded => write!(f, "quota exceeded"),
            StorageErrorKind::AccessDenied => write!(f, "access denied"),
            StorageErrorKind::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded writing '{key}' ({bytes} bytes, limit {limit})")]
    QuotaExceeded { key: String, bytes: usize, limit: usize },

    #[error("Storage access denied: {0}")]
    AccessDenied(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::QuotaExceeded { .. } => StorageErrorKind::QuotaExceeded,
            StorageError::AccessDenied(_) => StorageErrorKind::AccessDenied,
            StorageError::Io(e) => match e.kind() {
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::ReadOnlyFilesystem => {
                    StorageErrorKind::AccessDenied
                }
                std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded => {
                    StorageErrorKind::QuotaExceeded
                }
                _ => StorageErrorKind::Other,
            },
            StorageError::Serialization(_) => StorageErrorKind::Other,
        }
    }
}

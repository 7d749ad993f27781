//! Snapshot backup and restore
//!
//! Writes the current snapshot as zstd-compressed JSON (`.json.zst`) and reads
//! it back, so a workflow set can be moved between machines or restored after
//! `clear`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::store::{PersistenceStore, Snapshot};

/// zstd compression level for archives
const ARCHIVE_COMPRESSION_LEVEL: i32 = 3;

/// Write the current snapshot to `path`
pub fn export_snapshot<S: Snapshot>(store: &PersistenceStore<S>, path: &Path) -> Result<()> {
    let snapshot = store.load();
    let json = serde_json::to_vec(snapshot.as_ref()).context("Failed to serialize snapshot")?;
    let compressed = zstd::encode_all(&json[..], ARCHIVE_COMPRESSION_LEVEL)
        .context("Failed to compress snapshot")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, &compressed)
        .with_context(|| format!("Failed to write archive {}", path.display()))?;

    info!(
        "Exported snapshot to {} ({} bytes, {} compressed)",
        path.display(),
        json.len(),
        compressed.len()
    );
    Ok(())
}

/// Replace the stored snapshot with the archive at `path`.
/// Returns whether the restored snapshot was persisted.
pub fn import_snapshot<S: Snapshot>(store: &PersistenceStore<S>, path: &Path) -> Result<bool> {
    let compressed = std::fs::read(path)
        .with_context(|| format!("Failed to read archive {}", path.display()))?;
    let json = zstd::decode_all(&compressed[..]).context("Failed to decompress archive")?;
    let mut snapshot: S = serde_json::from_slice(&json).context("Archive is not a valid snapshot")?;
    snapshot.normalize();

    let saved = store.save(&snapshot);
    info!("Imported snapshot from {} (persisted: {})", path.display(), saved);
    Ok(saved)
}

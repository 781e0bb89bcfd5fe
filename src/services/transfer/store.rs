use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use tempfile::NamedTempFile;

use super::entry::TransferQueue;

/// Durable home of the transfer queue snapshot.
///
/// Every `save` replaces the whole snapshot; nothing is kept between calls.
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when no snapshot has been written yet.
    fn load(&self) -> Result<Option<TransferQueue>>;

    fn save(&self, queue: &TransferQueue) -> Result<()>;

    fn delete(&self) -> Result<()>;
}

/// JSON snapshot file, written through a temp file and an atomic rename.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load(&self) -> Result<Option<TransferQueue>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No transfer snapshot at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(e).wrap_err_with(|| {
                    format!("Failed to read transfer snapshot: {}", self.path.display())
                });
            }
        };

        let queue: TransferQueue = serde_json::from_slice(&data).wrap_err_with(|| {
            format!("Failed to parse transfer snapshot: {}", self.path.display())
        })?;
        queue.validate().wrap_err_with(|| {
            format!("Inconsistent transfer snapshot: {}", self.path.display())
        })?;

        tracing::info!(
            "Loaded transfer snapshot with {} entries from {}",
            queue.len(),
            self.path.display()
        );
        Ok(Some(queue))
    }

    fn save(&self, queue: &TransferQueue) -> Result<()> {
        let dir = self.parent_dir();
        std::fs::create_dir_all(dir)
            .wrap_err_with(|| format!("Failed to create snapshot directory: {}", dir.display()))?;

        let data = serde_json::to_vec_pretty(queue).wrap_err("Failed to serialize transfer queue")?;

        // Same directory as the target so the rename never crosses filesystems.
        let mut file = NamedTempFile::new_in(dir)
            .wrap_err("Failed to create temporary snapshot file")?;
        file.write_all(&data)
            .wrap_err("Failed to write temporary snapshot file")?;
        file.as_file()
            .sync_all()
            .wrap_err("Failed to flush temporary snapshot file")?;
        file.persist(&self.path).wrap_err_with(|| {
            format!("Failed to replace transfer snapshot: {}", self.path.display())
        })?;

        tracing::debug!(
            "Saved transfer snapshot ({} entries) to {}",
            queue.len(),
            self.path.display()
        );
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        std::fs::remove_file(&self.path).wrap_err_with(|| {
            format!("Failed to delete transfer snapshot: {}", self.path.display())
        })
    }
}

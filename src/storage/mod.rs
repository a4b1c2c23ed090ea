//! Storage engine abstraction: `Dataset`/`Storage` traits plus a
//! scoped `Workon` guard, implemented by two engines — [`dummy`] (in-memory,
//! backed by a temp directory) and [`zfs`] (delegates to an external CoW
//! filesystem CLI via a `subprocess`-based exec wrapper). The
//! `Dataset`/`Storage(Datasets)` split treats "dataset not found" as a
//! first-class condition rather than a panic.

pub mod dummy;
pub mod zfs;

use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::model::Snapshot;

/// A pluggable backing store, selected by `storage_alias` in config.
pub trait Storage: Send + Sync {
    /// Pure name lookup; performs no I/O.
    fn get_dataset(&self, group: &str, name: &str) -> Box<dyn Dataset>;

    /// Every dataset name this engine currently knows about, used by
    /// `slist` to reconcile storage state against the fileset
    /// catalog and surface orphaned ("stale") datasets.
    fn list_dataset_names(&self) -> Result<Vec<String>, StorageError>;
}

/// One dataset (one fileset's data directory plus its snapshot history).
pub trait Dataset: Send + Sync {
    fn name(&self) -> &str;

    /// Create the dataset if missing; idempotent.
    fn ensure_exists(&self) -> Result<(), StorageError>;

    /// Mount (if needed) and `chdir` to the data path for the guard's
    /// lifetime, guaranteeing unmount on every exit path including panics.
    /// Nested `workon()` on the same dataset fails loudly rather than
    /// silently re-entering.
    fn workon(&self) -> Result<Workon, StorageError>;

    fn get_data_path(&self) -> PathBuf;
    fn get_snapshot_path(&self, snapshot_name: &str) -> PathBuf;

    fn get_used_size(&self) -> Result<u64, StorageError>;
    fn get_referenced_size(&self) -> Result<u64, StorageError>;

    /// Forbidden while a `workon` guard is outstanding — engines check
    /// `is_workon_active()` themselves.
    fn rename(&self, new_name: &str) -> Result<(), StorageError>;

    fn snapshot_create(&self, name: &str) -> Result<String, StorageError>;
    fn snapshot_delete(&self, name: &str) -> Result<(), StorageError>;
    /// Sorted newest-to-oldest.
    fn snapshot_list(&self) -> Result<Vec<Snapshot>, StorageError>;
}

/// Scoped handle returned by [`Dataset::workon`]. The data directory is
/// available at `.path()` for the handle's lifetime; dropping it releases
/// the mount. `release()` makes teardown errors observable instead of
/// swallowing them in `Drop`.
pub struct Workon {
    path: PathBuf,
    teardown: Option<Box<dyn FnOnce() -> Result<(), StorageError> + Send>>,
}

impl Workon {
    pub fn new(path: PathBuf, teardown: impl FnOnce() -> Result<(), StorageError> + Send + 'static) -> Self {
        Self {
            path,
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Explicitly release and surface any teardown error. Idempotent: a
    /// second call (or the eventual `Drop`) is a no-op.
    pub fn release(mut self) -> Result<(), StorageError> {
        self.run_teardown()
    }

    fn run_teardown(&mut self) -> Result<(), StorageError> {
        if let Some(teardown) = self.teardown.take() {
            teardown()
        } else {
            Ok(())
        }
    }
}

impl Drop for Workon {
    fn drop(&mut self) {
        if let Err(e) = self.run_teardown() {
            log::error!("workon teardown for {:?} failed: {e}", self.path);
        }
    }
}

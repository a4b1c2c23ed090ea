//! In-memory/temp-dir storage engine, used for tests and for pools declared
//! as scratch. A dataset is a lazily-created `TempDir`, snapshots are just
//! names recorded in a list (no data is actually copied), and size queries
//! return a fixed placeholder.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tempfile::TempDir;

use crate::error::StorageError;
use crate::model::Snapshot;
use crate::storage::{Dataset, Storage, Workon};

struct DatasetState {
    _tempdir: TempDir,
    data_path: PathBuf,
    snapshots: Vec<Snapshot>,
    workon_active: AtomicBool,
}

impl DatasetState {
    fn new() -> Result<Self, StorageError> {
        let tempdir = TempDir::new().map_err(|e| StorageError::Exec {
            cmd: "mkdtemp".to_string(),
            stderr: e.to_string(),
        })?;
        let data_path = tempdir.path().join("data");
        std::fs::create_dir_all(&data_path).map_err(|e| StorageError::Exec {
            cmd: "mkdir data".to_string(),
            stderr: e.to_string(),
        })?;
        Ok(Self {
            _tempdir: tempdir,
            data_path,
            snapshots: Vec::new(),
            workon_active: AtomicBool::new(false),
        })
    }
}

type Registry = Arc<Mutex<HashMap<String, Arc<Mutex<DatasetState>>>>>;

/// Holds every dataset ever requested through it, keyed by the identifier
/// `get_dataset` is called with.
#[derive(Default, Clone)]
pub struct DummyStorage {
    registry: Registry,
}

impl DummyStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for DummyStorage {
    fn get_dataset(&self, group: &str, name: &str) -> Box<dyn Dataset> {
        Box::new(DummyDataset {
            name: format!("{group}-{name}"),
            registry: self.registry.clone(),
        })
    }

    fn list_dataset_names(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.registry.lock().unwrap().keys().cloned().collect())
    }
}

/// Handle to one dataset. `get_dataset` is a pure lookup; the
/// backing `TempDir` is created lazily on first access to the registry
/// entry.
pub struct DummyDataset {
    name: String,
    registry: Registry,
}

impl DummyDataset {
    fn state(&self) -> Result<Arc<Mutex<DatasetState>>, StorageError> {
        let mut registry = self.registry.lock().unwrap();
        if let Some(existing) = registry.get(&self.name) {
            return Ok(existing.clone());
        }
        let state = Arc::new(Mutex::new(DatasetState::new()?));
        registry.insert(self.name.clone(), state.clone());
        Ok(state)
    }
}

impl Dataset for DummyDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn ensure_exists(&self) -> Result<(), StorageError> {
        self.state().map(|_| ())
    }

    fn workon(&self) -> Result<Workon, StorageError> {
        let state = self.state()?;
        let path = {
            let guard = state.lock().unwrap();
            if guard.workon_active.swap(true, Ordering::SeqCst) {
                return Err(StorageError::Busy(self.name.clone()));
            }
            guard.data_path.clone()
        };
        let state_for_teardown = state.clone();
        Ok(Workon::new(path, move || {
            state_for_teardown
                .lock()
                .unwrap()
                .workon_active
                .store(false, Ordering::SeqCst);
            Ok(())
        }))
    }

    fn get_data_path(&self) -> PathBuf {
        self.state()
            .map(|s| s.lock().unwrap().data_path.clone())
            .unwrap_or_default()
    }

    fn get_snapshot_path(&self, snapshot_name: &str) -> PathBuf {
        let base = self
            .state()
            .map(|s| s.lock().unwrap().data_path.parent().unwrap().to_path_buf())
            .unwrap_or_default();
        let path = base.join(".snapshot").join(snapshot_name).join("data");
        let _ = std::fs::create_dir_all(&path);
        path
    }

    fn get_used_size(&self) -> Result<u64, StorageError> {
        Ok(1001)
    }

    fn get_referenced_size(&self) -> Result<u64, StorageError> {
        Ok(1001)
    }

    fn rename(&self, new_name: &str) -> Result<(), StorageError> {
        let state = self.state()?;
        {
            let guard = state.lock().unwrap();
            if guard.workon_active.load(Ordering::SeqCst) {
                return Err(StorageError::Busy(self.name.clone()));
            }
        }
        let mut registry = self.registry.lock().unwrap();
        registry.remove(&self.name);
        registry.insert(new_name.to_string(), state);
        Ok(())
    }

    fn snapshot_create(&self, name: &str) -> Result<String, StorageError> {
        let state = self.state()?;
        let mut guard = state.lock().unwrap();
        if guard.snapshots.iter().any(|s| s.name == name) {
            return Err(StorageError::Exec {
                cmd: "snapshot_create".to_string(),
                stderr: format!("snapshot with name {name} exists"),
            });
        }
        let snapshot = Snapshot {
            name: name.to_string(),
            created: Utc::now(),
        };
        guard.snapshots.push(snapshot);
        Ok(name.to_string())
    }

    fn snapshot_delete(&self, name: &str) -> Result<(), StorageError> {
        let state = self.state()?;
        let mut guard = state.lock().unwrap();
        let before = guard.snapshots.len();
        guard.snapshots.retain(|s| s.name != name);
        if guard.snapshots.len() == before {
            return Err(StorageError::DatasetNotFound(format!("{}@{name}", self.name)));
        }
        Ok(())
    }

    fn snapshot_list(&self) -> Result<Vec<Snapshot>, StorageError> {
        let state = self.state()?;
        let mut snapshots = state.lock().unwrap().snapshots.clone();
        snapshots.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_exists_is_idempotent() {
        let storage = DummyStorage::new();
        let dataset = storage.get_dataset("group", "fileset");
        dataset.ensure_exists().unwrap();
        dataset.ensure_exists().unwrap();
    }

    #[test]
    fn repeated_lookups_share_state() {
        let storage = DummyStorage::new();
        storage.get_dataset("group", "fileset").snapshot_create("planb-x").unwrap();
        let again = storage.get_dataset("group", "fileset");
        assert_eq!(again.snapshot_list().unwrap().len(), 1);
    }

    #[test]
    fn nested_workon_fails_loudly() {
        let storage = DummyStorage::new();
        let dataset = storage.get_dataset("group", "fileset");
        let outer = dataset.workon().unwrap();
        let inner = dataset.workon();
        assert!(matches!(inner, Err(StorageError::Busy(_))));
        drop(outer);
        assert!(dataset.workon().is_ok());
    }

    #[test]
    fn snapshot_lifecycle() {
        let storage = DummyStorage::new();
        let dataset = storage.get_dataset("group", "fileset");
        dataset.snapshot_create("planb-20200101T0000Z").unwrap();
        assert_eq!(dataset.snapshot_list().unwrap().len(), 1);
        dataset.snapshot_delete("planb-20200101T0000Z").unwrap();
        assert!(dataset.snapshot_list().unwrap().is_empty());
    }

    #[test]
    fn duplicate_snapshot_name_errors() {
        let storage = DummyStorage::new();
        let dataset = storage.get_dataset("group", "fileset");
        dataset.snapshot_create("planb-x").unwrap();
        assert!(dataset.snapshot_create("planb-x").is_err());
    }
}

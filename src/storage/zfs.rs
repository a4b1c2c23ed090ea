//! CoW filesystem storage engine: delegates to the `zfs` CLI via a
//! `subprocess`-based exec wrapper — run zfs, parse tab-separated `-H`
//! output, raise a structured error on non-zero exit — covering the full
//! dataset lifecycle (create, mount, rename) plus snapshot
//! create/delete/list.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::StorageError;
use crate::model::Snapshot;
use crate::storage::{Dataset, Storage, Workon};

/// Root of the pool's mounted filesystem tree, e.g. `/data`.
#[derive(Debug, Clone)]
pub struct ZfsStorage {
    pub pool: String,
    pub mount_root: PathBuf,
}

impl ZfsStorage {
    pub fn new(pool: impl Into<String>, mount_root: impl Into<PathBuf>) -> Self {
        Self {
            pool: pool.into(),
            mount_root: mount_root.into(),
        }
    }
}

impl Storage for ZfsStorage {
    fn get_dataset(&self, group: &str, name: &str) -> Box<dyn Dataset> {
        Box::new(ZfsDataset {
            pool: self.pool.clone(),
            mount_root: self.mount_root.clone(),
            name: format!("{group}-{name}"),
            workon_active: Mutex::new(false),
        })
    }

    fn list_dataset_names(&self) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{}/", self.pool);
        let rows = call_read("list", &["-r", "-o", "name", &self.pool])?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

pub struct ZfsDataset {
    pool: String,
    mount_root: PathBuf,
    name: String,
    workon_active: Mutex<bool>,
}

impl ZfsDataset {
    fn zfs_path(&self) -> String {
        format!("{}/{}", self.pool, self.name)
    }

    fn snapshot_zfs_name(&self, snapshot: &str) -> String {
        format!("{}@{snapshot}", self.zfs_path())
    }
}

impl Dataset for ZfsDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn ensure_exists(&self) -> Result<(), StorageError> {
        if dataset_exists(&self.zfs_path())? {
            return Ok(());
        }
        call_do("create", &["-p", &self.zfs_path()])?;
        std::fs::create_dir_all(self.get_data_path()).map_err(|e| StorageError::Exec {
            cmd: "mkdir data".to_string(),
            stderr: e.to_string(),
        })?;
        Ok(())
    }

    fn workon(&self) -> Result<Workon, StorageError> {
        let mut active = self.workon_active.lock().unwrap();
        if *active {
            return Err(StorageError::Busy(self.name.clone()));
        }
        *active = true;
        drop(active);

        if let Err(e) = call_do("mount", &[&self.zfs_path()]) {
            // Already-mounted is not an error for our purposes.
            if !e.to_string().contains("already mounted") {
                *self.workon_active.lock().unwrap() = false;
                return Err(e);
            }
        }

        let path = self.get_data_path();
        let zfs_path = self.zfs_path();
        // SAFETY-equivalent note: workon is the only place that unmounts,
        // matching its "mount ⇒ unmount on exit" invariant.
        Ok(Workon::new(path, move || {
            call_do("unmount", &[&zfs_path])
        }))
    }

    fn get_data_path(&self) -> PathBuf {
        self.mount_root.join(&self.name)
    }

    fn get_snapshot_path(&self, snapshot_name: &str) -> PathBuf {
        self.mount_root
            .join(&self.name)
            .join(".zfs")
            .join("snapshot")
            .join(snapshot_name)
    }

    fn get_used_size(&self) -> Result<u64, StorageError> {
        get_property_bytes(&self.zfs_path(), "used")
    }

    fn get_referenced_size(&self) -> Result<u64, StorageError> {
        get_property_bytes(&self.zfs_path(), "referenced")
    }

    fn rename(&self, new_name: &str) -> Result<(), StorageError> {
        if *self.workon_active.lock().unwrap() {
            panic!("rename called on {} while a workon is active", self.name);
        }
        let old_path = self.zfs_path();
        let new_path = format!("{}/{new_name}", self.pool);
        call_do("rename", &[&old_path, &new_path])
    }

    fn snapshot_create(&self, name: &str) -> Result<String, StorageError> {
        call_do("snapshot", &[&self.snapshot_zfs_name(name)])?;
        Ok(name.to_string())
    }

    fn snapshot_delete(&self, name: &str) -> Result<(), StorageError> {
        call_do("destroy", &[&self.snapshot_zfs_name(name)])
    }

    fn snapshot_list(&self) -> Result<Vec<Snapshot>, StorageError> {
        if !dataset_exists(&self.zfs_path())? {
            return Err(StorageError::DatasetNotFound(self.zfs_path()));
        }
        let prefix = format!("{}@", self.zfs_path());
        let rows = call_read(
            "list",
            &["-t", "snapshot", "-o", "name,creation", "-s", "creation"],
        )?;
        let mut snapshots: Vec<Snapshot> = rows
            .into_iter()
            .filter_map(|row| {
                let [full_name, created] = <[String; 2]>::try_from(row).ok()?;
                let name = full_name.strip_prefix(&prefix)?.to_string();
                let created = parse_creation(&created).ok()?;
                Some(Snapshot { name, created })
            })
            .collect();
        snapshots.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(snapshots)
    }
}

fn dataset_exists(zfs_path: &str) -> Result<bool, StorageError> {
    match call_read("list", &["-o", "name", zfs_path]) {
        Ok(_) => Ok(true),
        Err(StorageError::Exec { stderr, .. }) if stderr.contains("does not exist") => Ok(false),
        Err(e) => Err(e),
    }
}

fn get_property_bytes(zfs_path: &str, property: &str) -> Result<u64, StorageError> {
    let rows = call_read("get", &["-p", "-o", "value", property, zfs_path])?;
    let value = rows
        .first()
        .and_then(|r| r.first())
        .ok_or_else(|| StorageError::Exec {
            cmd: format!("zfs get {property}"),
            stderr: "empty output".to_string(),
        })?;
    value.parse().map_err(|_| StorageError::Exec {
        cmd: format!("zfs get {property}"),
        stderr: format!("not a byte count: {value:?}"),
    })
}

fn parse_creation(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    if let Ok(secs) = raw.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| StorageError::Exec {
                cmd: "zfs list".to_string(),
                stderr: format!("out of range timestamp: {raw}"),
            });
    }
    Err(StorageError::Exec {
        cmd: "zfs list".to_string(),
        stderr: format!("unparseable creation timestamp: {raw:?}"),
    })
}

/// Run a read-only `zfs` subcommand with `-H -p` (parsable, tab-separated,
/// no header) and split each line on tabs.
fn call_read(action: &str, args: &[&str]) -> Result<Vec<Vec<String>>, StorageError> {
    let output = subprocess::Exec::cmd("zfs")
        .arg(action)
        .arg("-H")
        .arg("-p")
        .args(args)
        .stdout(subprocess::Redirection::Pipe)
        .stderr(subprocess::Redirection::Pipe)
        .capture()
        .map_err(|e| StorageError::Exec {
            cmd: format!("zfs {action}"),
            stderr: e.to_string(),
        })?;

    if !output.exit_status.success() {
        return Err(StorageError::Exec {
            cmd: format!("zfs {action} {}", args.join(" ")),
            stderr: output.stderr_str(),
        });
    }

    Ok(output
        .stdout_str()
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.split('\t').map(|s| s.to_string()).collect())
        .collect())
}

/// Run a `zfs` subcommand for its side effect (create/snapshot/destroy/...).
fn call_do(action: &str, args: &[&str]) -> Result<(), StorageError> {
    let output = subprocess::Exec::cmd("zfs")
        .arg(action)
        .args(args)
        .stdout(subprocess::Redirection::Pipe)
        .stderr(subprocess::Redirection::Pipe)
        .capture()
        .map_err(|e| StorageError::Exec {
            cmd: format!("zfs {action}"),
            stderr: e.to_string(),
        })?;

    if output.exit_status.success() {
        Ok(())
    } else {
        Err(StorageError::Exec {
            cmd: format!("zfs {action} {}", args.join(" ")),
            stderr: output.stderr_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zfs_path_joins_pool_and_name() {
        let storage = ZfsStorage::new("tank", "/data");
        let dataset = storage.get_dataset("group", "fileset");
        assert_eq!(dataset.name(), "group-fileset");
    }

    #[test]
    fn snapshot_zfs_name_is_at_separated() {
        let dataset = ZfsDataset {
            pool: "tank".to_string(),
            mount_root: PathBuf::from("/data"),
            name: "group-fileset".to_string(),
            workon_active: Mutex::new(false),
        };
        assert_eq!(
            dataset.snapshot_zfs_name("planb-20200101T0000Z"),
            "tank/group-fileset@planb-20200101T0000Z"
        );
    }
}

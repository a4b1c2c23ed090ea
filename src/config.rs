//! Typed startup configuration, loaded once from a TOML file with
//! `serde`. PlanB is a multi-fileset daemon, so this owns every fileset,
//! host group, and storage pool definition rather than reading per-dataset
//! properties at runtime. Validated eagerly at startup rather than
//! failing lazily mid-run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use crate::catalog::InMemoryCatalog;
use crate::error::ConfigError;
use crate::model::{BlacklistHours, Fileset, HostGroup, RetentionMap, TransportConfig};
use crate::storage::dummy::DummyStorage;
use crate::storage::zfs::ZfsStorage;
use crate::storage::Storage;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum StoragePoolConfig {
    Dummy,
    Zfs { pool: String, mount_root: PathBuf },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub blacklist_hours: String,
    #[serde(default)]
    pub do_not_run_dir: Option<PathBuf>,
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_worker_count() -> usize {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            worker_count: default_worker_count(),
            blacklist_hours: String::new(),
            do_not_run_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub console: bool,
}

/// Transport choice for a `[[fileset]]` table; mirrors
/// `model::TransportConfig` but as a TOML-facing shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportToml {
    Rsync(crate::transport::rsync::RsyncConfig),
    Exec(crate::transport::exec::ExecConfig),
}

impl From<TransportToml> for TransportConfig {
    fn from(value: TransportToml) -> Self {
        match value {
            TransportToml::Rsync(cfg) => TransportConfig::Rsync(cfg),
            TransportToml::Exec(cfg) => TransportConfig::Exec(cfg),
        }
    }
}

/// A `[[group]]` table: the catalog seed for a `HostGroup`.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupToml {
    pub name: String,
    #[serde(default)]
    pub notify_email: Vec<String>,
    #[serde(default)]
    pub blacklist_hours: String,
    #[serde(default)]
    pub retention: Option<String>,
}

/// A `[[fileset]]` table: the catalog seed for a `Fileset`. Only the
/// static configuration fields are declared here; runtime state
/// (`is_queued`, `last_run`, ...) always starts at its zero value.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesetToml {
    pub friendly_name: String,
    pub group: String,
    pub storage_alias: String,
    pub transport: TransportToml,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub blacklist_hours: String,
    #[serde(default)]
    pub retention: String,
    #[serde(default)]
    pub do_snapshot_size_listing: bool,
    #[serde(default)]
    pub use_donotrund: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub storage: HashMap<String, StoragePoolConfig>,
    #[serde(default, rename = "group")]
    pub groups: Vec<GroupToml>,
    #[serde(default, rename = "fileset")]
    pub filesets: Vec<FilesetToml>,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Config =
            toml::from_str(raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Malformed(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Eager validation : syntax-check the global
    /// blacklist, every group/fileset's blacklist and retention syntax, and
    /// that every fileset references a registered storage alias and a
    /// known group — all conditions `planb/checks.py` enforces at startup
    /// in the original rather than failing lazily mid-run.
    fn validate(&self) -> Result<(), ConfigError> {
        BlacklistHours::from_str(&self.scheduler.blacklist_hours)?;
        if self.storage.is_empty() {
            return Err(ConfigError::Malformed(
                "no storage pools configured".to_string(),
            ));
        }
        let mut group_names = std::collections::HashSet::new();
        for group in &self.groups {
            BlacklistHours::from_str(&group.blacklist_hours)?;
            if let Some(retention) = &group.retention {
                RetentionMap::from_str(retention)?;
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(ConfigError::Malformed(format!(
                    "duplicate group name {:?}",
                    group.name
                )));
            }
        }
        for fileset in &self.filesets {
            BlacklistHours::from_str(&fileset.blacklist_hours)?;
            RetentionMap::from_str(&fileset.retention)?;
            if !self.storage.contains_key(&fileset.storage_alias) {
                return Err(ConfigError::UnknownStorageAlias(fileset.storage_alias.clone()));
            }
            if !group_names.contains(fileset.group.as_str()) {
                return Err(ConfigError::Malformed(format!(
                    "fileset {:?} references unknown group {:?}",
                    fileset.friendly_name, fileset.group
                )));
            }
        }
        Ok(())
    }

    /// Build the in-process catalog from the `[[group]]`/`[[fileset]]`
    /// tables, in the absence of the external relational catalog.
    pub fn seed_catalog(&self) -> Result<InMemoryCatalog, ConfigError> {
        let catalog = InMemoryCatalog::new();
        let mut group_ids = HashMap::new();
        for group in &self.groups {
            let id = catalog.insert_group(HostGroup {
                id: 0,
                name: group.name.clone(),
                notify_email: group.notify_email.clone(),
                blacklist_hours: BlacklistHours::from_str(&group.blacklist_hours)?,
                retention: group
                    .retention
                    .as_deref()
                    .map(RetentionMap::from_str)
                    .transpose()?,
            });
            group_ids.insert(group.name.clone(), id);
        }
        for fileset in &self.filesets {
            let group_id = *group_ids.get(&fileset.group).ok_or_else(|| {
                ConfigError::Malformed(format!("unknown group {:?}", fileset.group))
            })?;
            catalog.insert_fileset(Fileset {
                id: 0,
                friendly_name: fileset.friendly_name.clone(),
                group_id,
                group_name: fileset.group.clone(),
                storage_alias: fileset.storage_alias.clone(),
                transport: fileset.transport.clone().into(),
                enabled: fileset.enabled,
                blacklist_hours: BlacklistHours::from_str(&fileset.blacklist_hours)?,
                retention: RetentionMap::from_str(&fileset.retention)?,
                do_snapshot_size_listing: fileset.do_snapshot_size_listing,
                use_donotrund: fileset.use_donotrund,
                tags: fileset.tags.clone(),
                is_queued: false,
                is_running: false,
                last_ok: None,
                last_run: None,
                first_fail: None,
                average_duration: 0,
                total_size_mb: 0,
            });
        }
        Ok(catalog)
    }

    pub fn build_storage_registry(&self) -> Result<StorageRegistry, ConfigError> {
        let mut engines: HashMap<String, Arc<dyn Storage>> = HashMap::new();
        for (alias, pool) in &self.storage {
            let engine: Arc<dyn Storage> = match pool {
                StoragePoolConfig::Dummy => Arc::new(DummyStorage::new()),
                StoragePoolConfig::Zfs { pool, mount_root } => {
                    Arc::new(ZfsStorage::new(pool.clone(), mount_root.clone()))
                }
            };
            engines.insert(alias.clone(), engine);
        }
        Ok(StorageRegistry { engines })
    }
}

/// Storage engines plug in at startup from this registry; no runtime class
/// lookup beyond this map.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    engines: HashMap<String, Arc<dyn Storage>>,
}

impl StorageRegistry {
    /// Build a registry directly from a pre-populated engine map, for
    /// tests and embedders that don't go through TOML config.
    pub fn from_engines(engines: HashMap<String, Arc<dyn Storage>>) -> Self {
        Self { engines }
    }

    pub fn get(&self, alias: &str) -> Result<Arc<dyn Storage>, ConfigError> {
        self.engines
            .get(alias)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownStorageAlias(alias.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let raw = r#"
            [storage.main]
            engine = "dummy"
        "#;
        let cfg = Config::from_toml_str(raw).unwrap();
        assert_eq!(cfg.scheduler.tick_seconds, 60);
        assert_eq!(cfg.scheduler.worker_count, 10);
        assert!(cfg.storage.contains_key("main"));
    }

    #[test]
    fn parses_zfs_pool() {
        let raw = r#"
            [storage.main]
            engine = "zfs"
            pool = "tank"
            mount_root = "/data"
        "#;
        let cfg = Config::from_toml_str(raw).unwrap();
        let registry = cfg.build_storage_registry().unwrap();
        assert!(registry.get("main").is_ok());
        assert!(registry.get("missing").is_err());
    }

    #[test]
    fn rejects_empty_storage_registry() {
        let raw = "";
        assert!(Config::from_toml_str(raw).is_err());
    }

    #[test]
    fn rejects_bad_blacklist_hours() {
        let raw = r#"
            [scheduler]
            blacklist_hours = "99-100"

            [storage.main]
            engine = "dummy"
        "#;
        assert!(Config::from_toml_str(raw).is_err());
    }
}

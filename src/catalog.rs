//! Catalog repository: typed access to fileset configuration, host
//! groups, and run history. Out of scope is the relational store itself,
//! so this module defines the trait plus an in-process implementation
//! good enough for tests, single-node deployments, and
//! `confexport`/`blist` tooling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::model::{BackupRun, Fileset, HostGroup, RunAttributes};

/// Outcome recorded at the end of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub duration_seconds: u64,
    pub error_text: String,
    pub total_size_mb: u64,
}

/// The operations the rest of the core is allowed to perform on the
/// persistent store. Serializable semantics are required only on
/// `claim`; everything else is last-write-wins.
pub trait CatalogRepository: Send + Sync {
    fn list_candidates(&self) -> Vec<Fileset>;
    fn get_fileset(&self, fileset_id: i64) -> Option<Fileset>;
    fn get_group(&self, group_id: i64) -> Option<HostGroup>;
    fn list_groups(&self) -> Vec<HostGroup>;
    fn list_filesets(&self) -> Vec<Fileset>;

    /// Atomic CAS: `is_queued: false -> true`. Returns whether this caller
    /// now owns the queue slot.
    fn claim(&self, fileset_id: i64) -> bool;
    fn release_queue(&self, fileset_id: i64);
    fn mark_running(&self, fileset_id: i64);
    fn clear_runtime_flags(&self, fileset_id: i64);

    fn record_run_start(&self, fileset_id: i64, attributes: RunAttributes) -> BackupRun;
    fn record_run_end(&self, run_id: i64, outcome: RunOutcome);
    fn update_snapshot_size_listing(&self, run_id: i64, snapshot_size_mb: u64, listing: String);

    fn update_fileset_success_metrics(
        &self,
        fileset_id: i64,
        last_ok: chrono::DateTime<Utc>,
        duration_seconds: u64,
        total_size_mb: u64,
    );
    fn update_fileset_failure(&self, fileset_id: i64, last_run: chrono::DateTime<Utc>);
    fn list_recent_durations(&self, fileset_id: i64, n: usize) -> Vec<u64>;

    fn insert_fileset(&self, fileset: Fileset) -> i64;
    fn insert_group(&self, group: HostGroup) -> i64;

    fn list_runs(&self, fileset_id: i64) -> Vec<BackupRun>;
}

#[derive(Default)]
struct Store {
    groups: HashMap<i64, HostGroup>,
    filesets: HashMap<i64, Fileset>,
    runs: HashMap<i64, BackupRun>,
    next_fileset_id: i64,
    next_group_id: i64,
    next_run_id: i64,
}

/// In-process catalog, guarded by a single mutex. The mutex *is* the
/// serializability guarantee needed for `claim` — every operation
/// here runs under the same lock, so the CAS in `claim` can never race.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    store: Arc<Mutex<Store>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CatalogRepository for InMemoryCatalog {
    fn list_candidates(&self) -> Vec<Fileset> {
        let store = self.store.lock().unwrap();
        let mut candidates: Vec<Fileset> = store
            .filesets
            .values()
            .filter(|f| f.enabled)
            .cloned()
            .collect();
        candidates.sort_by_key(|f| f.last_run);
        candidates
    }

    fn get_fileset(&self, fileset_id: i64) -> Option<Fileset> {
        self.store.lock().unwrap().filesets.get(&fileset_id).cloned()
    }

    fn get_group(&self, group_id: i64) -> Option<HostGroup> {
        self.store.lock().unwrap().groups.get(&group_id).cloned()
    }

    fn list_groups(&self) -> Vec<HostGroup> {
        self.store.lock().unwrap().groups.values().cloned().collect()
    }

    fn list_filesets(&self) -> Vec<Fileset> {
        self.store.lock().unwrap().filesets.values().cloned().collect()
    }

    fn claim(&self, fileset_id: i64) -> bool {
        let mut store = self.store.lock().unwrap();
        match store.filesets.get_mut(&fileset_id) {
            Some(fileset) if !fileset.is_queued => {
                fileset.is_queued = true;
                true
            }
            _ => false,
        }
    }

    fn release_queue(&self, fileset_id: i64) {
        let mut store = self.store.lock().unwrap();
        if let Some(fileset) = store.filesets.get_mut(&fileset_id) {
            fileset.is_queued = false;
        }
    }

    fn mark_running(&self, fileset_id: i64) {
        let mut store = self.store.lock().unwrap();
        if let Some(fileset) = store.filesets.get_mut(&fileset_id) {
            fileset.is_running = true;
        }
    }

    fn clear_runtime_flags(&self, fileset_id: i64) {
        let mut store = self.store.lock().unwrap();
        if let Some(fileset) = store.filesets.get_mut(&fileset_id) {
            fileset.is_running = false;
            fileset.is_queued = false;
        }
    }

    fn record_run_start(&self, fileset_id: i64, attributes: RunAttributes) -> BackupRun {
        let mut store = self.store.lock().unwrap();
        store.next_run_id += 1;
        let run = BackupRun {
            id: store.next_run_id,
            fileset_id,
            started: Utc::now(),
            duration_seconds: None,
            success: false,
            error_text: String::new(),
            total_size_mb: 0,
            snapshot_size_mb: 0,
            snapshot_size_listing: String::new(),
            attributes,
        };
        store.runs.insert(run.id, run.clone());
        run
    }

    fn record_run_end(&self, run_id: i64, outcome: RunOutcome) {
        let mut store = self.store.lock().unwrap();
        if let Some(run) = store.runs.get_mut(&run_id) {
            run.success = outcome.success;
            run.duration_seconds = Some(outcome.duration_seconds);
            run.error_text = outcome.error_text;
            run.total_size_mb = outcome.total_size_mb;
        }
    }

    fn update_snapshot_size_listing(&self, run_id: i64, snapshot_size_mb: u64, listing: String) {
        let mut store = self.store.lock().unwrap();
        if let Some(run) = store.runs.get_mut(&run_id) {
            run.snapshot_size_mb = snapshot_size_mb;
            run.snapshot_size_listing = listing;
        }
    }

    fn update_fileset_success_metrics(
        &self,
        fileset_id: i64,
        last_ok: chrono::DateTime<Utc>,
        duration_seconds: u64,
        total_size_mb: u64,
    ) {
        let mut store = self.store.lock().unwrap();
        let recent = recent_durations(&store, fileset_id, 9);
        if let Some(fileset) = store.filesets.get_mut(&fileset_id) {
            fileset.last_ok = Some(last_ok);
            fileset.last_run = Some(last_ok);
            fileset.first_fail = None;
            fileset.total_size_mb = total_size_mb;
            let mut durations = recent;
            durations.push(duration_seconds);
            fileset.average_duration = durations.iter().sum::<u64>() / durations.len() as u64;
        }
    }

    fn update_fileset_failure(&self, fileset_id: i64, last_run: chrono::DateTime<Utc>) {
        let mut store = self.store.lock().unwrap();
        if let Some(fileset) = store.filesets.get_mut(&fileset_id) {
            fileset.last_run = Some(last_run);
            if fileset.first_fail.is_none() {
                fileset.first_fail = Some(last_run);
            }
        }
    }

    fn list_recent_durations(&self, fileset_id: i64, n: usize) -> Vec<u64> {
        let store = self.store.lock().unwrap();
        recent_durations(&store, fileset_id, n)
    }

    fn insert_fileset(&self, mut fileset: Fileset) -> i64 {
        let mut store = self.store.lock().unwrap();
        store.next_fileset_id += 1;
        fileset.id = store.next_fileset_id;
        let id = fileset.id;
        store.filesets.insert(id, fileset);
        id
    }

    fn insert_group(&self, mut group: HostGroup) -> i64 {
        let mut store = self.store.lock().unwrap();
        store.next_group_id += 1;
        group.id = store.next_group_id;
        let id = group.id;
        store.groups.insert(id, group);
        id
    }

    fn list_runs(&self, fileset_id: i64) -> Vec<BackupRun> {
        let store = self.store.lock().unwrap();
        let mut runs: Vec<BackupRun> = store
            .runs
            .values()
            .filter(|r| r.fileset_id == fileset_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started);
        runs
    }
}

fn recent_durations(store: &Store, fileset_id: i64, n: usize) -> Vec<u64> {
    let mut runs: Vec<&BackupRun> = store
        .runs
        .values()
        .filter(|r| r.fileset_id == fileset_id && r.success)
        .collect();
    runs.sort_by_key(|r| std::cmp::Reverse(r.started));
    runs.into_iter()
        .take(n)
        .filter_map(|r| r.duration_seconds)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlacklistHours, RetentionMap, TransportConfig};
    use crate::transport::exec::ExecConfig;

    fn sample_fileset(group_id: i64) -> Fileset {
        Fileset {
            id: 0,
            friendly_name: "web01".to_string(),
            group_id,
            group_name: "acme".to_string(),
            storage_alias: "main".to_string(),
            transport: TransportConfig::Exec(ExecConfig {
                transport_command: "/bin/true".to_string(),
            }),
            enabled: true,
            blacklist_hours: BlacklistHours::default(),
            retention: RetentionMap::default(),
            do_snapshot_size_listing: false,
            use_donotrund: false,
            tags: vec![],
            is_queued: false,
            is_running: false,
            last_ok: None,
            last_run: None,
            first_fail: None,
            average_duration: 0,
            total_size_mb: 0,
        }
    }

    #[test]
    fn claim_is_single_flight() {
        let catalog = InMemoryCatalog::new();
        let group_id = catalog.insert_group(HostGroup {
            id: 0,
            name: "acme".to_string(),
            notify_email: vec![],
            blacklist_hours: BlacklistHours::default(),
            retention: None,
        });
        let fileset_id = catalog.insert_fileset(sample_fileset(group_id));

        assert!(catalog.claim(fileset_id));
        assert!(!catalog.claim(fileset_id));
        catalog.release_queue(fileset_id);
        assert!(catalog.claim(fileset_id));
    }

    #[test]
    fn success_metrics_average_over_last_runs() {
        let catalog = InMemoryCatalog::new();
        let group_id = catalog.insert_group(HostGroup {
            id: 0,
            name: "acme".to_string(),
            notify_email: vec![],
            blacklist_hours: BlacklistHours::default(),
            retention: None,
        });
        let fileset_id = catalog.insert_fileset(sample_fileset(group_id));

        for duration in [10, 20, 30] {
            let attrs = RunAttributes {
                snapshot: "planb-x".to_string(),
                do_snapshot_size_listing: false,
            };
            let run = catalog.record_run_start(fileset_id, attrs);
            catalog.record_run_end(
                run.id,
                RunOutcome {
                    success: true,
                    duration_seconds: duration,
                    error_text: String::new(),
                    total_size_mb: 1,
                },
            );
            catalog.update_fileset_success_metrics(fileset_id, Utc::now(), duration, 1);
        }

        let fileset = catalog.get_fileset(fileset_id).unwrap();
        assert_eq!(fileset.average_duration, 20);
    }
}

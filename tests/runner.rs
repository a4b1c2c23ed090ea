//! End-to-end exercise of the job runner pipeline (§4.F) against the
//! dummy storage engine and the in-memory catalog: claim -> run -> record,
//! covering both the success and failure paths and the single-flight
//! invariant across a claim/run/clear cycle.

use std::collections::HashMap;
use std::sync::Arc;

use planb::catalog::{CatalogRepository, InMemoryCatalog};
use planb::config::StorageRegistry;
use planb::model::{BlacklistHours, Fileset, HostGroup, RetentionMap, TransportConfig};
use planb::notifier::NoopNotifier;
use planb::runner::JobRunner;
use planb::storage::dummy::DummyStorage;
use planb::storage::Storage;
use planb::transport::exec::ExecConfig;

fn storage_registry(alias: &str) -> StorageRegistry {
    let mut engines: HashMap<String, Arc<dyn Storage>> = HashMap::new();
    engines.insert(alias.to_string(), Arc::new(DummyStorage::new()));
    StorageRegistry::from_engines(engines)
}

fn base_fileset(group_id: i64, transport_command: &str) -> Fileset {
    Fileset {
        id: 0,
        friendly_name: "web01".to_string(),
        group_id,
        group_name: "acme".to_string(),
        storage_alias: "main".to_string(),
        transport: TransportConfig::Exec(ExecConfig {
            transport_command: transport_command.to_string(),
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

fn runner(catalog: Arc<dyn CatalogRepository>, storage: StorageRegistry) -> JobRunner {
    let (tx, rx) = crossbeam_channel::unbounded();
    // The dutree worker is spawned but never fed in these tests since
    // `do_snapshot_size_listing` stays false; keep the sender alive so the
    // channel doesn't disconnect under the runner's feet.
    std::mem::forget(rx);
    JobRunner {
        catalog,
        storage,
        notifier: Arc::new(NoopNotifier),
        dutree_queue: tx,
    }
}

#[test]
fn successful_run_clears_failure_state_and_records_metrics() {
    let catalog: Arc<dyn CatalogRepository> = Arc::new(InMemoryCatalog::new());
    let group_id = catalog.insert_group(HostGroup {
        id: 0,
        name: "acme".to_string(),
        notify_email: vec![],
        blacklist_hours: BlacklistHours::default(),
        retention: None,
    });
    let fileset_id = catalog.insert_fileset(base_fileset(group_id, "/bin/true"));
    let fileset = catalog.get_fileset(fileset_id).unwrap();

    assert!(catalog.claim(fileset_id));
    let job_runner = runner(catalog.clone(), storage_registry("main"));
    let result = job_runner.run(&fileset, None);
    assert!(result.is_ok());

    let after = catalog.get_fileset(fileset_id).unwrap();
    assert!(!after.is_queued);
    assert!(!after.is_running);
    assert!(after.first_fail.is_none());
    assert!(after.last_ok.is_some());

    let runs = catalog.list_runs(fileset_id);
    assert_eq!(runs.len(), 1);
    assert!(runs[0].success);
    assert!(runs[0].attributes.snapshot.starts_with("planb-"));

    // Claiming again after the runner's teardown must succeed: the
    // single-flight slot was released by `clear_runtime_flags`.
    assert!(catalog.claim(fileset_id));
}

#[test]
fn failing_transport_records_failure_and_sets_first_fail_once() {
    let catalog: Arc<dyn CatalogRepository> = Arc::new(InMemoryCatalog::new());
    let group_id = catalog.insert_group(HostGroup {
        id: 0,
        name: "acme".to_string(),
        notify_email: vec![],
        blacklist_hours: BlacklistHours::default(),
        retention: None,
    });
    let fileset_id = catalog.insert_fileset(base_fileset(group_id, "/bin/false"));

    let job_runner = runner(catalog.clone(), storage_registry("main"));

    let fileset = catalog.get_fileset(fileset_id).unwrap();
    assert!(job_runner.run(&fileset, None).is_err());
    let after_first = catalog.get_fileset(fileset_id).unwrap();
    assert!(after_first.first_fail.is_some());
    let first_fail_at = after_first.first_fail;

    // A second failing run must not move `first_fail` forward.
    assert!(job_runner.run(&after_first, None).is_err());
    let after_second = catalog.get_fileset(fileset_id).unwrap();
    assert_eq!(after_second.first_fail, first_fail_at);

    let runs = catalog.list_runs(fileset_id);
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| !r.success));
    assert!(!runs[0].error_text.is_empty());
}

#[test]
fn run_takes_a_single_snapshot_and_applies_retention() {
    let catalog: Arc<dyn CatalogRepository> = Arc::new(InMemoryCatalog::new());
    let group_id = catalog.insert_group(HostGroup {
        id: 0,
        name: "acme".to_string(),
        notify_email: vec![],
        blacklist_hours: BlacklistHours::default(),
        retention: None,
    });
    let mut fileset_cfg = base_fileset(group_id, "/bin/true");
    fileset_cfg.retention = RetentionMap::default();
    let fileset_id = catalog.insert_fileset(fileset_cfg);
    let fileset = catalog.get_fileset(fileset_id).unwrap();

    let storage = storage_registry("main");
    let job_runner = runner(catalog.clone(), storage.clone());
    job_runner.run(&fileset, None).unwrap();

    let dataset = storage
        .get("main")
        .unwrap()
        .get_dataset(&fileset.group_name, &fileset.friendly_name);
    let snapshots = dataset.snapshot_list().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0].name.starts_with("planb-"));
}

#[test]
fn manual_trigger_uses_the_supplied_archive_name() {
    let catalog: Arc<dyn CatalogRepository> = Arc::new(InMemoryCatalog::new());
    let group_id = catalog.insert_group(HostGroup {
        id: 0,
        name: "acme".to_string(),
        notify_email: vec![],
        blacklist_hours: BlacklistHours::default(),
        retention: None,
    });
    let fileset_id = catalog.insert_fileset(base_fileset(group_id, "/bin/true"));
    let fileset = catalog.get_fileset(fileset_id).unwrap();

    let storage = storage_registry("main");
    let job_runner = runner(catalog.clone(), storage.clone());
    job_runner
        .run(&fileset, Some("pre-migration".to_string()))
        .unwrap();

    let dataset = storage
        .get("main")
        .unwrap()
        .get_dataset(&fileset.group_name, &fileset.friendly_name);
    let snapshots = dataset.snapshot_list().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].name, "pre-migration");

    let runs = catalog.list_runs(fileset_id);
    assert_eq!(runs[0].attributes.snapshot, "pre-migration");
}

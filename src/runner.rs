//! Per-fileset job pipeline: `Queued -> Running -> (Success |
//! Failure)`, with workon/transport/snapshot/retention/record steps and a
//! `finally` teardown that always runs, generalized from a single
//! in-process "acquire, act, always tear down" loop into a pipeline
//! invoked once per claimed fileset by a worker pool.

use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::catalog::{CatalogRepository, RunOutcome};
use crate::config::StorageRegistry;
use crate::dutree;
use crate::error::{RunError, StorageError};
use crate::model::{Fileset, RunAttributes};
use crate::notifier::Notifier;
use crate::retention;
use crate::transport::{Transport, TransportContext};

/// A post-processing job handed to the dedicated single-worker dutree
/// queue. Kept data-only so it can cross a channel.
pub struct DutreeJob {
    pub run_id: i64,
    pub snapshot_path: std::path::PathBuf,
}

/// Runs dutree jobs one at a time on its own worker, matching its
/// "dedicated single-worker queue" requirement — this is deliberately not
/// folded into the main worker pool so a slow size scan never blocks a
/// backup slot.
pub fn spawn_dutree_worker(
    catalog: std::sync::Arc<dyn CatalogRepository>,
    receiver: crossbeam_channel::Receiver<DutreeJob>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for job in receiver.iter() {
            match dutree::scan(&job.snapshot_path) {
                Ok(entries) => {
                    let total = dutree::total_bytes(&entries);
                    let listing = dutree::to_yaml(&entries);
                    catalog.update_snapshot_size_listing(
                        job.run_id,
                        total / (1024 * 1024),
                        listing,
                    );
                }
                Err(e) => {
                    log::warn!("dutree scan failed for run {}: {e}", job.run_id);
                }
            }
        }
    })
}

pub struct JobRunner {
    pub catalog: std::sync::Arc<dyn CatalogRepository>,
    pub storage: StorageRegistry,
    pub notifier: std::sync::Arc<dyn Notifier>,
    pub dutree_queue: crossbeam_channel::Sender<DutreeJob>,
}

impl JobRunner {
    /// Execute the full pipeline for an already-claimed fileset. `custom_name`
    /// is `Some` only for manual triggers requesting an archive-class
    /// snapshot.
    pub fn run(&self, fileset: &Fileset, custom_name: Option<String>) -> Result<(), RunError> {
        self.catalog.mark_running(fileset.id);
        let snapshot_target = custom_name.unwrap_or_else(|| retention::auto_snapshot_name(Utc::now()));
        let attributes = RunAttributes {
            snapshot: snapshot_target.clone(),
            do_snapshot_size_listing: fileset.do_snapshot_size_listing,
        };
        let run = self.catalog.record_run_start(fileset.id, attributes);
        let t0 = Instant::now();

        let outcome = self.run_inner(fileset, &snapshot_target);

        // Step 9: finally — release workon happened inside run_inner's own
        // guard scope; here we only need the catalog-facing teardown.
        self.catalog.clear_runtime_flags(fileset.id);

        match outcome {
            Ok(total_size_mb) => {
                let duration = t0.elapsed().as_secs();
                let had_prior_failure = fileset.first_fail.is_some();
                self.catalog.record_run_end(
                    run.id,
                    RunOutcome {
                        success: true,
                        duration_seconds: duration,
                        error_text: String::new(),
                        total_size_mb,
                    },
                );
                self.catalog
                    .update_fileset_success_metrics(fileset.id, Utc::now(), duration, total_size_mb);
                if had_prior_failure {
                    self.notifier.recovered(fileset);
                }
                log::info!("backup_done fileset={fileset} success=true");

                if fileset.do_snapshot_size_listing {
                    let dataset = self.storage.get(&fileset.storage_alias)?.get_dataset(
                        &fileset.group_name,
                        &fileset.friendly_name,
                    );
                    let snapshot_path = dataset.get_snapshot_path(&snapshot_target);
                    let _ = self.dutree_queue.send(DutreeJob {
                        run_id: run.id,
                        snapshot_path,
                    });
                }
                Ok(())
            }
            Err(e) => {
                let duration = t0.elapsed().as_secs();
                self.catalog.record_run_end(
                    run.id,
                    RunOutcome {
                        success: false,
                        duration_seconds: duration,
                        error_text: e.to_string(),
                        total_size_mb: 0,
                    },
                );
                let now = Utc::now();
                self.catalog.update_fileset_failure(fileset.id, now);
                if fileset.first_fail.is_none() {
                    self.notifier.first_failure(fileset, &e.to_string());
                }
                log::warn!("backup_done fileset={fileset} success=false error={e}");
                Err(e)
            }
        }
    }

    /// Steps 2-6: workon, transport, snapshot, retention. Returns the
    /// dataset's used size in MB on success. The workon guard is released
    /// (mount torn down) when this function returns, regardless of path.
    fn run_inner(&self, fileset: &Fileset, snapshot_target: &str) -> Result<u64, RunError> {
        let storage = self.storage.get(&fileset.storage_alias)?;
        let dataset = storage.get_dataset(&fileset.group_name, &fileset.friendly_name);
        dataset.ensure_exists()?;

        let workon = dataset.workon()?;

        let ctx = TransportContext {
            fileset,
            guid: Uuid::new_v4(),
            snapshot_target: snapshot_target.to_string(),
            storage_destination: workon.path().to_path_buf(),
        };

        let transport_result = fileset.transport.run_transport(&ctx);
        let transport_outcome = match transport_result {
            Ok(()) => Ok(()),
            Err(e) if e.is_harmless() => {
                log::warn!("transport reported harmless error for {fileset}: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        };

        let result = transport_outcome
            .map_err(RunError::from)
            .and_then(|()| {
                dataset.snapshot_create(snapshot_target)?;
                Ok(())
            })
            .and_then(|()| {
                if let Err(e) = self.run_retention(&*dataset, fileset) {
                    // retention failures are logged, never fail the run.
                    log::warn!("retention failed for {fileset}: {e}");
                }
                dataset
                    .get_used_size()
                    .map(|bytes| bytes / (1024 * 1024))
                    .map_err(RunError::from)
            });

        // Step 9's "finally" teardown for the workon guard itself: always
        // release, and surface a teardown failure as a warning rather than
        // masking whatever `result` already carries.
        if let Err(e) = workon.release() {
            log::error!("failed to release workon for {fileset}: {e}");
        }

        result
    }

    fn run_retention(
        &self,
        dataset: &dyn crate::storage::Dataset,
        fileset: &Fileset,
    ) -> Result<(), StorageError> {
        let snapshots = dataset.snapshot_list()?;
        let outcome = retention::apply(&snapshots, &fileset.retention);
        for name in &outcome.deleted {
            dataset.snapshot_delete(name)?;
        }
        Ok(())
    }
}

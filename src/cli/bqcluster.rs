//! `bqcluster [--queue=NAME] [--run-once]`: runs the scheduler tick
//! loop plus a bounded worker pool of job runners. This is the daemon
//! heart of PlanB — a tick loop driving N concurrent job runners drawn
//! from a `crossbeam-channel` queue, plus the dedicated single-worker
//! dutree queue.

use std::sync::Arc;
use std::time::Duration;

use crate::notifier::{ConsoleNotifier, Notifier};
use crate::runner::{spawn_dutree_worker, DutreeJob, JobRunner};
use crate::scheduler::{Scheduler, SchedulerConfig};

use super::CliContext;

pub struct BqclusterArgs {
    pub run_once: bool,
}

pub fn run(ctx: &CliContext, args: BqclusterArgs) -> color_eyre::Result<()> {
    let scheduler_config = SchedulerConfig {
        tick_interval: Duration::from_secs(ctx.config.scheduler.tick_seconds),
        global_blacklist_hours: ctx.config.scheduler.blacklist_hours.parse()?,
        do_not_run_dir: ctx.config.scheduler.do_not_run_dir.clone(),
    };
    let scheduler = Scheduler {
        catalog: ctx.catalog.clone(),
        config: scheduler_config,
    };

    let worker_count = ctx.config.scheduler.worker_count.max(1);
    let (job_tx, job_rx) = crossbeam_channel::unbounded::<crate::model::Fileset>();
    let (dutree_tx, dutree_rx) = crossbeam_channel::unbounded::<DutreeJob>();

    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
    let dutree_handle = spawn_dutree_worker(ctx.catalog.clone(), dutree_rx);

    let mut worker_handles = Vec::new();
    for worker_id in 0..worker_count {
        let job_rx = job_rx.clone();
        let catalog = ctx.catalog.clone();
        let storage = ctx.storage.clone();
        let notifier = notifier.clone();
        let dutree_tx = dutree_tx.clone();
        worker_handles.push(std::thread::spawn(move || {
            let runner = JobRunner {
                catalog,
                storage,
                notifier,
                dutree_queue: dutree_tx,
            };
            for fileset in job_rx.iter() {
                log::info!("worker {worker_id} picked up {fileset}");
                if let Err(e) = runner.run(&fileset, None) {
                    log::warn!("run failed for {fileset}: {e}");
                }
            }
        }));
    }

    loop {
        for fileset in scheduler.tick() {
            let _ = job_tx.send(fileset);
        }
        if args.run_once {
            break;
        }
        std::thread::sleep(scheduler.config.tick_interval);
    }

    drop(job_tx);
    for handle in worker_handles {
        let _ = handle.join();
    }
    drop(dutree_tx);
    let _ = dutree_handle.join();

    Ok(())
}

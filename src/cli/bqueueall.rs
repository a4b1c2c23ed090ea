//! `bqueueall`: enqueue every enabled fileset for immediate backup,
//! going through the same `claim()` single-flight gate the scheduler uses
//! so a manual full-queue never double-dispatches a fileset the scheduler
//! already claimed this tick.

use super::CliContext;

pub fn run(ctx: &CliContext) -> color_eyre::Result<usize> {
    let mut queued = 0;
    for fileset in ctx.catalog.list_filesets() {
        if !fileset.enabled {
            continue;
        }
        if ctx.catalog.claim(fileset.id) {
            queued += 1;
            log::info!("queued {fileset} for immediate backup");
        }
    }
    Ok(queued)
}

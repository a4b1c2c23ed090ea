//! `bqueueflush [--queue=NAME]`: purge DB and broker queues — here,
//! release every fileset's queue claim so a stuck or manually-queued
//! fileset becomes claimable again.

use super::CliContext;

pub fn run(ctx: &CliContext) -> color_eyre::Result<usize> {
    let mut flushed = 0;
    for fileset in ctx.catalog.list_filesets() {
        if fileset.is_queued {
            ctx.catalog.release_queue(fileset.id);
            ctx.catalog.clear_runtime_flags(fileset.id);
            flushed += 1;
        }
    }
    Ok(flushed)
}

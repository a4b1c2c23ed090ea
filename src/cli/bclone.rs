//! `bclone <fileset_id> <new_friendly_name> <new_host>`: deep-copy a
//! fileset's configuration and its transport, reset all runtime state, and
//! immediately queue the clone.

use color_eyre::eyre::{eyre, Result};

use crate::model::TransportConfig;

use super::CliContext;

pub fn run(
    ctx: &CliContext,
    fileset_id: i64,
    new_friendly_name: &str,
    new_host: &str,
) -> Result<i64> {
    let mut source = ctx
        .catalog
        .get_fileset(fileset_id)
        .ok_or_else(|| eyre!("no such fileset: {fileset_id}"))?;

    source.friendly_name = new_friendly_name.to_string();
    match &mut source.transport {
        TransportConfig::Rsync(cfg) => cfg.host = new_host.to_string(),
        TransportConfig::Exec(_) => {
            log::warn!(
                "bclone: exec transport does not carry a host field, new_host {new_host:?} ignored"
            );
        }
    }

    // Reset runtime state.
    source.id = 0;
    source.is_queued = false;
    source.is_running = false;
    source.last_ok = None;
    source.last_run = None;
    source.first_fail = None;
    source.average_duration = 0;
    source.total_size_mb = 0;

    let new_id = ctx.catalog.insert_fileset(source);
    ctx.catalog.claim(new_id);
    Ok(new_id)
}

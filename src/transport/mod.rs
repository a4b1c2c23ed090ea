//! Transport drivers: the pluggable subsystem that moves bytes into
//! a fileset's data directory. Two implementations — [`rsync`] (rsync over
//! SSH or rsync-daemon) and [`exec`] (arbitrary user command) — behind one
//! `Transport` trait, mirroring the zfs storage engine's single-exec-wrapper
//! style (`call_read`/`call_do`) generalized to "run an external command,
//! classify its exit".

pub mod exec;
pub mod rsync;

use std::path::PathBuf;

use uuid::Uuid;

use crate::error::TransportError;
use crate::model::Fileset;

/// Everything a transport needs to know about the run it's serving,
/// captured once at invocation time so the transport never has to reach
/// back into catalog state.
pub struct TransportContext<'a> {
    pub fileset: &'a Fileset,
    pub guid: Uuid,
    pub snapshot_target: String,
    pub storage_destination: PathBuf,
}

impl TransportContext<'_> {
    fn storage_name(&self) -> String {
        self.fileset.dataset_name()
    }
}

/// Common contract: execute the external data-import step, blocking
/// until it completes. `Harmless` transport errors (rsync code 24) are
/// still returned here — the caller (job runner) decides whether a harmless
/// error fails the run.
pub trait Transport: Send + Sync {
    fn run_transport(&self, ctx: &TransportContext<'_>) -> Result<(), TransportError>;
}

/// Minimal environment allow-list passed to child processes, reused by both drivers since rsync also spawns through a
/// shell-less argv and benefits from a clean environment.
pub(crate) fn base_env() -> Vec<(&'static str, String)> {
    let mut env = Vec::new();
    for key in ["PATH", "HOME", "PWD", "SHELL", "USER"] {
        if let Ok(value) = std::env::var(key) {
            env.push((key, value));
        }
    }
    env
}

pub(crate) fn planb_env(ctx: &TransportContext<'_>) -> Vec<(&'static str, String)> {
    vec![
        ("planb_guid", ctx.guid.to_string()),
        ("planb_fileset_id", ctx.fileset.id.to_string()),
        ("planb_fileset_friendly_name", ctx.fileset.friendly_name.clone()),
        ("planb_snapshot_target", ctx.snapshot_target.clone()),
        ("planb_storage_name", ctx.storage_name()),
        (
            "planb_storage_destination",
            ctx.storage_destination.display().to_string(),
        ),
    ]
}

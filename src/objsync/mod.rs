//! `objsync`: the object-store mirror pipeline, split into
//! [`config`] (per-section INI configuration), [`listing`] (the `ListLine`
//! grammar and comm-merge), [`client`] (the object-store capability trait
//! plus its `reqwest`-backed implementation), [`translate`] (path
//! translation/exclusion rules) and [`sync`] (the eight-step pipeline
//! itself).
//!
//! This module also owns the process-wide abort flag. `planb-objsync` is the one binary in
//! this crate that installs signal handlers, since it is the one pipeline
//! with tight per-chunk/per-record loops that need to notice SIGTERM
//! mid-run; `signal-hook`'s `flag` module gives us that without
//! hand-rolling a signal handler.

pub mod client;
pub mod config;
pub mod listing;
pub mod sync;
pub mod translate;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared, cheaply-cloneable abort flag. `is_set()` is polled between
/// pipeline stages and inside the per-record/per-chunk loops; `register_signal_handlers` flips it on `SIGHUP`/`SIGINT`/`SIGTERM`/
/// `SIGQUIT`.
#[derive(Clone)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Install handlers for SIGHUP/SIGINT/SIGTERM/SIGQUIT. Best-effort:
    /// a registration failure is logged and otherwise ignored, since a
    /// missing handler degrades termination promptness, not correctness.
    pub fn register_signal_handlers(&self) -> Result<(), std::io::Error> {
        for signal in [
            signal_hook::consts::SIGHUP,
            signal_hook::consts::SIGINT,
            signal_hook::consts::SIGTERM,
            signal_hook::consts::SIGQUIT,
        ] {
            signal_hook::flag::register(signal, self.0.clone())?;
        }
        Ok(())
    }
}

impl Default for AbortFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_latches_once_set() {
        let flag = AbortFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }

    #[test]
    fn clones_share_the_same_underlying_flag() {
        let flag = AbortFlag::new();
        let handle = flag.clone();
        handle.set();
        assert!(flag.is_set());
    }
}

//! Notifications on state transitions: user-visible failures surface via
//! admin email for first-occurrence and recovery transitions. Grounded on
//! `models.py`'s `save()` override (mail on `enabled` toggle) and
//! `core/tasks.py`'s mail on first-failure/recovery. The real mail
//! transport is an external collaborator — this module only defines the
//! trait and the call sites, plus a console implementation good enough for
//! single-operator deployments and tests.

use crate::model::Fileset;

pub trait Notifier: Send + Sync {
    fn first_failure(&self, fileset: &Fileset, error_text: &str);
    fn recovered(&self, fileset: &Fileset);
    fn enabled_changed(&self, fileset: &Fileset, enabled: bool);
}

#[derive(Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn first_failure(&self, fileset: &Fileset, error_text: &str) {
        log::warn!("[notify] {fileset} started failing: {error_text}");
    }

    fn recovered(&self, fileset: &Fileset) {
        log::info!("[notify] {fileset} recovered");
    }

    fn enabled_changed(&self, fileset: &Fileset, enabled: bool) {
        log::info!(
            "[notify] {fileset} {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }
}

#[derive(Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn first_failure(&self, _fileset: &Fileset, _error_text: &str) {}
    fn recovered(&self, _fileset: &Fileset) {}
    fn enabled_changed(&self, _fileset: &Fileset, _enabled: bool) {}
}

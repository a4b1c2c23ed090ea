//! Scheduler: a tick loop that scans the catalog for eligible
//! filesets, claims them, and dispatches each to the job-runner worker
//! pool, generalized from "one dataset, one retention policy, sleep until
//! due" into "many filesets, each with independent eligibility and a
//! claim/dispatch handoff" via a `crossbeam-channel` work queue rather
//! than doing the work inline.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike, Utc};

use crate::catalog::CatalogRepository;
use crate::model::{BlacklistHours, Fileset, effective_blacklist_hours};

/// One local-time failure back-off window.
const FAILURE_BACKOFF: chrono::Duration = chrono::Duration::hours(1);

pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub global_blacklist_hours: BlacklistHours,
    pub do_not_run_dir: Option<std::path::PathBuf>,
}

pub struct Scheduler {
    pub catalog: Arc<dyn CatalogRepository>,
    pub config: SchedulerConfig,
}

/// What the scheduler decided to do with one candidate, surfaced mainly
/// for tests — the live loop only cares about `Eligible`.
#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    Eligible,
    Ineligible(&'static str),
    ClaimContention,
}

impl Scheduler {
    /// One tick: returns the filesets this tick decided
    /// to dispatch (already claimed; the caller is responsible for handing
    /// each to a worker and eventually calling `clear_runtime_flags`).
    pub fn tick(&self) -> Vec<Fileset> {
        let mut dispatched = Vec::new();
        for fileset in self.catalog.list_candidates() {
            if !self.catalog.claim(fileset.id) {
                continue;
            }
            let group_blacklist = self
                .catalog
                .get_group(fileset.group_id)
                .map(|g| g.blacklist_hours)
                .unwrap_or_default();
            match self.evaluate_with_group(&fileset, &group_blacklist, Utc::now(), Local::now().hour() as u8) {
                Decision::Eligible => dispatched.push(fileset),
                _ => self.catalog.release_queue(fileset.id),
            }
        }
        dispatched
    }

    /// Eligibility evaluation against the global blacklist only (no
    /// group-level override) — used directly by callers, such as the
    /// manual-trigger path, that have not resolved a `HostGroup`.
    pub fn evaluate(&self, fileset: &Fileset, now: chrono::DateTime<Utc>) -> Decision {
        self.evaluate_with_group(
            fileset,
            &BlacklistHours::default(),
            now,
            Local::now().hour() as u8,
        )
    }

    /// Evaluate with an explicit group so callers that have group-level
    /// blacklist overrides can use the full precedence
    /// chain instead of the fileset/global-only shortcut in `evaluate`.
    pub fn evaluate_with_group(
        &self,
        fileset: &Fileset,
        group_blacklist: &BlacklistHours,
        now: chrono::DateTime<Utc>,
        local_hour: u8,
    ) -> Decision {
        if !fileset.enabled {
            return Decision::Ineligible("disabled");
        }
        if !should_backup(fileset, now) {
            return Decision::Ineligible("not due");
        }
        if let Some(first_fail) = fileset.first_fail {
            if now - fileset.last_run.unwrap_or(first_fail) < FAILURE_BACKOFF {
                return Decision::Ineligible("failure back-off");
            }
        }
        let effective = effective_blacklist_hours(
            &fileset.blacklist_hours,
            group_blacklist,
            &self.config.global_blacklist_hours,
        );
        if effective.contains(local_hour) {
            return Decision::Ineligible("blacklist hour");
        }
        if fileset.use_donotrund && do_not_run_marker_present(&self.config.do_not_run_dir) {
            return Decision::Ineligible("do-not-run marker present");
        }
        Decision::Eligible
    }

    /// Manual trigger: bypasses the schedule check
    /// but still goes through `claim` and may request a custom (archive
    /// class) snapshot name.
    pub fn manual_trigger(&self, fileset_id: i64) -> Result<Fileset, Decision> {
        let Some(fileset) = self.catalog.get_fileset(fileset_id) else {
            return Err(Decision::Ineligible("unknown fileset"));
        };
        if !self.catalog.claim(fileset_id) {
            return Err(Decision::ClaimContention);
        }
        Ok(fileset)
    }
}

/// Eligibility check for `should_backup()`.
pub fn should_backup(fileset: &Fileset, now: chrono::DateTime<Utc>) -> bool {
    if !fileset.enabled {
        return false;
    }
    if fileset.first_fail.is_some() {
        return true;
    }
    let Some(last_ok) = fileset.last_ok else {
        return true;
    };
    let same_calendar_day =
        last_ok.with_timezone(&Local).date_naive() == now.with_timezone(&Local).date_naive();
    let within_8h = now - last_ok <= chrono::Duration::hours(8);
    // Both sub-conditions must hold for "recent" - a backup that crossed a
    // calendar-day boundary counts as due again even if only a few hours
    // old (see the worked example: 19:00 -> next day 00:00Z is due).
    let is_recent = same_calendar_day && within_8h;
    if !is_recent {
        return true;
    }
    let average = chrono::Duration::seconds(fileset.average_duration as i64);
    (now - last_ok + average) >= chrono::Duration::hours(24)
}

/// Delay if the directory exists and contains
/// at least one non-dot file; fileset-level opt-in via `use_donotrund`.
fn do_not_run_marker_present(dir: &Option<std::path::PathBuf>) -> bool {
    let Some(dir) = dir else { return false };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(|e| e.ok()).any(|entry| {
        !entry.file_name().to_string_lossy().starts_with('.')
    })
}

pub fn parse_blacklist_hours(s: &str) -> Result<BlacklistHours, crate::error::ConfigError> {
    BlacklistHours::from_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_fileset() -> Fileset {
        use crate::model::{RetentionMap, TransportConfig};
        use crate::transport::exec::ExecConfig;
        Fileset {
            id: 1,
            friendly_name: "web".to_string(),
            group_id: 1,
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
    fn should_backup_true_without_prior_run() {
        assert!(should_backup(&base_fileset(), Utc::now()));
    }

    #[test]
    fn should_backup_timing_scenario_from_spec() {
        let mut fileset = base_fileset();
        fileset.last_ok = Some(Utc.with_ymd_and_hms(2020, 5, 19, 19, 0, 0).unwrap());
        fileset.average_duration = 0;
        let now = Utc.with_ymd_and_hms(2020, 5, 20, 0, 0, 0).unwrap();
        assert!(should_backup(&fileset, now));
    }

    #[test]
    fn should_backup_false_when_recent_and_fast() {
        let mut fileset = base_fileset();
        let now = Utc::now();
        fileset.last_ok = Some(now - chrono::Duration::hours(1));
        fileset.average_duration = 60;
        assert!(!should_backup(&fileset, now));
    }

    #[test]
    fn should_backup_true_once_first_fail_is_set() {
        let mut fileset = base_fileset();
        let now = Utc::now();
        fileset.last_ok = Some(now - chrono::Duration::hours(1));
        fileset.first_fail = Some(now - chrono::Duration::minutes(30));
        assert!(should_backup(&fileset, now));
    }

    #[test]
    fn blacklist_hours_scenario_from_spec() {
        let fileset_bh: BlacklistHours = "9-17".parse().unwrap();
        let group_bh: BlacklistHours = "11-14".parse().unwrap();
        let global_bh: BlacklistHours = "8-18".parse().unwrap();
        let effective = effective_blacklist_hours(&fileset_bh, &group_bh, &global_bh);
        assert!(effective.contains(10));
    }
}

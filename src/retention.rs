//! Calendar-bucketed retention: snapshots are grouped into per-unit
//! calendar windows (newest to oldest), and each unit keeps its
//! most-recent windows' representatives until its count is spent.
//! Unlike a simple "one representative per window" scheme, the window
//! where a unit's budget runs out (or the final window when a unit's
//! budget outlasts the data) keeps *both* its newest and oldest member,
//! so the boundary between "kept" and "pruned" is visible in the
//! surviving set rather than silently falling on whichever side a
//! single representative happened to land. See `DESIGN.md` for how this
//! relates to an earlier pure pairwise-delta algorithm that solved the
//! same problem and was not carried forward.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{RetentionMap, RetentionUnit, Snapshot};

const SNAPSHOT_PREFIX: &str = "planb-";

static AUTO_SNAPSHOT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^planb-\d{8}T\d{4}Z$").unwrap());

fn is_auto_snapshot(name: &str) -> bool {
    AUTO_SNAPSHOT_RE.is_match(name)
}

/// Construct the retention-managed snapshot name for an instant, per
/// its wire-level naming rule `planb-YYYYMMDDThhmmZ`.
pub fn auto_snapshot_name(at: DateTime<Utc>) -> String {
    format!("{SNAPSHOT_PREFIX}{}", at.format("%Y%m%dT%H%MZ"))
}

/// The calendar bucket a timestamp falls into for a given unit. Includes
/// the year in every variant (even `Week`, via `iso_week().year()`) so
/// two instants a full cycle apart never collide on label alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodKey {
    Hour(NaiveDate, u32),
    Day(NaiveDate),
    Week(i32, u32),
    Month(i32, u32),
    Year(i32),
}

fn period_key(unit: RetentionUnit, created: DateTime<Utc>) -> PeriodKey {
    match unit {
        RetentionUnit::Hour => PeriodKey::Hour(created.date_naive(), created.hour()),
        RetentionUnit::Day => PeriodKey::Day(created.date_naive()),
        RetentionUnit::Week => {
            let iso = created.iso_week();
            PeriodKey::Week(iso.year(), iso.week())
        }
        RetentionUnit::Month => PeriodKey::Month(created.year(), created.month()),
        RetentionUnit::Year => PeriodKey::Year(created.year()),
    }
}

/// Partition `snapshots_newest_first` into contiguous runs of equal
/// `period_key`. Since the input is sorted newest to oldest and a
/// period key only ever changes monotonically with time, one pass
/// suffices; each run's first entry is its newest member, its last is
/// its oldest.
fn group_by_period<'a>(
    snapshots_newest_first: &[&'a Snapshot],
    unit: RetentionUnit,
) -> Vec<Vec<&'a Snapshot>> {
    let mut windows: Vec<Vec<&Snapshot>> = Vec::new();
    let mut current_key = None;
    for &snapshot in snapshots_newest_first {
        let key = period_key(unit, snapshot.created);
        if current_key == Some(key) {
            windows.last_mut().expect("current_key implies a window exists").push(snapshot);
        } else {
            windows.push(vec![snapshot]);
            current_key = Some(key);
        }
    }
    windows
}

/// Scan `snapshots_newest_first` and keep representatives of its most
/// recent `count` distinct period-`unit` windows.
///
/// If there are at most `count` windows, every window before the last
/// keeps its newest member, and the last (oldest) window keeps both its
/// newest and oldest member. If there are more windows than `count`,
/// every window before the `count`-th keeps its newest member, the
/// `count`-th window keeps its oldest member (marking where the budget
/// closes), and the window immediately after it keeps its newest member
/// (marking where pruning resumes).
fn keep_for_unit<'a>(
    snapshots_newest_first: &[&'a Snapshot],
    unit: RetentionUnit,
    count: usize,
) -> HashSet<&'a Snapshot> {
    let mut kept = HashSet::new();
    if count == 0 {
        return kept;
    }
    let windows = group_by_period(snapshots_newest_first, unit);
    let total = windows.len();
    if total == 0 {
        return kept;
    }
    if total <= count {
        for window in &windows[..total - 1] {
            kept.insert(window[0]);
        }
        let last = &windows[total - 1];
        kept.insert(last[0]);
        kept.insert(last[last.len() - 1]);
    } else {
        for window in &windows[..count - 1] {
            kept.insert(window[0]);
        }
        let closing = &windows[count - 1];
        kept.insert(closing[closing.len() - 1]);
        let beyond = &windows[count];
        kept.insert(beyond[0]);
    }
    kept
}

/// Result of applying a retention map to a snapshot list: the names to
/// delete, oldest first.
#[derive(Debug, Default)]
pub struct RetentionOutcome {
    pub deleted: Vec<String>,
}

/// Apply the retention map to `snapshots`, which need not be sorted;
/// non-`planb-*` names are left untouched (never returned in `deleted`).
pub fn apply(snapshots: &[Snapshot], retention: &RetentionMap) -> RetentionOutcome {
    let mut auto: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|s| is_auto_snapshot(&s.name))
        .collect();
    auto.sort_by(|a, b| b.created.cmp(&a.created));

    let mut kept: HashSet<&Snapshot> = HashSet::new();
    for (unit, count) in retention.0.iter() {
        kept.extend(keep_for_unit(&auto, *unit, *count));
    }

    if kept.is_empty() {
        if let Some(newest) = auto.first() {
            kept.insert(newest);
        }
    }

    let deleted: Vec<String> = auto
        .iter()
        .rev()
        .filter(|s| !kept.contains(**s))
        .map(|s| s.name.clone())
        .collect();
    RetentionOutcome { deleted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn snap(hours_ago: i64) -> Snapshot {
        let created = Utc::now() - Duration::hours(hours_ago);
        Snapshot {
            name: auto_snapshot_name(created),
            created,
        }
    }

    fn named(name: &str, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Snapshot {
        Snapshot {
            name: name.to_string(),
            created: Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap(),
        }
    }

    fn retention(pairs: &[(RetentionUnit, usize)]) -> RetentionMap {
        RetentionMap(pairs.iter().copied().collect())
    }

    #[test]
    fn ignores_non_auto_snapshots() {
        let custom = Snapshot {
            name: "custom-archive".to_string(),
            created: Utc::now() - Duration::hours(1),
        };
        let snapshots = vec![custom, snap(2)];
        let out = apply(&snapshots, &retention(&[(RetentionUnit::Day, 1)]));
        assert!(!out.deleted.contains(&"custom-archive".to_string()));
    }

    #[test]
    fn auto_snapshot_name_matches_grammar() {
        let name = auto_snapshot_name(Utc.with_ymd_and_hms(2020, 5, 4, 17, 0, 0).unwrap());
        assert_eq!(name, "planb-20200504T1700Z");
        assert!(is_auto_snapshot(&name));
    }

    #[test]
    fn keeps_one_window_per_day_plus_boundary_pair_when_windows_outlast_count() {
        // 10 distinct calendar days, count=3: windows 1 and 2 keep their
        // newest (themselves, being singletons), window 3 closes the
        // budget and window 4 is the boundary peek beyond it.
        let snapshots: Vec<Snapshot> = (0..10).map(|day| snap(day * 24)).collect();
        let out = apply(&snapshots, &retention(&[(RetentionUnit::Day, 3)]));
        assert_eq!(out.deleted.len(), 6);
    }

    #[test]
    fn never_prunes_the_last_remaining_snapshot() {
        let snapshots = vec![snap(1000)];
        let out = apply(&snapshots, &retention(&[(RetentionUnit::Day, 0)]));
        assert!(out.deleted.is_empty());
    }

    #[test]
    fn retention_pruning_scenario_from_spec() {
        let snapshots = vec![
            named("planb-20200502T1743Z", 2020, 5, 2, 17, 43),
            named("planb-20200503T1801Z", 2020, 5, 3, 18, 1),
            named("planb-20200504T1602Z", 2020, 5, 4, 16, 2),
            named("planb-20200102T0912Z", 2020, 1, 2, 9, 12),
            named("planb-20200504T1458Z", 2020, 5, 4, 14, 58),
            named("planb-20200504T1655Z", 2020, 5, 4, 16, 55),
            named("planb-20200504T1700Z", 2020, 5, 4, 17, 0),
        ];
        let out = apply(
            &snapshots,
            &retention(&[(RetentionUnit::Hour, 2), (RetentionUnit::Year, 1)]),
        );
        let mut deleted = out.deleted.clone();
        deleted.sort();
        let mut expected = vec![
            "planb-20200504T1655Z".to_string(),
            "planb-20200503T1801Z".to_string(),
            "planb-20200502T1743Z".to_string(),
        ];
        expected.sort();
        assert_eq!(deleted, expected);
    }

    #[test]
    fn idempotent_on_already_retained_set() {
        let snapshots = vec![snap(0), snap(24), snap(48)];
        let r = retention(&[(RetentionUnit::Day, 2)]);
        let first = apply(&snapshots, &r);
        let remaining: Vec<Snapshot> = snapshots
            .into_iter()
            .filter(|s| !first.deleted.contains(&s.name))
            .collect();
        let second = apply(&remaining, &r);
        assert!(second.deleted.is_empty());
    }

    #[test]
    fn period_key_distinguishes_adjacent_hours() {
        let a = Utc.with_ymd_and_hms(2020, 5, 4, 17, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2020, 5, 4, 17, 59, 0).unwrap();
        let c = Utc.with_ymd_and_hms(2020, 5, 4, 18, 1, 0).unwrap();
        assert_eq!(period_key(RetentionUnit::Hour, a), period_key(RetentionUnit::Hour, b));
        assert_ne!(period_key(RetentionUnit::Hour, a), period_key(RetentionUnit::Hour, c));
    }
}

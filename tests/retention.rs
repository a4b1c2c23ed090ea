//! Cross-module retention scenarios exercised through the public API,
//! rather than `retention.rs`'s internal unit tests.

use chrono::{TimeZone, Utc};
use planb::model::{RetentionMap, Snapshot};
use planb::retention::apply;

fn snap(name: &str, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Snapshot {
    Snapshot {
        name: name.to_string(),
        created: Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap(),
    }
}

#[test]
fn pruning_mixed_named_snapshots() {
    let snapshots = vec![
        snap("planb-20200502T1743Z", 2020, 5, 2, 17, 43),
        snap("planb-20200503T1801Z", 2020, 5, 3, 18, 1),
        snap("planb-20200504T1602Z", 2020, 5, 4, 16, 2),
        snap("hello", 2020, 5, 4, 0, 0),
        snap("planb-20200102T0912Z", 2020, 1, 2, 9, 12),
        snap("planb-20200504T1458Z", 2020, 5, 4, 14, 58),
        snap("planb-20200504T1655Z", 2020, 5, 4, 16, 55),
        snap("archive-20200504T1458Z", 2020, 5, 4, 14, 58),
        snap("planb-20200504T1700Z", 2020, 5, 4, 17, 0),
    ];
    let retention: RetentionMap = "2h,1y".parse().unwrap();
    let out = apply(&snapshots, &retention);

    let mut deleted = out.deleted.clone();
    deleted.sort();
    let mut expected = vec![
        "planb-20200504T1655Z".to_string(),
        "planb-20200503T1801Z".to_string(),
        "planb-20200502T1743Z".to_string(),
    ];
    expected.sort();
    assert_eq!(deleted, expected);
    assert!(!out.deleted.contains(&"hello".to_string()));
    assert!(!out.deleted.contains(&"archive-20200504T1458Z".to_string()));
}

#[test]
fn empty_retention_keeps_only_the_last_auto_snapshot() {
    let mut snapshots: Vec<Snapshot> = (1..=12)
        .map(|i| snap(&format!("archive-2019{i:02}01T0000Z"), 2019, i, 1, 0, 0))
        .collect();
    snapshots.push(snap("planb-20200601T0000Z", 2020, 6, 1, 0, 0));
    snapshots.push(snap("planb-20210101T0000Z", 2021, 1, 1, 0, 0));
    snapshots.push(snap("archive-20210201T0000Z", 2021, 2, 1, 0, 0));

    let retention: RetentionMap = "".parse().unwrap();
    let out = apply(&snapshots, &retention);

    assert_eq!(out.deleted, vec!["planb-20200601T0000Z".to_string()]);
}

#[test]
fn weekly_bucket_keeps_the_iso_week_boundary_scenario_from_spec() {
    let snapshots: Vec<Snapshot> = (12..=22)
        .map(|day| snap(&format!("planb-202006{day:02}T0000Z"), 2020, 6, day, 0, 0))
        .collect();
    let retention: RetentionMap = "4w".parse().unwrap();
    let out = apply(&snapshots, &retention);

    // ISO week 24 (Jun 12-14) has three snapshots; week 25 (Jun 15-21) has
    // seven; week 26 (Jun 22) has one. Retention 4w has only three distinct
    // weeks to spend its budget on, so the oldest (first-spent) week keeps
    // both its newest and oldest member instead of just one representative.
    let mut deleted = out.deleted.clone();
    deleted.sort();
    let mut expected_deleted = vec![
        "planb-20200613T0000Z".to_string(),
        "planb-20200615T0000Z".to_string(),
        "planb-20200616T0000Z".to_string(),
        "planb-20200617T0000Z".to_string(),
        "planb-20200618T0000Z".to_string(),
        "planb-20200619T0000Z".to_string(),
        "planb-20200620T0000Z".to_string(),
    ];
    expected_deleted.sort();
    assert_eq!(deleted, expected_deleted);

    let survivors: Vec<&str> = snapshots
        .iter()
        .map(|s| s.name.as_str())
        .filter(|name| !out.deleted.contains(&name.to_string()))
        .collect();
    let mut survivors = survivors.to_vec();
    survivors.sort();
    let mut expected_survivors = vec![
        "planb-20200612T0000Z",
        "planb-20200614T0000Z",
        "planb-20200621T0000Z",
        "planb-20200622T0000Z",
    ];
    expected_survivors.sort();
    assert_eq!(survivors, expected_survivors);
}

//! The data model: `HostGroup`, `Fileset`, `BackupRun`, and the small value
//! types (`BlacklistHours`, `RetentionMap`) parsed out of their
//! comma-separated configuration fields, following a "parse once, validate
//! eagerly" style of `FromStr` impls.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ConfigError;

/// Comma-separated hour ranges, e.g. `"9-17,22"`. Each element is either a
/// single hour or an inclusive range; hours are 0-23 local time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlacklistHours(Vec<(u8, u8)>);

impl BlacklistHours {
    pub fn contains(&self, hour: u8) -> bool {
        self.0.iter().any(|&(lo, hi)| hour >= lo && hour <= hi)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for BlacklistHours {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(BlacklistHours::default());
        }
        let mut ranges = Vec::new();
        for piece in s.split(',') {
            let piece = piece.trim();
            let (lo, hi) = match piece.split_once('-') {
                Some((a, b)) => (parse_hour(a, s)?, parse_hour(b, s)?),
                None => {
                    let h = parse_hour(piece, s)?;
                    (h, h)
                }
            };
            if lo > hi {
                return Err(ConfigError::BlacklistHours {
                    raw: s.to_string(),
                    reason: format!("range {lo}-{hi} is backwards"),
                });
            }
            ranges.push((lo, hi));
        }
        Ok(BlacklistHours(ranges))
    }
}

fn parse_hour(s: &str, raw: &str) -> Result<u8, ConfigError> {
    let h: u8 = s.trim().parse().map_err(|_| ConfigError::BlacklistHours {
        raw: raw.to_string(),
        reason: format!("{s:?} is not an hour"),
    })?;
    if h > 23 {
        return Err(ConfigError::BlacklistHours {
            raw: raw.to_string(),
            reason: format!("{h} is out of range 0-23"),
        });
    }
    Ok(h)
}

/// `effective_blacklist_hours` implements its precedence: fileset wins
/// over group, group wins over the global default.
pub fn effective_blacklist_hours<'a>(
    fileset: &'a BlacklistHours,
    group: &'a BlacklistHours,
    global: &'a BlacklistHours,
) -> &'a BlacklistHours {
    if !fileset.is_empty() {
        fileset
    } else if !group.is_empty() {
        group
    } else {
        global
    }
}

/// One unit of a retention policy map: `h`,`d`,`w`,`m`,`y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RetentionUnit {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl RetentionUnit {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'h' => Some(Self::Hour),
            'd' => Some(Self::Day),
            'w' => Some(Self::Week),
            'm' => Some(Self::Month),
            'y' => Some(Self::Year),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Hour => 'h',
            Self::Day => 'd',
            Self::Week => 'w',
            Self::Month => 'm',
            Self::Year => 'y',
        }
    }
}

impl fmt::Display for RetentionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hour => "hourly",
            Self::Day => "daily",
            Self::Week => "weekly",
            Self::Month => "monthly",
            Self::Year => "yearly",
        })
    }
}

/// `{unit -> count}`, e.g. `{h:2, d:16, w:4, m:12, y:2}` parsed from
/// `"16d,4w,12m,2y"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionMap(pub HashMap<RetentionUnit, usize>);

impl RetentionMap {
    pub fn get(&self, unit: RetentionUnit) -> usize {
        self.0.get(&unit).copied().unwrap_or(0)
    }
}

impl fmt::Display for RetentionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut units: Vec<_> = self.0.iter().collect();
        units.sort_by_key(|(u, _)| **u);
        let rendered: Vec<String> = units
            .iter()
            .map(|(u, n)| format!("{n}{}", u.as_char()))
            .collect();
        f.write_str(&rendered.join(","))
    }
}

impl FromStr for RetentionMap {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(RetentionMap::default());
        }
        let mut map = HashMap::new();
        for token in s.split(',') {
            let token = token.trim();
            let unit_pos = token
                .find(|c: char| c.is_ascii_alphabetic())
                .ok_or_else(|| ConfigError::Retention {
                    raw: s.to_string(),
                    reason: format!("no unit letter in {token:?}"),
                })?;
            let (digits, unit_str) = token.split_at(unit_pos);
            if unit_str.len() != 1 {
                return Err(ConfigError::Retention {
                    raw: s.to_string(),
                    reason: format!("expected a single unit letter in {token:?}"),
                });
            }
            let unit = RetentionUnit::from_char(unit_str.chars().next().unwrap())
                .ok_or_else(|| ConfigError::Retention {
                    raw: s.to_string(),
                    reason: format!("unknown unit {unit_str:?}"),
                })?;
            let count: usize = digits.parse().map_err(|_| ConfigError::Retention {
                raw: s.to_string(),
                reason: format!("{digits:?} is not a count"),
            })?;
            map.insert(unit, count);
        }
        Ok(RetentionMap(map))
    }
}

/// A single `planb-*` (or custom-named archive) snapshot, as reported by the
/// storage engine. Drops the `used` byte count, which belongs to the
/// storage layer, not the retention engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Snapshot {
    pub name: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HostGroup {
    pub id: i64,
    pub name: String,
    pub notify_email: Vec<String>,
    pub blacklist_hours: BlacklistHours,
    pub retention: Option<RetentionMap>,
}

impl fmt::Display for HostGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone)]
pub enum TransportConfig {
    Rsync(crate::transport::rsync::RsyncConfig),
    Exec(crate::transport::exec::ExecConfig),
}

impl crate::transport::Transport for TransportConfig {
    fn run_transport(
        &self,
        ctx: &crate::transport::TransportContext<'_>,
    ) -> Result<(), crate::error::TransportError> {
        match self {
            TransportConfig::Rsync(cfg) => cfg.run_transport(ctx),
            TransportConfig::Exec(cfg) => cfg.run_transport(ctx),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fileset {
    pub id: i64,
    pub friendly_name: String,
    pub group_id: i64,
    pub group_name: String,
    pub storage_alias: String,
    pub transport: TransportConfig,

    pub enabled: bool,
    pub blacklist_hours: BlacklistHours,
    pub retention: RetentionMap,
    pub do_snapshot_size_listing: bool,
    pub use_donotrund: bool,
    pub tags: Vec<String>,

    // Runtime state, mutated only by the scheduler/runner.
    pub is_queued: bool,
    pub is_running: bool,
    pub last_ok: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub first_fail: Option<DateTime<Utc>>,
    pub average_duration: u64,
    pub total_size_mb: u64,
}

impl fmt::Display for Fileset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_name, self.friendly_name)
    }
}

impl Fileset {
    /// Deterministic dataset name: renaming the group
    /// or fileset must trigger a rename task rather than silently orphaning
    /// the old dataset.
    pub fn dataset_name(&self) -> String {
        format!("{}-{}", self.group_name, self.friendly_name)
    }
}

#[derive(Debug, Clone)]
pub struct BackupRun {
    pub id: i64,
    pub fileset_id: i64,
    pub started: DateTime<Utc>,
    pub duration_seconds: Option<u64>,
    pub success: bool,
    pub error_text: String,
    pub total_size_mb: u64,
    pub snapshot_size_mb: u64,
    pub snapshot_size_listing: String,
    /// Small YAML bag: at least `snapshot: <name>` and
    /// `do_snapshot_size_listing: <bool>`, captured at run start so
    /// post-processing is independent of later fileset edits.
    pub attributes: RunAttributes,
}

#[derive(Debug, Clone)]
pub struct RunAttributes {
    pub snapshot: String,
    pub do_snapshot_size_listing: bool,
}

impl RunAttributes {
    pub fn to_yaml(&self) -> String {
        format!(
            "snapshot: {}\ndo_snapshot_size_listing: {}\n",
            self.snapshot, self.do_snapshot_size_listing
        )
    }

    pub fn from_yaml(s: &str) -> Option<Self> {
        let mut snapshot = None;
        let mut do_listing = None;
        for line in s.lines() {
            let (key, value) = line.split_once(':')?;
            match key.trim() {
                "snapshot" => snapshot = Some(value.trim().to_string()),
                "do_snapshot_size_listing" => {
                    do_listing = Some(value.trim() == "true")
                }
                _ => {}
            }
        }
        Some(Self {
            snapshot: snapshot?,
            do_snapshot_size_listing: do_listing.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_hours_precedence() {
        let fileset: BlacklistHours = "9-17".parse().unwrap();
        let group: BlacklistHours = "11-14".parse().unwrap();
        let global: BlacklistHours = "8-18".parse().unwrap();
        let effective = effective_blacklist_hours(&fileset, &group, &global);
        assert!(effective.contains(10));
        assert_eq!(effective, &fileset);
    }

    #[test]
    fn blacklist_hours_parses_mixed_list() {
        let hours: BlacklistHours = "9-17,22".parse().unwrap();
        assert!(hours.contains(9));
        assert!(hours.contains(17));
        assert!(hours.contains(22));
        assert!(!hours.contains(18));
        assert!(!hours.contains(21));
    }

    #[test]
    fn retention_map_parses_tokens() {
        let retention: RetentionMap = "16d,4w,12m,2y".parse().unwrap();
        assert_eq!(retention.get(RetentionUnit::Day), 16);
        assert_eq!(retention.get(RetentionUnit::Week), 4);
        assert_eq!(retention.get(RetentionUnit::Month), 12);
        assert_eq!(retention.get(RetentionUnit::Year), 2);
        assert_eq!(retention.get(RetentionUnit::Hour), 0);
    }

    #[test]
    fn retention_map_rejects_garbage() {
        assert!("16x".parse::<RetentionMap>().is_err());
        assert!("d16".parse::<RetentionMap>().is_err());
    }

    #[test]
    fn run_attributes_roundtrip() {
        let attrs = RunAttributes {
            snapshot: "planb-20200504T1700Z".to_string(),
            do_snapshot_size_listing: true,
        };
        let back = RunAttributes::from_yaml(&attrs.to_yaml()).unwrap();
        assert_eq!(back.snapshot, attrs.snapshot);
        assert_eq!(back.do_snapshot_size_listing, attrs.do_snapshot_size_listing);
    }
}

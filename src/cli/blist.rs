//! `blist`: list filesets, optionally as a Zabbix discovery/summary
//! JSON document for external monitoring, or filtered by tag for the
//! double-backup helper. Grounded on `blist.py`'s
//! `dump_zabbix_summary`/`dump_zabbix_discovery` .

use std::io::Write;
use std::time::Duration;

use byte_unit::Byte;
use chrono::Utc;
use humantime::format_duration;
use serde::Serialize;

use super::{CliContext, column_width};

#[derive(Default)]
pub struct BlistArgs {
    pub zabbix: bool,
    pub summary: bool,
    pub double: bool,
}

#[derive(Serialize)]
struct ZabbixDiscoveryEntry {
    #[serde(rename = "{#GROUP}")]
    group: String,
    #[serde(rename = "{#FRIENDLY_NAME}")]
    friendly_name: String,
}

#[derive(Serialize)]
struct ZabbixDiscovery {
    data: Vec<ZabbixDiscoveryEntry>,
}

#[derive(Serialize)]
struct ZabbixSummary {
    enabled: usize,
    disabled: usize,
    failing: usize,
    oldest_success_age_hours: Option<i64>,
    newest_success_age_hours: Option<i64>,
}

pub fn run(ctx: &CliContext, args: BlistArgs, out: &mut impl Write) -> color_eyre::Result<()> {
    let filesets = ctx.catalog.list_filesets();

    if args.double {
        let tagged: Vec<&crate::model::Fileset> = filesets
            .iter()
            .filter(|f| f.tags.iter().any(|t| t == "double"))
            .collect();
        for fileset in tagged {
            writeln!(out, "{} {}", fileset.group_name, fileset.friendly_name)?;
        }
        return Ok(());
    }

    if args.zabbix && args.summary {
        let now = Utc::now();
        let successes: Vec<_> = filesets.iter().filter_map(|f| f.last_ok).collect();
        let summary = ZabbixSummary {
            enabled: filesets.iter().filter(|f| f.enabled).count(),
            disabled: filesets.iter().filter(|f| !f.enabled).count(),
            failing: filesets.iter().filter(|f| f.first_fail.is_some()).count(),
            oldest_success_age_hours: successes
                .iter()
                .min()
                .map(|t| (now - *t).num_hours()),
            newest_success_age_hours: successes
                .iter()
                .max()
                .map(|t| (now - *t).num_hours()),
        };
        writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
        return Ok(());
    }

    if args.zabbix {
        let discovery = ZabbixDiscovery {
            data: filesets
                .iter()
                .map(|f| ZabbixDiscoveryEntry {
                    group: f.group_name.clone(),
                    friendly_name: f.friendly_name.clone(),
                })
                .collect(),
        };
        writeln!(out, "{}", serde_json::to_string_pretty(&discovery)?)?;
        return Ok(());
    }

    write_table(&filesets, out)?;
    Ok(())
}

fn write_table(filesets: &[crate::model::Fileset], out: &mut impl Write) -> std::io::Result<()> {
    if filesets.is_empty() {
        writeln!(out, "No filesets configured")?;
        return Ok(());
    }

    let name_width = column_width(
        "Fileset",
        filesets.iter().map(|f| format!("{f}").chars().count()),
    );
    let status_width = column_width("Status", [8usize, 9, 7].into_iter());
    let retention_width = column_width(
        "Retention",
        filesets
            .iter()
            .map(|f| f.retention.to_string().chars().count()),
    );

    writeln!(
        out,
        "{: <name_width$} | {: <status_width$} | {: <retention_width$} | {: <9} | {: <12} | Last run",
        "Fileset", "Status", "Retention", "Size", "Avg. runtime"
    )?;
    for fileset in filesets {
        let status = if !fileset.enabled {
            "disabled"
        } else if fileset.first_fail.is_some() {
            "failing"
        } else {
            "ok"
        };
        let last_run = fileset
            .last_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let retention = fileset.retention.to_string();
        let size = Byte::from_bytes(fileset.total_size_mb as u128 * 1024 * 1024)
            .get_appropriate_unit(false)
            .to_string();
        let avg_runtime = format_duration(Duration::from_secs(fileset.average_duration)).to_string();
        writeln!(
            out,
            "{: <name_width$} | {status: <status_width$} | {retention: <retention_width$} | {size: <9} | {avg_runtime: <12} | {last_run}",
            format!("{fileset}"),
        )?;
    }
    Ok(())
}

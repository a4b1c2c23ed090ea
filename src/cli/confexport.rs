//! `confexport [--output=json|yaml] [--minimal] [<group_glob>]
//! [<fileset_glob>]`: structured dump of fileset configuration, for
//! operators diffing config across environments or feeding it into other
//! tooling.

use serde::Serialize;

use super::{glob_match, CliContext};

#[derive(Serialize)]
pub struct ExportedFileset {
    pub group: String,
    pub friendly_name: String,
    pub storage_alias: String,
    pub enabled: bool,
    pub retention: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blacklist_hours: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

pub enum ExportFormat {
    Json,
    Yaml,
}

pub fn export(
    ctx: &CliContext,
    group_glob: Option<&str>,
    fileset_glob: Option<&str>,
    minimal: bool,
) -> Vec<ExportedFileset> {
    let group_glob = group_glob.unwrap_or("*");
    let fileset_glob = fileset_glob.unwrap_or("*");

    ctx.catalog
        .list_filesets()
        .into_iter()
        .filter(|f| glob_match(group_glob, &f.group_name))
        .filter(|f| glob_match(fileset_glob, &f.friendly_name))
        .map(|f| ExportedFileset {
            group: f.group_name.clone(),
            friendly_name: f.friendly_name.clone(),
            storage_alias: f.storage_alias.clone(),
            enabled: f.enabled,
            retention: f.retention.to_string(),
            blacklist_hours: if minimal || f.blacklist_hours.is_empty() {
                None
            } else {
                Some(format!("{:?}", f.blacklist_hours))
            },
            tags: if minimal || f.tags.is_empty() {
                None
            } else {
                Some(f.tags.clone())
            },
        })
        .collect()
}

pub fn render(exported: &[ExportedFileset], format: ExportFormat) -> color_eyre::Result<String> {
    Ok(match format {
        ExportFormat::Json => serde_json::to_string_pretty(exported)?,
        ExportFormat::Yaml => serde_yaml::to_string(exported)?,
    })
}

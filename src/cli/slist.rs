//! `slist [--stale]`: list datasets found in storage, matching them
//! to filesets by the deterministic `(group_name, friendly_name)` naming
//! rule. `--stale` restricts output to datasets
//! with no matching fileset in the catalog.

use super::CliContext;

pub struct DatasetListing {
    pub dataset_name: String,
    pub storage_alias: String,
    pub matched_fileset: Option<String>,
}

pub fn run(ctx: &CliContext, stale_only: bool) -> color_eyre::Result<Vec<DatasetListing>> {
    let filesets = ctx.catalog.list_filesets();
    let mut out = Vec::new();

    for (alias, _) in &ctx.config.storage {
        let storage = ctx.storage.get(alias)?;
        for dataset_name in storage.list_dataset_names()? {
            let matched = filesets
                .iter()
                .find(|f| f.dataset_name() == dataset_name && f.storage_alias == *alias)
                .map(|f| f.to_string());
            if stale_only && matched.is_some() {
                continue;
            }
            out.push(DatasetListing {
                dataset_name: dataset_name.clone(),
                storage_alias: alias.clone(),
                matched_fileset: matched,
            });
        }
    }

    out.sort_by(|a, b| a.dataset_name.cmp(&b.dataset_name));
    Ok(out)
}

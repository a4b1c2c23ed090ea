//! CLI subcommand surface. Each submodule is one operator-facing
//! verb; `main.rs`'s clap `Subcommand` enum dispatches into these. Table
//! rendering uses a column-width-then-pad style.

pub mod bclone;
pub mod blist;
pub mod bqcluster;
pub mod bqueueall;
pub mod bqueueflush;
pub mod breport;
pub mod bstats;
pub mod confexport;
pub mod slist;

use std::sync::Arc;

use crate::catalog::CatalogRepository;
use crate::config::{Config, StorageRegistry};

/// Shared context every subcommand needs: the seeded catalog plus the
/// storage registry built from the same config.
pub struct CliContext {
    pub config: Config,
    pub catalog: Arc<dyn CatalogRepository>,
    pub storage: StorageRegistry,
}

impl CliContext {
    pub fn from_config(config: Config) -> color_eyre::Result<Self> {
        let catalog = Arc::new(config.seed_catalog()?);
        let storage = config.build_storage_registry()?;
        Ok(Self {
            config,
            catalog,
            storage,
        })
    }
}

fn column_width(header: &str, values: impl Iterator<Item = usize>) -> usize {
    values.max().unwrap_or(0).max(header.chars().count())
}

/// Shell-glob-style matching (`*`/`?`) for the `<group_glob>`/
/// `<fileset_glob>` filters on `confexport`/`bstats`, implemented as
/// a glob-to-regex translation since the corpus reaches for `regex` rather
/// than a dedicated glob crate.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let mut regex_str = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            c => regex_str.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_str.push('$');
    regex::Regex::new(&regex_str)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_any_suffix() {
        assert!(glob_match("web*", "web01"));
        assert!(!glob_match("web*", "db01"));
    }

    #[test]
    fn glob_question_mark_matches_one_char() {
        assert!(glob_match("web0?", "web01"));
        assert!(!glob_match("web0?", "web012"));
    }
}

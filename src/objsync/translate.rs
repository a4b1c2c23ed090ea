//! Per-container path translation and exclusion:
//! `container|pattern|replacement` regex rules (container `*` matches
//! all), first match per path wins, applied after exclusion filters.
//! Reimplemented with `regex::Regex` in place of Python's `re`.

use regex::Regex;

use crate::error::ConfigError;

/// One `planb_translate` rule: `container|pattern|replacement`.
pub struct TranslateRule {
    container: String,
    pattern: Regex,
    replacement: String,
}

impl TranslateRule {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut parts = raw.splitn(3, '|');
        let (container, pattern, replacement) = match (parts.next(), parts.next(), parts.next()) {
            (Some(c), Some(p), Some(r)) => (c, p, r),
            _ => {
                return Err(ConfigError::Malformed(format!(
                    "translate rule {raw:?} must be container|pattern|replacement"
                )))
            }
        };
        let pattern = Regex::new(pattern)
            .map_err(|e| ConfigError::Malformed(format!("bad translate pattern {pattern:?}: {e}")))?;
        Ok(Self {
            container: container.to_string(),
            pattern,
            replacement: replacement.to_string(),
        })
    }

    fn matches_container(&self, container: &str) -> bool {
        self.container == "*" || self.container == container
    }
}

/// Ordered set of translate rules for one section. First matching rule per
/// path wins.
#[derive(Default)]
pub struct PathTranslator {
    rules: Vec<TranslateRule>,
}

impl PathTranslator {
    pub fn new(rules: Vec<TranslateRule>) -> Self {
        Self { rules }
    }

    /// Apply the first rule (in configuration order) whose container
    /// matches and whose pattern matches `remote_path`; `remote_path`
    /// unchanged if nothing matches.
    pub fn translate(&self, container: &str, remote_path: &str) -> String {
        for rule in &self.rules {
            if rule.matches_container(container) && rule.pattern.is_match(remote_path) {
                return rule
                    .pattern
                    .replace(remote_path, rule.replacement.as_str())
                    .into_owned();
            }
        }
        remote_path.to_string()
    }
}

/// One `planb_exclude` rule: `container|pattern`.
pub struct ExcludeRule {
    container: String,
    pattern: Regex,
}

impl ExcludeRule {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (container, pattern) = raw.split_once('|').ok_or_else(|| {
            ConfigError::Malformed(format!("exclude rule {raw:?} must be container|pattern"))
        })?;
        let pattern = Regex::new(pattern)
            .map_err(|e| ConfigError::Malformed(format!("bad exclude pattern {pattern:?}: {e}")))?;
        Ok(Self {
            container: container.to_string(),
            pattern,
        })
    }

    fn matches_container(&self, container: &str) -> bool {
        self.container == "*" || self.container == container
    }
}

/// Ordered set of exclusion rules for one section, applied before
/// translation.
#[derive(Default)]
pub struct PathExcluder {
    rules: Vec<ExcludeRule>,
}

impl PathExcluder {
    pub fn new(rules: Vec<ExcludeRule>) -> Self {
        Self { rules }
    }

    pub fn is_excluded(&self, container: &str, remote_path: &str) -> bool {
        self.rules
            .iter()
            .any(|r| r.matches_container(container) && r.pattern.is_match(remote_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_style_translate_rule() {
        let rule = TranslateRule::parse(
            r"document|^([0-9a-f]{8}(-[0-9a-f]{4}){3}-[0-9a-f]{8}([0-9a-f]{2})([0-9a-f]{2}))$|\4/\3/\1",
        )
        .unwrap();
        let translator = PathTranslator::new(vec![rule]);
        let out = translator.translate(
            "document",
            "01234567-89ab-cdef-0123-456789abcdef",
        );
        assert_eq!(out, "ef/cd/01234567-89ab-cdef-0123-456789abcdef");
    }

    #[test]
    fn wildcard_container_matches_all() {
        let rule = TranslateRule::parse(r"*|/$|%2F").unwrap();
        let translator = PathTranslator::new(vec![rule]);
        assert_eq!(translator.translate("any", "dir/"), "dir%2F");
        assert_eq!(translator.translate("any", "file"), "file");
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![
            TranslateRule::parse("c|^a|FIRST").unwrap(),
            TranslateRule::parse("c|^a|SECOND").unwrap(),
        ];
        let translator = PathTranslator::new(rules);
        assert_eq!(translator.translate("c", "abc"), "FIRSTbc");
    }

    #[test]
    fn exclude_rule_matches_specific_container_only() {
        let rules = vec![ExcludeRule::parse("registry|^segments/").unwrap()];
        let excluder = PathExcluder::new(rules);
        assert!(excluder.is_excluded("registry", "segments/part1"));
        assert!(!excluder.is_excluded("other", "segments/part1"));
    }
}

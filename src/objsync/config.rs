//! `objsync`'s per-section INI configuration.
//!
//! A small hand-rolled parser in the style of Python's
//! `configparser.RawConfigParser`: `[section]` headers, `key = value`
//! pairs, `;`/`#` comments, and indentation-continued multi-line values
//! (needed for the `planb_translate_N` regex rules, which often span
//! three `=`/`|`-joined lines to stay readable).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::objsync::translate::{ExcludeRule, PathExcluder, PathTranslator, TranslateRule};

/// One `[section]` block, still untyped (raw key -> value, duplicate keys
/// kept as separate entries since `planb_translate_0`/`planb_translate_1`/
/// `planb_translate` are all valid simultaneously).
#[derive(Debug, Default)]
struct RawSection {
    entries: Vec<(String, String)>,
}

impl RawSection {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn get_all_prefixed(&self, prefix: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k == prefix || k.starts_with(&format!("{prefix}_")))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Parse the whole INI document into an ordered `(section_name, body)`
/// list; sections appear in file order, which the CLI then looks up by
/// name.
fn parse_ini(raw: &str) -> Result<Vec<(String, RawSection)>, ConfigError> {
    let mut sections: Vec<(String, RawSection)> = Vec::new();
    let mut current_key: Option<String> = None;

    for raw_line in raw.lines() {
        let trimmed = raw_line.trim_end();
        if trimmed.trim_start().starts_with(';') || trimmed.trim_start().starts_with('#') {
            continue;
        }
        if trimmed.trim().is_empty() {
            current_key = None;
            continue;
        }
        let is_continuation = raw_line.starts_with(' ') || raw_line.starts_with('\t');
        if is_continuation {
            if let (Some(key), Some((_, section))) = (&current_key, sections.last_mut()) {
                if let Some((_, value)) = section.entries.iter_mut().find(|(k, _)| k == key) {
                    value.push('\n');
                    value.push_str(trimmed.trim());
                }
            }
            continue;
        }
        let line = trimmed.trim();
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            sections.push((name.trim().to_string(), RawSection::default()));
            current_key = None;
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Malformed(format!(
                "unparsable objsync config line: {line:?}"
            )));
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        let Some((_, section)) = sections.last_mut() else {
            return Err(ConfigError::Malformed(format!(
                "option {key:?} outside of any [section]"
            )));
        };
        section.entries.push((key.clone(), value));
        current_key = Some(key);
    }
    Ok(sections)
}

/// Connect/read timeouts.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect_seconds: u64,
    pub read_seconds: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_seconds: 60,
            read_seconds: 60,
        }
    }
}

fn parse_timeouts(raw: &str) -> Result<Timeouts, ConfigError> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let parse_one = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| ConfigError::Malformed(format!("bad planb_timeout value {s:?}")))
    };
    match parts.as_slice() {
        [single] => {
            let seconds = parse_one(single)?;
            Ok(Timeouts {
                connect_seconds: seconds,
                read_seconds: seconds,
            })
        }
        [connect, read] => Ok(Timeouts {
            connect_seconds: parse_one(connect)?,
            read_seconds: parse_one(read)?,
        }),
        _ => Err(ConfigError::Malformed(format!(
            "planb_timeout must be `seconds` or `connect, read`: {raw:?}"
        ))),
    }
}

/// Whether zero-sized listing entries should always be treated as
/// segmented large objects requiring a `HEAD` for their true size. Only
/// the S3-shaped client is implemented here, so this is a simple flag
/// rather than the original's Swift DLO/SLO autodetection dance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentPolicy {
    #[default]
    Autodetect,
    Always,
}

/// One fully-parsed `[section]`: an object-store endpoint plus its
/// translate/exclude rules and tuning knobs.
pub struct SectionConfig {
    pub name: String,
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub ca_cert: Option<PathBuf>,
    pub insecure: bool,
    pub timeouts: Timeouts,
    pub segment_policy: SegmentPolicy,
    pub worker_count: usize,
    pub translator: PathTranslator,
    pub excluder: PathExcluder,
}

impl SectionConfig {
    fn from_raw(name: String, raw: &RawSection) -> Result<Self, ConfigError> {
        let endpoint = raw
            .get("endpoint")
            .or_else(|| raw.get("auth"))
            .ok_or_else(|| ConfigError::Malformed(format!("section {name:?} has no endpoint/auth")))?
            .to_string();
        let access_key_id = raw
            .get("access_key_id")
            .or_else(|| raw.get("user"))
            .unwrap_or_default()
            .to_string();
        let secret_access_key = raw
            .get("secret_access_key")
            .or_else(|| raw.get("key"))
            .unwrap_or_default()
            .to_string();

        let ca_cert_raw = raw.get("planb_ca_cert");
        let (ca_cert, insecure) = match ca_cert_raw {
            Some("false") => (None, true),
            Some(path) => (Some(PathBuf::from(path)), false),
            None => (None, false),
        };

        let timeouts = raw
            .get("planb_timeout")
            .map(parse_timeouts)
            .transpose()?
            .unwrap_or_default();

        let segment_policy = match raw.get("planb_container_has_segments") {
            Some("always") => SegmentPolicy::Always,
            _ => SegmentPolicy::Autodetect,
        };

        let worker_count = raw
            .get("planb_workers")
            .map(|v| {
                v.parse::<usize>()
                    .map_err(|_| ConfigError::Malformed(format!("bad planb_workers {v:?}")))
            })
            .transpose()?
            .unwrap_or(7);

        let translate_rules = raw
            .get_all_prefixed("planb_translate")
            .into_iter()
            .map(|raw_rule| TranslateRule::parse(&normalize_multiline(raw_rule)))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude_rules = raw
            .get_all_prefixed("planb_exclude")
            .into_iter()
            .map(|raw_rule| ExcludeRule::parse(&normalize_multiline(raw_rule)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            endpoint,
            access_key_id,
            secret_access_key,
            ca_cert,
            insecure,
            timeouts,
            segment_policy,
            worker_count,
            translator: PathTranslator::new(translate_rules),
            excluder: PathExcluder::new(exclude_rules),
        })
    }
}

/// Continuation lines are stored joined by `\n`; the rule grammar itself is
/// a single `container|pattern|replacement` line, so continuations just
/// mean "this logical line was wrapped for readability" and collapse back
/// to nothing between fragments.
fn normalize_multiline(raw: &str) -> String {
    raw.split('\n').collect::<Vec<_>>().concat()
}

/// The parsed configuration file: every `[section]`, keyed by name.
pub struct ObjsyncConfig {
    sections: HashMap<String, SectionConfig>,
}

impl ObjsyncConfig {
    pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
        let parsed = parse_ini(raw)?;
        let mut sections = HashMap::new();
        for (name, body) in &parsed {
            let cfg = SectionConfig::from_raw(name.clone(), body)?;
            sections.insert(name.clone(), cfg);
        }
        Ok(Self { sections })
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Malformed(format!("{}: {e}", path.display())))?;
        Self::from_str(&raw)
    }

    pub fn section(&self, name: &str) -> Option<&SectionConfig> {
        self.sections.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[acme_minio_s3_config]
type = s3
access_key_id = USER
secret_access_key = SECRET
endpoint = https://minio.example.org

planb_translate_0 = document|
    ^([0-9a-f]{8})$|
    \1
planb_exclude_0 = registry|^segments/
planb_timeout = 10, 30
"#;

    #[test]
    fn parses_section_with_continuation_rule() {
        let cfg = ObjsyncConfig::from_str(SAMPLE).unwrap();
        let section = cfg.section("acme_minio_s3_config").unwrap();
        assert_eq!(section.endpoint, "https://minio.example.org");
        assert_eq!(section.timeouts.connect_seconds, 10);
        assert_eq!(section.timeouts.read_seconds, 30);
        assert_eq!(section.translator.translate("document", "01234567"), "01234567");
        assert!(section.excluder.is_excluded("registry", "segments/part"));
    }

    #[test]
    fn missing_section_is_none() {
        let cfg = ObjsyncConfig::from_str(SAMPLE).unwrap();
        assert!(cfg.section("nope").is_none());
    }

    #[test]
    fn ca_cert_false_means_insecure() {
        let raw = "[s]\nendpoint=https://x\nplanb_ca_cert = false\n";
        let cfg = ObjsyncConfig::from_str(raw).unwrap();
        let section = cfg.section("s").unwrap();
        assert!(section.insecure);
        assert!(section.ca_cert.is_none());
    }

    #[test]
    fn missing_endpoint_is_an_error() {
        let raw = "[s]\naccess_key_id = x\n";
        assert!(ObjsyncConfig::from_str(raw).is_err());
    }
}

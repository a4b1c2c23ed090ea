//! The `objsync` list-file grammar: one record per line, `[container|]path|mtime|size`,
//! with `|` doubled inside `path`. Sorted, duplicate-free files of these
//! records are the authoritative local/remote state the rest of the
//! pipeline diffs against — kept as flat text files sorted with the
//! system `sort(1)`, but here as a typed `ListLine` with an explicit
//! parser/formatter pair instead of ad hoc string splitting at every call
//! site.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};

/// One row of a sorted listing file. `container` is `None` in single-
/// container sections; `--all-containers` runs populate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListLine {
    pub container: Option<String>,
    pub path: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

impl ListLine {
    /// `(container, path)` is the sort key and the dedup/diff key.
    pub fn key(&self) -> (&str, &str) {
        (self.container.as_deref().unwrap_or(""), self.path.as_str())
    }
}

fn escape_path(path: &str) -> String {
    path.replace('|', "||")
}

fn unescape_path(escaped: &str) -> String {
    // `|` is doubled in the grammar, so splitting on single `|` chars
    // requires walking the escaped form by hand rather than a naive split.
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '|' && chars.peek() == Some(&'|') {
            chars.next();
        }
        out.push(c);
    }
    out
}

/// Split `line` on unescaped `|` into fields, unescaping each path field as
/// it goes. `||` collapses to a literal `|`; any other `|` is a field
/// separator.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '|' {
            if chars.peek() == Some(&'|') {
                chars.next();
                current.push('|');
            } else {
                fields.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

#[derive(Debug, thiserror::Error)]
pub enum ListLineError {
    #[error("malformed list line {0:?}: wrong field count")]
    FieldCount(String),
    #[error("malformed list line {0:?}: bad mtime")]
    BadMtime(String),
    #[error("malformed list line {0:?}: bad size")]
    BadSize(String),
}

/// Parse one grammar line. A three-field line (`path|mtime|size`) has
/// no container; a four-field line (`container|path|mtime|size`) does.
pub fn parse_line(line: &str) -> Result<ListLine, ListLineError> {
    let fields = split_fields(line);
    let (container, path, modified, size) = match fields.len() {
        3 => (None, fields[0].clone(), &fields[1], &fields[2]),
        4 => (Some(fields[0].clone()), fields[1].clone(), &fields[2], &fields[3]),
        _ => return Err(ListLineError::FieldCount(line.to_string())),
    };
    let modified = parse_mtime(modified).ok_or_else(|| ListLineError::BadMtime(line.to_string()))?;
    let size: u64 = size.parse().map_err(|_| ListLineError::BadSize(line.to_string()))?;
    Ok(ListLine {
        container,
        path,
        modified,
        size,
    })
}

/// `YYYY-MM-DDTHH:MM:SS.ffffff` UTC, the microsecond-precision ISO-8601
/// format used for the mtime field.
fn parse_mtime(s: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn format_mtime(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Render one record back into the grammar's line form (without the
/// trailing newline, since callers write lines through a buffered writer
/// that appends `\n` uniformly).
pub fn format_line(line: &ListLine) -> String {
    let path = escape_path(&line.path);
    match &line.container {
        Some(container) => format!(
            "{}|{}|{}|{}",
            escape_path(container),
            path,
            format_mtime(line.modified),
            line.size
        ),
        None => format!("{}|{}|{}", path, format_mtime(line.modified), line.size),
    }
}

/// Read every record from a sorted list file. Missing files are treated as
/// empty (a `.cur` that doesn't exist yet on first run).
pub fn read_list_file(path: &Path) -> io::Result<Vec<ListLine>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if let Ok(parsed) = parse_line(&line) {
            lines.push(parsed);
        }
    }
    Ok(lines)
}

/// Write records in strictly ascending `(container, path)` order; the
/// caller is responsible for having already sorted/deduped `lines`.
pub fn write_list_file(path: &Path, lines: &[ListLine]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writer.write_all(format_line(line).as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

pub fn sort_key_cmp(a: &ListLine, b: &ListLine) -> Ordering {
    a.key().cmp(&b.key())
}

/// One outcome of comm-merging two strictly-ascending list streams.
#[derive(Debug, Clone)]
pub enum MergeEvent {
    /// Present only in the left (typically local/`.cur`) stream.
    LeftOnly(ListLine),
    /// Present only in the right (typically remote/`.new`) stream.
    RightOnly(ListLine),
    /// Same key, identical record.
    Same(ListLine),
    /// Same key and size, different mtime: a touch-or-redownload candidate.
    DiffMtime { left: ListLine, right: ListLine },
    /// Same key, different size: treated as delete-then-add.
    DiffSize { left: ListLine, right: ListLine },
}

/// Linear merge of two sorted, deduped streams, producing one [`MergeEvent`]
/// per distinct key in ascending key order. Both inputs must already be sorted by [`ListLine::key`].
pub fn comm_merge(left: &[ListLine], right: &[ListLine]) -> Vec<MergeEvent> {
    let mut events = Vec::new();
    let mut li = 0;
    let mut ri = 0;
    while li < left.len() && ri < right.len() {
        match left[li].key().cmp(&right[ri].key()) {
            Ordering::Less => {
                events.push(MergeEvent::LeftOnly(left[li].clone()));
                li += 1;
            }
            Ordering::Greater => {
                events.push(MergeEvent::RightOnly(right[ri].clone()));
                ri += 1;
            }
            Ordering::Equal => {
                let (l, r) = (left[li].clone(), right[ri].clone());
                if l.size != r.size {
                    events.push(MergeEvent::DiffSize { left: l, right: r });
                } else if l.modified != r.modified {
                    events.push(MergeEvent::DiffMtime { left: l, right: r });
                } else {
                    events.push(MergeEvent::Same(l));
                }
                li += 1;
                ri += 1;
            }
        }
    }
    for line in &left[li..] {
        events.push(MergeEvent::LeftOnly(line.clone()));
    }
    for line in &right[ri..] {
        events.push(MergeEvent::RightOnly(line.clone()));
    }
    events
}

/// Merge-subtract `remove` from `base`, both sorted by key.
pub fn merge_subtract(base: &[ListLine], remove: &[ListLine]) -> Vec<ListLine> {
    let mut out = Vec::with_capacity(base.len());
    let mut ri = 0;
    for line in base {
        while ri < remove.len() && remove[ri].key() < line.key() {
            ri += 1;
        }
        if ri < remove.len() && remove[ri].key() == line.key() {
            continue;
        }
        out.push(line.clone());
    }
    out
}

/// Merge-add `additions` into `base`, both sorted by key. `additions` wins on key
/// collision, since a successful re-add always supersedes the old record.
pub fn merge_add(base: &[ListLine], additions: &[ListLine]) -> Vec<ListLine> {
    let mut out = merge_subtract(base, additions);
    out.extend(additions.iter().cloned());
    out.sort_by(sort_key_cmp);
    out
}

//! Disk-use tree summary for the post-processing step. No `dutree`-style
//! crate exists in the corpus, so this walks the snapshot directory
//! directly and aggregates sizes per top-level child — a flat
//! `path: bytes` table (`snapshot_size_listing`), not a full recursive
//! tree.

use std::path::Path;

/// One line of `BackupRun.snapshot_size_listing`: a top-level child of the
/// snapshot path and the total bytes under it.
pub struct SizeEntry {
    pub path: String,
    pub bytes: u64,
}

fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                total += dir_size(&entry.path())?;
            } else {
                total += metadata.len();
            }
        }
    } else {
        total += path.metadata()?.len();
    }
    Ok(total)
}

/// Walk `snapshot_path`'s immediate children and sum bytes under each,
/// returning entries sorted by path for deterministic YAML output.
pub fn scan(snapshot_path: &Path) -> std::io::Result<Vec<SizeEntry>> {
    let mut entries = Vec::new();
    for child in std::fs::read_dir(snapshot_path)? {
        let child = child?;
        let bytes = dir_size(&child.path())?;
        entries.push(SizeEntry {
            path: child.file_name().to_string_lossy().into_owned(),
            bytes,
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Render entries as the YAML-safe `path: digits` lines used for the per-snapshot breakdown.
pub fn to_yaml(entries: &[SizeEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!("{}: {}\n", entry.path, entry.bytes));
    }
    out
}

pub fn total_bytes(entries: &[SizeEntry]) -> u64 {
    entries.iter().map(|e| e.bytes).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scans_and_sums_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        fs::create_dir(&a).unwrap();
        fs::write(a.join("file1"), b"12345").unwrap();
        let b = tmp.path().join("b");
        fs::create_dir(&b).unwrap();
        fs::create_dir(b.join("nested")).unwrap();
        fs::write(b.join("nested").join("file2"), b"123").unwrap();

        let entries = scan(tmp.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "a");
        assert_eq!(entries[0].bytes, 5);
        assert_eq!(entries[1].path, "b");
        assert_eq!(entries[1].bytes, 3);
        assert_eq!(total_bytes(&entries), 8);
    }

    #[test]
    fn yaml_rendering_is_one_line_per_entry() {
        let entries = vec![SizeEntry { path: "a".into(), bytes: 5 }];
        assert_eq!(to_yaml(&entries), "a: 5\n");
    }
}

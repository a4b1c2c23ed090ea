//! Typed error taxonomy for the backup control plane.
//!
//! Mirrors the shape of `planb/storage/base.py`'s `DatasetNotFound` and
//! `planb/common/subprocess2.py`'s `CalledProcessError`: callers need to
//! distinguish "expected, handle it" conditions (missing dataset, harmless
//! rsync exit code) from everything else, which just propagates as a
//! `color_eyre::Report` up to the CLI boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),
    #[error("dataset busy: {0}")]
    Busy(String),
    #[error("storage command failed: {cmd}: {stderr}")]
    Exec { cmd: String, stderr: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport exited with harmless code {code}: {stderr}")]
    Harmless { code: i32, stderr: String },
    #[error("transport failed with code {code}: {stderr}")]
    Fatal { code: i32, stderr: String },
}

impl TransportError {
    pub fn is_harmless(&self) -> bool {
        matches!(self, TransportError::Harmless { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid blacklist_hours {raw:?}: {reason}")]
    BlacklistHours { raw: String, reason: String },
    #[error("invalid retention policy {raw:?}: {reason}")]
    Retention { raw: String, reason: String },
    #[error("invalid custom snapshot name {0:?}")]
    SnapshotName(String),
    #[error("no storage pool registered under alias {0:?}")]
    UnknownStorageAlias(String),
    #[error("malformed config: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("claim contention on fileset {0}")]
    ClaimContention(i64),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("other: {0}")]
    Other(#[from] color_eyre::eyre::Error),
}

//! SSH known-hosts bootstrap for the rsync-over-SSH transport: the
//! transport's `--rsh` construction reads
//! `~/.ssh/known_hosts.d/<host>` and switches `StrictHostKeyChecking`
//! depending on whether that file exists. This module is what populates
//! it — an explicit, logged first-contact step rather than silently
//! trusting an unknown host key.
//!
//! Built on `openssh::Session`, here driving a one-shot `ssh-keyscan`-style
//! connection used purely to pin a host key before the first backup of a
//! newly configured fileset.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use openssh::{KnownHosts, Session};

/// Connects once under `KnownHosts::Add` (trust-on-first-use) and lets
/// `openssh` append the host key to `known_hosts_file`, creating its
/// parent directory if needed. Intended to run once per newly-configured
/// host, before the fileset's first `backup` — not on every run.
pub async fn bootstrap_known_hosts(host: &str, known_hosts_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(known_hosts_dir)
        .wrap_err_with(|| format!("creating {}", known_hosts_dir.display()))?;
    let known_hosts_file = known_hosts_dir.join(host);

    let session = Session::connect(host, KnownHosts::Add)
        .await
        .wrap_err_with(|| format!("connecting to {host} to bootstrap its host key"))?;
    session
        .close()
        .await
        .wrap_err("closing bootstrap ssh session")?;

    Ok(known_hosts_file)
}

/// Blocking wrapper for CLI call sites (`planb configure`, per-host
/// first-contact), built on its own `tokio` runtime to drive the one-shot
/// async session from synchronous code.
pub fn bootstrap_known_hosts_blocking(host: &str, known_hosts_dir: &Path) -> Result<PathBuf> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .build()
        .wrap_err("starting tokio runtime for ssh bootstrap")?;
    rt.block_on(bootstrap_known_hosts(host, known_hosts_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_hosts_path_is_per_host() {
        let dir = Path::new("/home/backup/.ssh/known_hosts.d");
        let path = dir.join("example.org");
        assert_eq!(path, PathBuf::from("/home/backup/.ssh/known_hosts.d/example.org"));
    }
}

//! Rsync-over-SSH / rsync-daemon transport, argument construction
//! first as a pure function and an execution path built on a
//! `subprocess`-backed exec wrapper (the `call_read`/`call_do` pattern
//! also used by the zfs storage engine).

use std::path::PathBuf;

use serde::Deserialize;
use subprocess::{Exec, NullFile, Redirection};

use crate::error::TransportError;
use crate::transport::{Transport, TransportContext, base_env, planb_env};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RsyncUri {
    Ssh,
    RsyncDaemon,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RsyncConfig {
    pub host: String,
    pub user: String,
    pub src_dir: String,
    #[serde(default)]
    pub includes: String,
    #[serde(default)]
    pub excludes: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub use_sudo: bool,
    #[serde(default)]
    pub use_ionice: bool,
    #[serde(default = "default_rsync_path")]
    pub rsync_path: String,
    #[serde(default = "default_ionice_path")]
    pub ionice_path: String,
    pub transport: RsyncUri,
    #[serde(default)]
    pub known_hosts_dir: Option<PathBuf>,
}

fn default_rsync_path() -> String {
    "rsync".to_string()
}

fn default_ionice_path() -> String {
    "ionice".to_string()
}

const BASELINE_FLAGS: &[&str] = &[
    "--delete",
    "--stats",
    "--recursive",
    "--links",
    "--perms",
    "--times",
    "--devices",
    "--specials",
    "--block-size=131072",
    "--whole-file",
    "--chmod=Du+rx",
    "--bwlimit=10M",
];

/// The flag *name* (everything before `=`, or the whole flag), used both to
/// dedup baseline flags already present in user flags and to treat a bare
/// `--bwlimit=` in user flags as "remove the baseline bwlimit".
fn flag_name(flag: &str) -> &str {
    flag.split('=').next().unwrap_or(flag)
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"))
}

/// Build the argv for invoking rsync, excluding the binary
/// path itself (that's prepended by the caller). Flags are assembled in a
/// fixed order: baseline, user overrides, excludes, includes, trailing
/// exclude-all, then the transport URI and destination.
pub fn build_args(cfg: &RsyncConfig, data_dir: &std::path::Path) -> Vec<String> {
    let mut args = Vec::new();

    let user_flags: Vec<&str> = cfg.flags.split_whitespace().collect();
    let user_flag_names: std::collections::HashSet<&str> =
        user_flags.iter().map(|f| flag_name(f)).collect();

    // Step 2: baseline flags, skipping any whose name the user overrides,
    // and dropping --bwlimit entirely if the user passed a bare --bwlimit=
    // ("unlimited").
    let user_unlimited_bwlimit = user_flags.iter().any(|f| *f == "--bwlimit=");
    for flag in BASELINE_FLAGS {
        let name = flag_name(flag);
        if user_flag_names.contains(name) {
            continue;
        }
        if name == "--bwlimit" && user_unlimited_bwlimit {
            continue;
        }
        args.push(flag.to_string());
    }

    // Step 3: user-supplied flags verbatim, except the bare unlimited marker.
    for flag in &user_flags {
        if *flag == "--bwlimit=" {
            continue;
        }
        args.push(flag.to_string());
    }

    // Step 4: excludes.
    for exclude in cfg.excludes.split_whitespace() {
        args.push(format!("--exclude={exclude}"));
    }

    // Step 5: includes, with parent-path prefixes expanded, sorted-unique.
    let mut include_args: Vec<String> = Vec::new();
    for include in cfg.includes.split_whitespace() {
        let trimmed = include.trim_start_matches('/');
        let parts: Vec<&str> = trimmed.split('/').filter(|p| !p.is_empty()).collect();
        let mut prefix = String::new();
        for dir in parts.iter().take(parts.len().saturating_sub(1)) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(dir);
            include_args.push(format!("--include={prefix}/"));
        }
        if let Some(leaf) = parts.last() {
            if leaf.contains('*') {
                include_args.push(format!("--include={leaf}"));
            } else {
                include_args.push(format!("--include={leaf}/***"));
            }
        }
    }
    include_args.sort();
    include_args.dedup();
    args.extend(include_args);

    // Step 6.
    args.push("--exclude=*".to_string());

    // Step 7: transport URI.
    match cfg.transport {
        RsyncUri::Ssh => {
            let home = cfg.known_hosts_dir.clone().unwrap_or_else(home_dir);
            let known_hosts_file = home.join(".ssh/known_hosts.d").join(&cfg.host);
            let strict = if known_hosts_file.exists() { "yes" } else { "no" };
            args.push(format!(
                "--rsh=ssh -o HashKnownHosts=no -o UserKnownHostsFile={} -o StrictHostKeyChecking={strict}",
                known_hosts_file.display()
            ));
            let mut rsync_path = String::new();
            if cfg.use_sudo {
                rsync_path.push_str("sudo ");
            }
            if cfg.use_ionice {
                rsync_path.push_str(&format!("{} -c2 -n7 ", cfg.ionice_path));
            }
            rsync_path.push_str(&cfg.rsync_path);
            args.push(format!("--rsync-path={rsync_path}"));
            args.push(format!(
                "{}@{}:{}/",
                cfg.user, cfg.host, cfg.src_dir
            ));
        }
        RsyncUri::RsyncDaemon => {
            args.push(format!("{}::{}", cfg.host, cfg.src_dir));
        }
    }

    // Step 8: destination.
    args.push(data_dir.display().to_string());

    args
}

impl Transport for RsyncConfig {
    fn run_transport(&self, ctx: &TransportContext<'_>) -> Result<(), TransportError> {
        let args = build_args(self, &ctx.storage_destination);
        let mut cmd = Exec::cmd("rsync").args(&args).stdin(NullFile);
        for (key, value) in base_env().into_iter().chain(planb_env(ctx)) {
            cmd = cmd.env(key, value);
        }
        let capture = cmd
            .stdout(Redirection::Pipe)
            .stderr(Redirection::Merge)
            .capture()
            .map_err(|e| TransportError::Fatal {
                code: -1,
                stderr: e.to_string(),
            })?;

        let code = match capture.exit_status {
            subprocess::ExitStatus::Exited(code) => code as i32,
            other => {
                return Err(TransportError::Fatal {
                    code: -1,
                    stderr: format!("rsync did not exit normally: {other:?}"),
                });
            }
        };

        // stderr is merged into stdout above, so this is the combined output.
        let output = capture.stdout_str();
        match code {
            0 => Ok(()),
            24 => {
                log::warn!("rsync reported vanished source files (exit 24) for {}", ctx.fileset);
                Err(TransportError::Harmless { code, stderr: output })
            }
            _ => Err(TransportError::Fatal { code, stderr: output }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn base_config() -> RsyncConfig {
        RsyncConfig {
            host: "example.org".to_string(),
            user: "backup".to_string(),
            src_dir: "/srv/data".to_string(),
            includes: String::new(),
            excludes: String::new(),
            flags: String::new(),
            use_sudo: false,
            use_ionice: false,
            rsync_path: "rsync".to_string(),
            ionice_path: "ionice".to_string(),
            transport: RsyncUri::Ssh,
            known_hosts_dir: Some(PathBuf::from("/nonexistent-home")),
        }
    }

    #[test]
    fn baseline_flags_present_in_order() {
        let cfg = base_config();
        let args = build_args(&cfg, Path::new("/data/target"));
        assert_eq!(&args[0], "--delete");
        assert!(args.iter().any(|a| a == "--bwlimit=10M"));
    }

    #[test]
    fn user_bwlimit_overrides_baseline() {
        let mut cfg = base_config();
        cfg.flags = "--bwlimit=1M".to_string();
        let args = build_args(&cfg, Path::new("/data/target"));
        assert_eq!(args.iter().filter(|a| a.starts_with("--bwlimit")).count(), 1);
        assert!(args.contains(&"--bwlimit=1M".to_string()));
    }

    #[test]
    fn bare_bwlimit_removes_baseline_limit() {
        let mut cfg = base_config();
        cfg.flags = "--bwlimit=".to_string();
        let args = build_args(&cfg, Path::new("/data/target"));
        assert!(!args.iter().any(|a| a.starts_with("--bwlimit")));
    }

    #[test]
    fn includes_expand_parent_prefixes() {
        let mut cfg = base_config();
        cfg.includes = "var/lib/data".to_string();
        let args = build_args(&cfg, Path::new("/data/target"));
        assert!(args.contains(&"--include=var/".to_string()));
        assert!(args.contains(&"--include=var/lib/".to_string()));
        assert!(args.contains(&"--include=data/***".to_string()));
    }

    #[test]
    fn include_leaf_with_glob_is_unchanged() {
        let mut cfg = base_config();
        cfg.includes = "*.log".to_string();
        let args = build_args(&cfg, Path::new("/data/target"));
        assert!(args.contains(&"--include=*.log".to_string()));
    }

    #[test]
    fn trailing_exclude_star_always_present() {
        let cfg = base_config();
        let args = build_args(&cfg, Path::new("/data/target"));
        assert_eq!(args.last().unwrap(), "/data/target");
        assert!(args.iter().any(|a| a == "--exclude=*"));
    }

    #[test]
    fn ssh_transport_uri_uses_user_host_src() {
        let cfg = base_config();
        let args = build_args(&cfg, Path::new("/data/target"));
        assert!(args.iter().any(|a| a == "backup@example.org:/srv/data/"));
        assert!(args.iter().any(|a| a.starts_with("--rsh=ssh")));
    }

    #[test]
    fn rsync_daemon_uri_has_no_user() {
        let mut cfg = base_config();
        cfg.transport = RsyncUri::RsyncDaemon;
        let args = build_args(&cfg, Path::new("/data/target"));
        assert!(args.iter().any(|a| a == "example.org::/srv/data"));
    }

    #[test]
    fn sudo_and_ionice_prefix_rsync_path() {
        let mut cfg = base_config();
        cfg.use_sudo = true;
        cfg.use_ionice = true;
        let args = build_args(&cfg, Path::new("/data/target"));
        assert!(
            args
                .iter()
                .any(|a| a == "--rsync-path=sudo ionice -c2 -n7 rsync")
        );
    }
}

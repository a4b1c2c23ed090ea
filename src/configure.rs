//! `planb configure`: an operator-facing wizard that walks through adding
//! a fileset to the TOML configuration file, built on the same
//! `inquire`-driven prompt shape as `configure/interactive_cli.rs` but
//! collecting a [`crate::model::Fileset`] instead of a ZFS retention
//! policy.

use std::fmt::Display;
use std::path::Path;

use color_eyre::Result;

use crate::cli::CliContext;
use crate::config::{FilesetToml, GroupToml, TransportToml};
use crate::model::{BlacklistHours, Fileset, HostGroup, RetentionMap};

pub mod interactive_cli;

/// A fully-collected wizard answer, ready to be appended to the config
/// file and seeded into the live catalog.
struct NewFileset {
    group: GroupAnswer,
    fileset: FilesetToml,
}

enum GroupAnswer {
    Existing(String),
    New(GroupToml),
}

impl Display for GroupAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupAnswer::Existing(name) => f.write_str(name),
            GroupAnswer::New(group) => write!(f, "{} (new)", group.name),
        }
    }
}

pub fn run(ctx: &CliContext, config_path: &Path, sandbox: bool) -> Result<()> {
    let Some(new_fileset) = interactive_cli::start(ctx)? else {
        return Ok(());
    };

    if sandbox {
        println!("sandbox: would append the following to {}", config_path.display());
        println!("{}", render_toml(&new_fileset));
        return Ok(());
    }

    bootstrap_ssh_known_hosts(&new_fileset)?;
    append_to_config(config_path, &new_fileset)?;
    seed_live_catalog(ctx, new_fileset);
    Ok(())
}

/// For a freshly-configured rsync-over-ssh fileset, pin the remote host's
/// key into `~/.ssh/known_hosts.d/<host>` before the first backup runs —
/// otherwise the transport's `StrictHostKeyChecking` construction
/// (`transport/rsync.rs`) finds no known-hosts file and falls back to
/// "no", silently accepting whatever key the remote presents.
#[cfg(feature = "ssh")]
fn bootstrap_ssh_known_hosts(new_fileset: &NewFileset) -> Result<()> {
    let TransportToml::Rsync(cfg) = &new_fileset.fileset.transport else {
        return Ok(());
    };
    if cfg.transport != crate::transport::rsync::RsyncUri::Ssh {
        return Ok(());
    }
    if !inquire::Confirm::new(&format!(
        "Pin {}'s host key into ~/.ssh/known_hosts.d now (trust-on-first-use)?",
        cfg.host
    ))
    .with_default(true)
    .prompt()?
    {
        return Ok(());
    }

    let known_hosts_dir = std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("/root"))
        .join(".ssh/known_hosts.d");
    let known_hosts_file = crate::ssh::bootstrap_known_hosts_blocking(&cfg.host, &known_hosts_dir)?;
    println!("pinned host key to {}", known_hosts_file.display());
    Ok(())
}

#[cfg(not(feature = "ssh"))]
fn bootstrap_ssh_known_hosts(_new_fileset: &NewFileset) -> Result<()> {
    Ok(())
}

/// Render the `[[group]]` (only when new) and `[[fileset]]` TOML blocks.
/// `FilesetToml`/`GroupToml` carry no `Serialize` impl (they're
/// deserialize-only config shapes) so this formats the handful of fields
/// directly rather than pulling in a second serialization path for one
/// call site.
fn render_toml(new_fileset: &NewFileset) -> String {
    let mut out = String::new();
    if let GroupAnswer::New(group) = &new_fileset.group {
        out.push_str("\n[[group]]\n");
        out.push_str(&format!("name = {:?}\n", group.name));
        if !group.blacklist_hours.is_empty() {
            out.push_str(&format!("blacklist_hours = {:?}\n", group.blacklist_hours));
        }
        if let Some(retention) = &group.retention {
            out.push_str(&format!("retention = {:?}\n", retention));
        }
    }

    let fileset = &new_fileset.fileset;
    out.push_str("\n[[fileset]]\n");
    out.push_str(&format!("friendly_name = {:?}\n", fileset.friendly_name));
    out.push_str(&format!("group = {:?}\n", fileset.group));
    out.push_str(&format!("storage_alias = {:?}\n", fileset.storage_alias));
    out.push_str(&format!("enabled = {}\n", fileset.enabled));
    if !fileset.blacklist_hours.is_empty() {
        out.push_str(&format!("blacklist_hours = {:?}\n", fileset.blacklist_hours));
    }
    if !fileset.retention.is_empty() {
        out.push_str(&format!("retention = {:?}\n", fileset.retention));
    }
    out.push_str(&format!(
        "do_snapshot_size_listing = {}\n",
        fileset.do_snapshot_size_listing
    ));
    match &fileset.transport {
        TransportToml::Rsync(cfg) => {
            out.push_str("\n[fileset.transport]\n");
            out.push_str("kind = \"rsync\"\n");
            out.push_str(&format!("host = {:?}\n", cfg.host));
            out.push_str(&format!("user = {:?}\n", cfg.user));
            out.push_str(&format!("src_dir = {:?}\n", cfg.src_dir));
            out.push_str(&format!("transport = {:?}\n", match cfg.transport {
                crate::transport::rsync::RsyncUri::Ssh => "ssh",
                crate::transport::rsync::RsyncUri::RsyncDaemon => "rsync-daemon",
            }));
        }
        TransportToml::Exec(cfg) => {
            out.push_str("\n[fileset.transport]\n");
            out.push_str("kind = \"exec\"\n");
            out.push_str(&format!("transport_command = {:?}\n", cfg.transport_command));
        }
    }
    out
}

fn append_to_config(config_path: &Path, new_fileset: &NewFileset) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config_path)?;
    file.write_all(render_toml(new_fileset).as_bytes())?;
    Ok(())
}

fn seed_live_catalog(ctx: &CliContext, new_fileset: NewFileset) {
    let group_name = new_fileset.group.to_string();
    let group_id = match &new_fileset.group {
        GroupAnswer::Existing(name) => ctx
            .catalog
            .list_groups()
            .into_iter()
            .find(|g| &g.name == name)
            .map(|g| g.id),
        GroupAnswer::New(group) => {
            let blacklist_hours = group
                .blacklist_hours
                .parse::<BlacklistHours>()
                .unwrap_or_default();
            let retention = group
                .retention
                .as_deref()
                .and_then(|r| r.parse::<RetentionMap>().ok());
            Some(ctx.catalog.insert_group(HostGroup {
                id: 0,
                name: group.name.clone(),
                notify_email: group.notify_email.clone(),
                blacklist_hours,
                retention,
            }))
        }
    };
    let Some(group_id) = group_id else {
        log::warn!("configure: could not resolve group {group_name:?}, fileset not seeded live");
        return;
    };

    let fileset = new_fileset.fileset;
    ctx.catalog.insert_fileset(Fileset {
        id: 0,
        friendly_name: fileset.friendly_name,
        group_id,
        group_name,
        storage_alias: fileset.storage_alias,
        transport: fileset.transport.into(),
        enabled: fileset.enabled,
        blacklist_hours: fileset.blacklist_hours.parse().unwrap_or_default(),
        retention: fileset.retention.parse().unwrap_or_default(),
        do_snapshot_size_listing: fileset.do_snapshot_size_listing,
        use_donotrund: fileset.use_donotrund,
        tags: fileset.tags,
        is_queued: false,
        is_running: false,
        last_ok: None,
        last_run: None,
        first_fail: None,
        average_duration: 0,
        total_size_mb: 0,
    });
}

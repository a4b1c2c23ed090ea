//! The prompt flow itself: `CustomType`/`Select`/`Text`/`Confirm` widgets
//! walking the operator through a fileset's fields instead of a ZFS
//! retention rule.

use inquire::{Confirm, Select, Text};

use crate::config::{FilesetToml, GroupToml, TransportToml};
use crate::transport::exec::ExecConfig;
use crate::transport::rsync::{RsyncConfig, RsyncUri};

use super::{CliContext, GroupAnswer, NewFileset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportKind {
    Rsync,
    Exec,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransportKind::Rsync => "rsync (over ssh or rsync daemon)",
            TransportKind::Exec => "exec (arbitrary command)",
        })
    }
}

/// Walk the operator through adding one fileset. Returns `None` if they
/// decline the final confirmation, leaving the config file untouched.
pub fn start(ctx: &CliContext) -> color_eyre::Result<Option<NewFileset>> {
    let group = prompt_group(ctx)?;

    let friendly_name = Text::new("Friendly name for this fileset:").prompt()?;

    let storage_aliases: Vec<String> = ctx.config.storage.keys().cloned().collect();
    let storage_alias = if storage_aliases.len() == 1 {
        storage_aliases[0].clone()
    } else {
        Select::new("Storage pool:", storage_aliases).prompt()?
    };

    let transport = prompt_transport()?;

    let retention = Text::new("Retention (e.g. \"2h,16d,4w,12m,2y\"):")
        .with_default("16d,4w,12m,2y")
        .prompt()?;
    let retention = validate_retention(&retention)?;

    let blacklist_hours = Text::new("Blacklist hours, comma-separated (blank for none):")
        .with_default("")
        .prompt()?;
    let blacklist_hours = validate_blacklist_hours(&blacklist_hours)?;

    let do_snapshot_size_listing =
        Confirm::new("Record a per-snapshot disk-usage breakdown after each run?")
            .with_default(false)
            .prompt()?;

    let tags = Text::new("Tags, comma-separated (blank for none):")
        .with_default("")
        .prompt()?;
    let tags: Vec<String> = tags
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let fileset = FilesetToml {
        friendly_name,
        group: group.to_string(),
        storage_alias,
        transport,
        enabled: true,
        blacklist_hours,
        retention,
        do_snapshot_size_listing,
        use_donotrund: false,
        tags,
    };

    println!("\nAbout to add {}/{}", group, fileset.friendly_name);
    if !Confirm::new("Proceed?").with_default(true).prompt()? {
        return Ok(None);
    }

    Ok(Some(NewFileset { group, fileset }))
}

fn prompt_group(ctx: &CliContext) -> color_eyre::Result<GroupAnswer> {
    let mut groups = ctx.catalog.list_groups();
    groups.sort_by(|a, b| a.name.cmp(&b.name));
    const NEW_GROUP: &str = "<create a new group>";

    let mut options: Vec<String> = groups.iter().map(|g| g.name.clone()).collect();
    options.push(NEW_GROUP.to_string());
    let choice = Select::new("Group:", options).prompt()?;

    if choice != NEW_GROUP {
        return Ok(GroupAnswer::Existing(choice));
    }

    let name = Text::new("New group name:").prompt()?;
    let notify_email = Text::new("Notify email(s), comma-separated (blank for none):")
        .with_default("")
        .prompt()?;
    let notify_email: Vec<String> = notify_email
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect();
    let blacklist_hours = Text::new("Group blacklist hours (blank for none):")
        .with_default("")
        .prompt()?;
    validate_blacklist_hours(&blacklist_hours)?;
    let retention = Text::new("Group default retention (blank to require per-fileset):")
        .with_default("")
        .prompt()?;
    let retention = if retention.trim().is_empty() {
        None
    } else {
        Some(validate_retention(&retention)?)
    };

    Ok(GroupAnswer::New(GroupToml {
        name,
        notify_email,
        blacklist_hours,
        retention,
    }))
}

fn prompt_transport() -> color_eyre::Result<TransportToml> {
    let kind = Select::new("Transport:", vec![TransportKind::Rsync, TransportKind::Exec]).prompt()?;

    match kind {
        TransportKind::Rsync => {
            let host = Text::new("Remote host:").prompt()?;
            let user = Text::new("Remote user:").prompt()?;
            let src_dir = Text::new("Remote source directory:").prompt()?;
            let uri_kind = Select::new("Rsync transport:", vec!["ssh", "rsync-daemon"]).prompt()?;
            let transport = if uri_kind == "ssh" {
                RsyncUri::Ssh
            } else {
                RsyncUri::RsyncDaemon
            };
            let use_sudo = Confirm::new("Run rsync through sudo on the remote end?")
                .with_default(false)
                .prompt()?;
            let use_ionice = Confirm::new("Run rsync under ionice on the remote end?")
                .with_default(false)
                .prompt()?;

            Ok(TransportToml::Rsync(RsyncConfig {
                host,
                user,
                src_dir,
                includes: String::new(),
                excludes: String::new(),
                flags: String::new(),
                use_sudo,
                use_ionice,
                rsync_path: "rsync".to_string(),
                ionice_path: "ionice".to_string(),
                transport,
                known_hosts_dir: None,
            }))
        }
        TransportKind::Exec => {
            let transport_command = Text::new("Transport command:").prompt()?;
            Ok(TransportToml::Exec(ExecConfig { transport_command }))
        }
    }
}

fn validate_retention(raw: &str) -> color_eyre::Result<String> {
    raw.parse::<crate::model::RetentionMap>()
        .map_err(|e| color_eyre::eyre::eyre!("invalid retention {raw:?}: {e}"))?;
    Ok(raw.to_string())
}

fn validate_blacklist_hours(raw: &str) -> color_eyre::Result<String> {
    raw.parse::<crate::model::BlacklistHours>()
        .map_err(|e| color_eyre::eyre::eyre!("invalid blacklist hours {raw:?}: {e}"))?;
    Ok(raw.to_string())
}

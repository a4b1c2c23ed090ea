//! `planb-objsync`: `planb-objsync [-c configfile] <section>
//! [<container> | --all-containers] [--test-path-translate <container>]`.
//! The standalone object-store mirror tool; shares the
//! `objsync` pipeline with the `planb` binary but otherwise has no
//! knowledge of the fileset catalog — its state is file-based.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use color_eyre::eyre::{Context, eyre, Result};

use planb::objsync::client::HttpObjectStoreClient;
use planb::objsync::sync::{self, ContainerScope, MetadataPaths};
use planb::objsync::{config::ObjsyncConfig, AbortFlag};

const DEFAULT_CONFIG_PATH: &str = "/etc/planb/planb-objsync.conf";
const DEFAULT_METADATA_ROOT: &str = "/var/lib/planb/objsync";

#[derive(Parser, Debug)]
#[command(
    name = "planb-objsync",
    about = "Resumable diff-and-fetch mirror of an object-store namespace into a local directory tree"
)]
struct Args {
    /// INI-style configuration file.
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// The `[section]` to sync.
    section: String,

    /// A single container to sync.
    container: Option<String>,

    /// Sync every container the section's endpoint exposes.
    #[arg(long = "all-containers", conflicts_with = "container")]
    all_containers: bool,

    /// Print the translated local path for a remote path under `container`
    /// and exit, without touching the network.
    #[arg(long = "test-path-translate", value_name = "CONTAINER")]
    test_path_translate: Option<String>,

    /// Root directory holding each section's `<root>/planb-objsync.{cur,...}`
    /// metadata files.
    #[arg(long = "metadata-root", default_value = DEFAULT_METADATA_ROOT)]
    metadata_root: PathBuf,

    /// Local directory data is mirrored into.
    #[arg(long = "dest")]
    dest: PathBuf,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let args = Args::parse();

    let config = ObjsyncConfig::load(&args.config)
        .wrap_err_with(|| format!("loading {}", args.config.display()))?;
    let section = config
        .section(&args.section)
        .ok_or_else(|| eyre!("no [{}] section in {}", args.section, args.config.display()))?;

    if let Some(container) = &args.test_path_translate {
        let sample_path = "example/path/to/object";
        let translated = section.translator.translate(container, sample_path);
        println!("{sample_path} -> {translated}");
        return Ok(());
    }

    let scope = match (&args.container, args.all_containers) {
        (Some(container), false) => ContainerScope::Single(container.clone()),
        (None, true) => ContainerScope::All,
        (Some(_), true) => return Err(eyre!("--all-containers conflicts with <container>")),
        (None, false) => {
            return Err(eyre!("specify either <container> or --all-containers"));
        }
    };

    let abort = AbortFlag::new();
    abort
        .register_signal_handlers()
        .wrap_err("registering signal handlers")?;

    let client = HttpObjectStoreClient::new(section).wrap_err("building object-store client")?;
    let section_dir = args.metadata_root.join(&args.section);
    let paths = MetadataPaths::new(section_dir);

    let start = Instant::now();
    let outcome = sync::run(&client, section, scope, &args.dest, &paths, &abort)
        .wrap_err_with(|| format!("syncing section {:?}", args.section))?;
    let wall_time = start.elapsed();

    log::info!(
        "objsync {}: added={} updated={} deleted={} hard_failures={} transient_failures={} in {:?}",
        args.section,
        outcome.added,
        outcome.updated,
        outcome.deleted,
        outcome.hard_failures.len(),
        outcome.transient_failures.len(),
        wall_time,
    );
    for failure in &outcome.hard_failures {
        log::error!("hard failure: {failure}");
    }
    for failure in &outcome.transient_failures {
        log::warn!("transient failure: {failure}");
    }

    std::process::exit(outcome.exit_code(wall_time));
}

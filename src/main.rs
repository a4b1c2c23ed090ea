//! `planb`: the backup orchestration daemon/CLI. Subcommands dispatch
//! into `cli::*`; `bqcluster` is the long-running daemon heart. Built
//! around a `clap::Parser`/`Subcommand` shape with an `install`/`remove`
//! pair (`service_install::install_system!`) for running as a system
//! service.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use service_install::install_system;

use planb::cli::{self, bqcluster::BqclusterArgs, breport::ReportOutput, CliContext};
use planb::config::Config;

const DEFAULT_CONFIG_PATH: &str = "/etc/planb/planb.toml";

#[derive(Parser, Debug)]
#[command(
    name = "planb",
    version,
    about = "Backup orchestration: scheduled transports into a copy-on-write storage pool with tiered snapshot retention"
)]
struct Args {
    /// Path to the TOML catalog/storage/scheduler configuration.
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List filesets, optionally as Zabbix discovery/summary JSON.
    Blist {
        #[arg(long)]
        zabbix: bool,
        #[arg(long)]
        summary: bool,
        #[arg(long)]
        double: bool,
    },
    /// Enqueue every enabled fileset for immediate backup.
    Bqueueall,
    /// Purge queued state so stuck filesets become claimable again.
    Bqueueflush {
        #[arg(long = "queue")]
        queue: Option<String>,
    },
    /// Deep-copy a fileset's configuration onto a new host.
    Bclone {
        fileset_id: i64,
        new_friendly_name: String,
        new_host: String,
    },
    /// Per-group health report.
    Breport {
        #[arg(long, default_value = "stdout")]
        output: String,
    },
    /// Structured dump of fileset configuration.
    Confexport {
        #[arg(long, default_value = "json")]
        output: String,
        #[arg(long)]
        minimal: bool,
        group_glob: Option<String>,
        fileset_glob: Option<String>,
    },
    /// List datasets found in storage, matching them to filesets.
    Slist {
        #[arg(long)]
        stale: bool,
    },
    /// Past-year failure spans per fileset.
    Bstats {
        group_glob: Option<String>,
        fileset_glob: Option<String>,
    },
    /// Run the scheduler tick loop plus the job-runner worker pool.
    Bqcluster {
        #[arg(long = "queue")]
        queue: Option<String>,
        #[arg(long = "run-once")]
        run_once: bool,
    },
    /// Interactively add a fileset to the configuration file.
    Configure {
        #[arg(long)]
        sandbox: bool,
    },
    /// Install `planb bqcluster` as a system service.
    Install,
    /// Remove the installed system service.
    Remove,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let args = Args::parse();

    match &args.command {
        Commands::Install => return install(),
        Commands::Remove => return remove(),
        _ => {}
    }

    let config = Config::load(&args.config)?;
    let ctx = CliContext::from_config(config)?;
    let mut stdout = std::io::stdout();

    match args.command {
        Commands::Blist { zabbix, summary, double } => {
            cli::blist::run(&ctx, cli::blist::BlistArgs { zabbix, summary, double }, &mut stdout)?;
        }
        Commands::Bqueueall => {
            let queued = cli::bqueueall::run(&ctx)?;
            writeln!(stdout, "queued {queued} fileset(s)")?;
        }
        Commands::Bqueueflush { queue } => {
            if let Some(queue) = &queue {
                log::info!("bqueueflush: --queue={queue} ignored, single in-process queue");
            }
            let flushed = cli::bqueueflush::run(&ctx)?;
            writeln!(stdout, "flushed {flushed} fileset(s)")?;
        }
        Commands::Bclone { fileset_id, new_friendly_name, new_host } => {
            let new_id = cli::bclone::run(&ctx, fileset_id, &new_friendly_name, &new_host)?;
            writeln!(stdout, "cloned fileset {fileset_id} -> {new_id}")?;
        }
        Commands::Breport { output } => {
            let output = match output.as_str() {
                "email" => ReportOutput::Email,
                _ => ReportOutput::Stdout,
            };
            cli::breport::run(&ctx, output, &mut stdout)?;
        }
        Commands::Confexport { output, minimal, group_glob, fileset_glob } => {
            let exported = cli::confexport::export(
                &ctx,
                group_glob.as_deref(),
                fileset_glob.as_deref(),
                minimal,
            );
            let format = match output.as_str() {
                "yaml" => cli::confexport::ExportFormat::Yaml,
                _ => cli::confexport::ExportFormat::Json,
            };
            writeln!(stdout, "{}", cli::confexport::render(&exported, format)?)?;
        }
        Commands::Slist { stale } => {
            for entry in cli::slist::run(&ctx, stale)? {
                writeln!(
                    stdout,
                    "{}\t{}\t{}",
                    entry.storage_alias,
                    entry.dataset_name,
                    entry.matched_fileset.as_deref().unwrap_or("(stale)")
                )?;
            }
        }
        Commands::Bstats { group_glob, fileset_glob } => {
            for span in cli::bstats::run(&ctx, group_glob.as_deref(), fileset_glob.as_deref()) {
                writeln!(
                    stdout,
                    "{}\t{}..{}\t{} failing run(s)",
                    span.fileset, span.start, span.end, span.run_count
                )?;
            }
        }
        Commands::Bqcluster { queue, run_once } => {
            if let Some(queue) = &queue {
                log::info!("bqcluster: --queue={queue} ignored, single in-process queue");
            }
            cli::bqcluster::run(&ctx, BqclusterArgs { run_once })?;
        }
        Commands::Configure { sandbox } => {
            planb::configure::run(&ctx, &args.config, sandbox)?;
        }
        Commands::Install | Commands::Remove => unreachable!("handled above"),
    }

    Ok(())
}

fn install() -> Result<()> {
    install_system!()
        .current_exe()
        .unwrap()
        .service_name("planb-bqcluster")
        .on_boot()
        .prepare_install()?
        .install()?;
    Ok(())
}

fn remove() -> Result<()> {
    install_system!().prepare_remove()?.remove()?;
    Ok(())
}

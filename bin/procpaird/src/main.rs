//! ---
//! pp_section: "01-core-functionality"
//! pp_subsection: "binary"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Binary entrypoint for the process-pair daemon."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use procpair_common::{init_tracing, AppConfig, LogFormat};
use procpair_redundancy::{
    Checkpoint, CommandSupervisor, DisabledSupervisor, PacedWork, PairOutcome, PairSettings,
    ProcessPair, ProcessSupervisor,
};
use procpair_transport::{BroadcastTransport, UdpBroadcastTransport};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "configs/procpair.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Primary/backup process-pair daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Do not launch a replacement backup after promotion")]
    no_spawn: bool,

    #[arg(long, value_enum, help = "Override the stdout log format")]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Json,
    Pretty,
}

impl CliLogFormat {
    fn as_arg(self) -> &'static str {
        match self {
            CliLogFormat::Json => "json",
            CliLogFormat::Pretty => "pretty",
        }
    }
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Json => LogFormat::StructuredJson,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Start as backup and take over when the primary goes silent")]
    Run,
    #[command(about = "Start directly as primary")]
    Primary {
        #[arg(long, default_value_t = 0, help = "Checkpoint to resume work from")]
        from: u64,
    },
    #[command(about = "Print the effective configuration and exit")]
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let candidates = config_candidates(cli.config.as_deref())?;
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    let config_path = loaded.source;
    apply_overrides(&cli, &mut config);

    let start_as_primary = match cli.command.unwrap_or(Commands::Run) {
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        Commands::Run => None,
        Commands::Primary { from } => Some(Checkpoint(from)),
    };

    init_tracing("procpaird", &config.logging)?;
    match &config_path {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running with defaults"),
    }

    let default_args = backup_args(config_path.as_deref(), cli.log_format)?;
    let supervisor = build_supervisor(&config, default_args)?;
    let transport = Arc::new(UdpBroadcastTransport::bind(&config.network)?);
    let shutdown = CancellationToken::new();
    let pair = ProcessPair::new(
        PairSettings::from(&config.pair),
        transport.clone(),
        supervisor,
    )
    .with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });

    let mut work = PacedWork::new(config.pair.work_interval);
    let outcome = match start_as_primary {
        Some(from) => pair.run_as_primary(from, &mut work).await?,
        None => pair.run(&mut work).await?,
    };
    report(&outcome, transport.as_ref());
    Ok(())
}

/// An explicit path must exist; only the built-in candidate may be absent.
fn config_candidates(explicit: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("configuration file {} does not exist", path.display());
        }
        candidates.push(path.to_path_buf());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG));
    Ok(candidates)
}

fn apply_overrides(cli: &Cli, config: &mut AppConfig) {
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
    if cli.no_spawn {
        config.supervisor.enabled = false;
    }
}

/// Arguments that start a replacement instance as backup with this instance's
/// configuration file and log format.
fn backup_args(
    config_path: Option<&Path>,
    log_format: Option<CliLogFormat>,
) -> Result<Vec<String>> {
    let mut args = Vec::new();
    if let Some(path) = config_path {
        let absolute = std::path::absolute(path)
            .with_context(|| format!("unable to resolve {}", path.display()))?;
        args.push("--config".to_owned());
        args.push(absolute.display().to_string());
    }
    if let Some(format) = log_format {
        args.push("--log-format".to_owned());
        args.push(format.as_arg().to_owned());
    }
    args.push("run".to_owned());
    Ok(args)
}

fn build_supervisor(
    config: &AppConfig,
    default_args: Vec<String>,
) -> Result<Arc<dyn ProcessSupervisor>> {
    if !config.supervisor.enabled {
        info!("backup spawning disabled");
        return Ok(Arc::new(DisabledSupervisor));
    }
    let supervisor = CommandSupervisor::from_config(&config.supervisor, default_args)?;
    info!(
        program = %supervisor.program().display(),
        args = ?supervisor.args(),
        "replacement backups will be launched on promotion"
    );
    Ok(Arc::new(supervisor))
}

fn report<T: BroadcastTransport + ?Sized>(outcome: &PairOutcome, transport: &T) {
    let metrics = transport.metrics();
    info!(
        role = %outcome.role,
        next_checkpoint = ?outcome.next_checkpoint.map(|c| c.get()),
        replicated = outcome.checkpoints_replicated,
        standby_spawned = outcome.promotion.as_ref().map(|p| p.standby_spawned),
        sent = metrics.sent,
        received = metrics.received,
        send_failures = metrics.send_failures,
        dropped = metrics.dropped,
        transport = transport.name(),
        "instance stopped"
    );
}

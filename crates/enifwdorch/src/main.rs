//! ENI forwarding replay tool.
//!
//! Loads a snapshot of the collaborator state plus an event list, replays the
//! events through the orch and prints the resulting ACL tables as JSON.

use clap::{Parser, ValueEnum};
use log::{error, info};
use sonic_enifwdorch::audit;
use sonic_enifwdorch::replay::{self, Snapshot};
use sonic_enifwdorch::DashEniFwdOrchConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// env_logger text lines
    Plain,
    /// JSON lines, audit records included
    Json,
    /// Multi-line human readable output
    Pretty,
}

/// Replays ENI forwarding events offline
#[derive(Parser, Debug)]
#[command(name = "enifwdorch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Snapshot file (JSON) with DPUs, VIP, ports, VNETs and events
    #[arg(short = 's', long)]
    snapshot: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,

    /// Base priority of the redirect rules
    #[arg(long, default_value = "9996")]
    base_priority: u32,

    /// Write the result here instead of stdout
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

fn init_logging(args: &Args) {
    match args.log_format {
        LogFormat::Plain => {
            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or(&args.log_level),
            )
            .init();
        }
        LogFormat::Json => audit::init_logging(&args.log_level),
        LogFormat::Pretty => audit::init_logging_pretty(&args.log_level),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let snapshot = match Snapshot::from_file(&args.snapshot) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Loaded snapshot {}: {} DPUs, {} events",
        args.snapshot.display(),
        snapshot.dpus.len(),
        snapshot.events.len()
    );

    let config = DashEniFwdOrchConfig::default().with_base_priority(args.base_priority);
    let report = replay::replay(&snapshot, config).await;

    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize replay result: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match &args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, json) {
                error!("Failed to write {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
            info!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }

    if report.pending.is_empty() {
        ExitCode::SUCCESS
    } else {
        error!("{} entries still pending", report.pending.len());
        ExitCode::from(2)
    }
}

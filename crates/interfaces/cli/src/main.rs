mod daemon;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use vigil_config::{AppConfig, TelemetryConfig};
use vigil_core::format_utc_iso;
use vigil_runtime::build_monitor;
use vigil_store::{FileStatusStore, StatusStore};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(
    name = "vigil",
    version,
    about = "Reconciles resident status snapshots against the sensor portal"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the monitor until SIGINT or SIGTERM (default).
    Run,
    /// Run one cycle for every resident, then exit.
    Once,
    /// Print the persisted status of every resident.
    Status {
        /// Print the state file's `{id: {status, timestamp}}` JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and exit.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    let _log_guard = init_tracing(&config.telemetry)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            config.validate()?;
            daemon::run_monitor(config).await?;
        }
        Commands::Once => {
            config.validate()?;
            let mut monitor = build_monitor(&config).await?;
            let report = monitor.run_tick().await;
            println!(
                "succeeded: {}  failed: {}  panicked: {}",
                report.succeeded, report.failed, report.panicked
            );
        }
        Commands::Status { json } => print_status(&config, json)?,
        Commands::Check => {
            config.validate()?;
            println!("configuration ok: {}", cli.config.display());
            println!("- webdav host: {}", config.webdav.hostname);
            println!("- state file: {}", config.monitor.state_file);
            println!("- alert threshold: {}", config.monitor.alert_threshold);
            for resident in config.resident_configs() {
                println!(
                    "- resident {} every {}s ({} -> {})",
                    resident.id,
                    resident.poll_interval.as_secs(),
                    resident.upload_path.display(),
                    config.monitor.remote_path_for(&resident.id),
                );
            }
            if !config.email.is_complete() {
                println!("warning: email settings incomplete, alerts will not be delivered");
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured level.  The returned guard must live
/// as long as file logging is needed.
fn init_tracing(telemetry: &TelemetryConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&telemetry.log_level))?;

    if telemetry.log_dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&telemetry.log_dir, "vigil.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

fn print_status(config: &AppConfig, as_json: bool) -> Result<()> {
    let store = FileStatusStore::open(config.monitor.state_file.as_str());
    if as_json {
        println!("{}", store.render()?);
        return Ok(());
    }

    let snapshot = store.snapshot();
    if snapshot.is_empty() {
        println!("no statuses recorded in {}", store.path().display());
        return Ok(());
    }
    for (id, record) in &snapshot {
        println!(
            "{id:<12} {:<20} {}",
            record.status.label(),
            format_utc_iso(record.observed_at)
        );
    }
    Ok(())
}

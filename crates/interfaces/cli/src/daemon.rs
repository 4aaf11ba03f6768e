//! Long-running `run` mode: single-instance lock, signal handling, and the
//! monitor loop.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio::sync::watch;
use tracing::{info, warn};

use vigil_config::AppConfig;
use vigil_runtime::build_monitor;

pub(crate) async fn run_monitor(config: AppConfig) -> Result<()> {
    let lock_path = lock_path_for(Path::new(&config.monitor.state_file));
    let _lock = acquire_lock(&lock_path)?;

    let mut monitor = build_monitor(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match wait_for_termination().await {
            Ok(()) => info!("termination signal received, finishing current tick"),
            Err(err) => warn!(error = %err, "signal handler failed, stopping monitor"),
        }
        let _ = shutdown_tx.send(true);
    });

    monitor.run(shutdown_rx).await;

    let _ = fs::remove_file(&lock_path);
    info!("monitor stopped");
    Ok(())
}

/// Two monitors sharing a state file would overwrite each other's records.
fn acquire_lock(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!("another monitor instance already holds {}", path.display())
    })?;
    Ok(file)
}

fn lock_path_for(state_file: &Path) -> PathBuf {
    let mut name = state_file
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "state".into());
    name.push(".lock");
    state_file.with_file_name(name)
}

async fn wait_for_termination() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}

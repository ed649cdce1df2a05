//! Scheduler daemon command implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use backupd::backup::{BackupCommands, TrackedBackupCallback};
use backupd::build_info;
use backupd::config::Config;
use backupd::scheduler::{SchedulerConfig, SchedulerService};
use backupd::store::file::FileJobStore;
use backupd::tasks::TaskTracker;

pub async fn run(config_path: &str, data_dir_override: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path).await?;
    let data_dir = super::data_dir(&config, config_path, data_dir_override);

    info!(
        version = %build_info::version_string(),
        data_dir = %data_dir.display(),
        "Starting backupd"
    );

    let tracker = TaskTracker::new()
        .with_timeout(config.tasks.timeout_seconds.map(Duration::from_secs));
    let commands = Arc::new(BackupCommands::from_config(
        &config.backups,
        Path::new(config_path),
    ));
    let callback = Arc::new(TrackedBackupCallback::new(tracker, commands));
    let store = Arc::new(FileJobStore::in_dir(&data_dir));

    let mut scheduler_config = SchedulerConfig::new(store, callback);
    scheduler_config.history_capacity = config.history.max_entries;
    let handle = SchedulerService::new(scheduler_config).start().await;

    let stats = handle.stats().await;
    info!(
        jobs = stats.total_jobs,
        active = stats.active_jobs,
        "Scheduler ready"
    );

    shutdown_signal().await;

    handle.shutdown().await;
    info!("Scheduler stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

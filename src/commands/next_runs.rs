//! Offline preview of upcoming fire times.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use backupd::config::Config;
use backupd::scheduler::trigger;
use backupd::store::JobStore;
use backupd::store::file::FileJobStore;

pub async fn run(config_path: &str, data_dir_override: Option<&Path>, count: usize) -> Result<()> {
    let config = Config::load(config_path).await?;
    let data_dir = super::data_dir(&config, config_path, data_dir_override);
    let store = FileJobStore::in_dir(&data_dir);

    let jobs = store
        .load_all()
        .await
        .with_context(|| format!("failed to load jobs from {}", store.path().display()))?;

    if jobs.is_empty() {
        println!("No jobs in {}", store.path().display());
        return Ok(());
    }

    let now = Utc::now();
    for job in &jobs {
        println!("{} [{}] {} ({})", job.id, job.status, job.name, job.recurrence);
        if !job.is_active() {
            println!("  not scheduled");
            continue;
        }
        match trigger::upcoming(&job.recurrence, now, count) {
            Ok(times) if times.is_empty() => println!("  no future runs"),
            Ok(times) => {
                for time in times {
                    println!("  {}", time.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }
            Err(e) => println!("  invalid recurrence: {e}"),
        }
    }

    Ok(())
}

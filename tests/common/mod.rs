//! Common test utilities.
#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use backupd::backup::{BackupCallback, BackupError, BackupType};
use backupd::scheduler::{SchedulerConfig, SchedulerHandle, SchedulerService};
use backupd::store::JobStore;
use backupd::store::file::FileJobStore;

/// Callback that records every invocation instead of running commands.
#[derive(Default)]
pub struct RecordingCallback {
    calls: Mutex<Vec<(BackupType, String)>>,
    failing: Mutex<HashSet<BackupType>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make invocations of `backup_type` fail.
    pub fn fail_on(&self, backup_type: BackupType) {
        self.failing.lock().unwrap().insert(backup_type);
    }

    /// Make every invocation take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<(BackupType, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn invoked_types(&self) -> Vec<BackupType> {
        self.calls().into_iter().map(|(t, _)| t).collect()
    }

    /// Highest number of invocations observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackupCallback for RecordingCallback {
    async fn invoke(&self, backup_type: BackupType, job_id: &str) -> Result<(), BackupError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((backup_type, job_id.to_string()));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&backup_type) {
            return Err(BackupError::CommandFailed {
                backup_type,
                task_id: format!("test_{backup_type}"),
                message: "exit code: 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Start a scheduler over `store` with `callback`.
pub async fn start_scheduler(
    store: Arc<dyn JobStore>,
    callback: Arc<RecordingCallback>,
) -> SchedulerHandle {
    SchedulerService::new(SchedulerConfig::new(store, callback))
        .start()
        .await
}

/// Start a scheduler persisting to a file inside `dir`.
pub async fn start_file_scheduler(
    dir: &std::path::Path,
    callback: Arc<RecordingCallback>,
) -> SchedulerHandle {
    start_scheduler(Arc::new(FileJobStore::in_dir(dir)), callback).await
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

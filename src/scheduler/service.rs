//! Scheduler service for executing backup jobs.
//!
//! Runs as a background task, managing one timer per active job and
//! executing jobs when their timers fire. A single-permit gate guarantees
//! that at most one backup runs at a time; a firing that finds the gate
//! held is skipped, not queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, Semaphore, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::error::{Result, SchedulerError};
use super::history::{DEFAULT_HISTORY_CAPACITY, ExecutionHistory, HistoryEntry};
use super::job::{Job, JobId, JobStatus, JobUpdate, NewJob, RunOutcome};
use super::presets;
use super::registry::JobRegistry;
use super::trigger;
use crate::backup::{BackupCallback, BackupType};
use crate::store::JobStore;

/// Default number of history entries returned by [`SchedulerHandle::history`].
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Entries shown in each section of [`SchedulerStats`].
const STATS_PREVIEW_LEN: usize = 5;

/// Active timers by job ID. Dropping or firing a sender cancels its timer.
type Timers = Arc<RwLock<HashMap<JobId, oneshot::Sender<()>>>>;

// ============================================================================
// Public API
// ============================================================================

/// Result of one firing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// Every invoked backup type succeeded.
    Completed,
    /// A backup type failed; remaining types were not invoked.
    Failed(String),
    /// Another backup held the gate.
    Skipped,
    /// The job was paused, disabled, or deleted.
    Inactive,
}

/// Handle for interacting with the scheduler service.
#[derive(Clone)]
pub struct SchedulerHandle {
    runtime: Runtime,
}

impl SchedulerHandle {
    /// Create a job and arm its timer if it is active.
    pub async fn create_job(&self, new: NewJob) -> Result<Job> {
        let job = self.runtime.registry.create(new).await?;
        if job.is_active() {
            self.runtime.send(SchedulerCommand::Arm(job.id.clone())).await;
        }
        info!(job_id = %job.id, name = %job.name, "Job created");
        Ok(job)
    }

    /// Create a job from a built-in preset.
    pub async fn create_from_preset(&self, preset_id: &str) -> Result<Job> {
        self.create_job(presets::build(preset_id)?).await
    }

    /// Update a job, re-arming or disarming its timer to match its status.
    pub async fn update_job(&self, id: &str, update: JobUpdate) -> Result<Job> {
        let job = self.runtime.registry.update(id, update).await?;
        let command = if job.is_active() {
            SchedulerCommand::Arm(job.id.clone())
        } else {
            SchedulerCommand::Disarm(job.id.clone())
        };
        self.runtime.send(command).await;
        Ok(job)
    }

    /// Stop a job from firing until resumed.
    pub async fn pause_job(&self, id: &str) -> Result<Job> {
        self.update_job(id, JobUpdate::status(JobStatus::Paused)).await
    }

    /// Re-activate a paused or disabled job.
    pub async fn resume_job(&self, id: &str) -> Result<Job> {
        self.update_job(id, JobUpdate::status(JobStatus::Active)).await
    }

    /// Delete a job. Returns `false` when it did not exist.
    pub async fn delete_job(&self, id: &str) -> bool {
        let removed = self.runtime.registry.delete(id).await;
        if removed {
            self.runtime
                .send(SchedulerCommand::Disarm(id.to_string()))
                .await;
            info!(job_id = %id, "Job deleted");
        }
        removed
    }

    pub async fn get_job(&self, id: &str) -> Option<Job> {
        self.runtime.registry.get(id).await
    }

    /// All jobs, oldest first.
    pub async fn list_jobs(&self) -> Vec<Job> {
        self.runtime.registry.list_all().await
    }

    /// Fire a job now in the background, subject to the same gate.
    pub async fn run_now(&self, id: &str) -> Result<()> {
        if self.runtime.registry.get(id).await.is_none() {
            return Err(SchedulerError::NotFound(id.to_string()));
        }

        let runtime = self.runtime.clone();
        let job_id = id.to_string();
        tokio::spawn(async move {
            runtime.fire_and_rearm(&job_id, None).await;
        });
        Ok(())
    }

    /// Fire a job now and wait for the outcome.
    pub async fn fire(&self, id: &str) -> Result<FireOutcome> {
        if self.runtime.registry.get(id).await.is_none() {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        Ok(self.runtime.fire_and_rearm(id, None).await)
    }

    /// Most recent history entries, optionally for one job only.
    pub async fn history(&self, job_id: Option<&str>, limit: usize) -> Vec<HistoryEntry> {
        match job_id {
            Some(id) => self.runtime.history.for_job(id, limit).await,
            None => self.runtime.history.recent(limit).await,
        }
    }

    /// Summary counts, soonest upcoming runs, and latest history.
    pub async fn stats(&self) -> SchedulerStats {
        let jobs = self.runtime.registry.list_all().await;
        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();

        let mut upcoming_runs: Vec<UpcomingRun> = jobs
            .iter()
            .filter(|j| j.is_active())
            .filter_map(|j| {
                j.stats.next_run.map(|next_run| UpcomingRun {
                    job_id: j.id.clone(),
                    name: j.name.clone(),
                    next_run,
                    backup_types: j.backup_types.clone(),
                })
            })
            .collect();
        upcoming_runs.sort_by_key(|u| u.next_run);
        upcoming_runs.truncate(STATS_PREVIEW_LEN);

        SchedulerStats {
            total_jobs: jobs.len(),
            active_jobs: count(JobStatus::Active),
            paused_jobs: count(JobStatus::Paused),
            disabled_jobs: count(JobStatus::Disabled),
            scheduler_running: self.is_running(),
            upcoming_runs,
            recent_history: self.runtime.history.recent(STATS_PREVIEW_LEN).await,
        }
    }

    /// Whether the service loop is running.
    pub fn is_running(&self) -> bool {
        self.runtime.running.load(Ordering::SeqCst)
    }

    /// Cancel every timer and stop the service loop.
    pub async fn shutdown(&self) {
        self.runtime.running.store(false, Ordering::SeqCst);
        self.runtime.send(SchedulerCommand::Shutdown).await;
    }
}

/// Snapshot returned by [`SchedulerHandle::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub paused_jobs: usize,
    pub disabled_jobs: usize,
    pub scheduler_running: bool,
    /// Soonest active jobs, ascending by next run.
    pub upcoming_runs: Vec<UpcomingRun>,
    /// Newest history entries first.
    pub recent_history: Vec<HistoryEntry>,
}

/// One upcoming firing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpcomingRun {
    pub job_id: JobId,
    pub name: String,
    pub next_run: DateTime<Utc>,
    pub backup_types: Vec<BackupType>,
}

/// Configuration for the scheduler service.
pub struct SchedulerConfig {
    /// Storage backend for job persistence.
    pub job_store: Arc<dyn JobStore>,
    /// Invoked once per backup type when a job fires.
    pub callback: Arc<dyn BackupCallback>,
    /// Number of history entries kept.
    pub history_capacity: usize,
}

impl SchedulerConfig {
    pub fn new(job_store: Arc<dyn JobStore>, callback: Arc<dyn BackupCallback>) -> Self {
        Self {
            job_store,
            callback,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// The scheduler service.
pub struct SchedulerService {
    registry: JobRegistry,
    history: ExecutionHistory,
    callback: Arc<dyn BackupCallback>,
}

impl SchedulerService {
    /// Create a new scheduler service.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            registry: JobRegistry::new(config.job_store),
            history: ExecutionHistory::new(config.history_capacity),
            callback: config.callback,
        }
    }

    /// Load persisted jobs, arm every active one, and start the service loop.
    ///
    /// Returns a handle for interacting with the service.
    pub async fn start(self) -> SchedulerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        let runtime = Runtime {
            registry: self.registry,
            history: self.history,
            callback: self.callback,
            timers: Arc::new(RwLock::new(HashMap::new())),
            gate: Arc::new(Semaphore::new(1)),
            running: Arc::new(AtomicBool::new(true)),
            command_tx,
        };

        // An unreadable job file must not keep the scheduler from starting.
        if let Err(e) = runtime.registry.load().await {
            error!(error = %e, "Failed to load jobs, starting with none");
        }

        for job in runtime.registry.list_active().await {
            runtime.arm(&job.id).await;
        }

        tokio::spawn(run(runtime.clone(), command_rx));

        SchedulerHandle { runtime }
    }
}

// ============================================================================
// Internal Types
// ============================================================================

/// Command to the scheduler service.
enum SchedulerCommand {
    /// Arm (or re-arm) the timer for a job.
    Arm(JobId),
    /// Cancel the timer for a job.
    Disarm(JobId),
    /// Shutdown the service.
    Shutdown,
}

/// Shared state used by the service loop, timers, and handles.
#[derive(Clone)]
struct Runtime {
    registry: JobRegistry,
    history: ExecutionHistory,
    callback: Arc<dyn BackupCallback>,
    timers: Timers,
    /// Single permit: held while a backup runs.
    gate: Arc<Semaphore>,
    running: Arc<AtomicBool>,
    command_tx: mpsc::Sender<SchedulerCommand>,
}

/// Main service loop.
async fn run(runtime: Runtime, mut command_rx: mpsc::Receiver<SchedulerCommand>) {
    info!("Scheduler service started");

    while let Some(cmd) = command_rx.recv().await {
        match cmd {
            SchedulerCommand::Arm(id) => runtime.arm(&id).await,
            SchedulerCommand::Disarm(id) => runtime.disarm(&id).await,
            SchedulerCommand::Shutdown => {
                info!("Scheduler service shutting down");
                let mut timers = runtime.timers.write().await;
                for (_, cancel) in timers.drain() {
                    let _ = cancel.send(());
                }
                break;
            }
        }
    }

    runtime.running.store(false, Ordering::SeqCst);
    info!("Scheduler service stopped");
}

impl Runtime {
    async fn send(&self, command: SchedulerCommand) {
        let _ = self.command_tx.send(command).await;
    }

    /// Start (or replace) the timer for a job.
    ///
    /// A stored `next_run` still in the future is reused; otherwise the next
    /// fire time is recomputed from now, so missed firings are not replayed.
    async fn arm(&self, id: &str) {
        let job = match self.registry.get(id).await {
            Some(job) if job.is_active() => job,
            _ => {
                self.disarm(id).await;
                return;
            }
        };

        let now = Utc::now();
        let next_run = match job.stats.next_run {
            Some(next) if next > now => Some(next),
            _ => match trigger::next_fire(&job.recurrence, now) {
                Ok(next) => next,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Could not calculate next run time");
                    None
                }
            },
        };
        self.registry.set_next_run(id, next_run).await;

        let Some(next_run) = next_run else {
            debug!(job_id = %id, "Job has no upcoming fire time");
            self.disarm(id).await;
            return;
        };

        let delay = next_run
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO);

        debug!(
            job_id = %id,
            next_run = %next_run,
            delay_secs = delay.as_secs(),
            "Starting timer"
        );

        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut timers = self.timers.write().await;
            if let Some(previous) = timers.insert(id.to_string(), cancel_tx) {
                let _ = previous.send(());
            }
        }

        let runtime = self.clone();
        let job_id = id.to_string();
        tokio::spawn(async move {
            let deadline = Instant::now() + delay;
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    runtime.fire_and_rearm(&job_id, Some(next_run)).await;
                }
                _ = cancel_rx => {
                    debug!(job_id = %job_id, "Timer cancelled");
                }
            }
        });
    }

    /// Cancel the timer for a job.
    async fn disarm(&self, id: &str) {
        let mut timers = self.timers.write().await;
        if let Some(cancel) = timers.remove(id) {
            let _ = cancel.send(());
            debug!(job_id = %id, "Timer cancelled");
        }
    }

    /// Fire a job, then ask the service loop to arm its next firing.
    ///
    /// `scheduled_for` is the instant a timer firing was armed for; manual
    /// firings pass `None`.
    async fn fire_and_rearm(
        &self,
        id: &str,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> FireOutcome {
        let outcome = self.fire(id, scheduled_for).await;
        if outcome != FireOutcome::Inactive {
            self.send(SchedulerCommand::Arm(id.to_string())).await;
        }
        outcome
    }

    /// Execute one firing of a job.
    async fn fire(&self, id: &str, scheduled_for: Option<DateTime<Utc>>) -> FireOutcome {
        let job = match self.registry.get(id).await {
            Some(job) if job.is_active() => job,
            Some(_) => {
                debug!(job_id = %id, "Job no longer active");
                return FireOutcome::Inactive;
            }
            None => {
                warn!(job_id = %id, "Job not found");
                return FireOutcome::Inactive;
            }
        };

        // Held until this function returns, on every path.
        let Ok(_permit) = self.gate.clone().try_acquire_owned() else {
            warn!(
                job_id = %id,
                name = %job.name,
                "Another backup is in progress, skipping firing"
            );
            return FireOutcome::Skipped;
        };

        info!(job_id = %id, name = %job.name, "Running scheduled backup");
        let started = std::time::Instant::now();
        let result = self.invoke_backups(&job).await;
        let duration_seconds = started.elapsed().as_secs_f64();
        let finished_at = Utc::now();

        match result {
            Ok(()) => {
                self.registry
                    .record_outcome(id, RunOutcome::Success, finished_at, scheduled_for)
                    .await;
                self.history
                    .record(HistoryEntry::new(
                        &job,
                        RunOutcome::Success,
                        duration_seconds,
                        "Backup completed successfully",
                    ))
                    .await;
                info!(
                    job_id = %id,
                    duration_secs = duration_seconds,
                    "Scheduled backup completed"
                );
                FireOutcome::Completed
            }
            Err(e) => {
                let message = e.to_string();
                self.registry
                    .record_outcome(id, RunOutcome::Failed, finished_at, scheduled_for)
                    .await;
                self.history
                    .record(HistoryEntry::new(
                        &job,
                        RunOutcome::Failed,
                        duration_seconds,
                        message.clone(),
                    ))
                    .await;
                error!(job_id = %id, error = %message, "Scheduled backup failed");
                FireOutcome::Failed(message)
            }
        }
    }

    /// Invoke the callback for the job's backup types.
    ///
    /// Sequential jobs run every type in order and stop at the first failure.
    /// Non-sequential jobs only run their first type.
    async fn invoke_backups(&self, job: &Job) -> Result<()> {
        let limit = if job.options.sequential_execution {
            job.backup_types.len()
        } else {
            1
        };

        for backup_type in job.backup_types.iter().take(limit) {
            debug!(job_id = %job.id, backup_type = %backup_type, "Invoking backup");
            self.callback.invoke(*backup_type, &job.id).await?;
        }
        Ok(())
    }
}

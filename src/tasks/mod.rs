//! Tracking of external backup and restore processes.
//!
//! Every invocation of an external command becomes a [`Task`] keyed by a
//! generated id. The record moves `pending -> running -> completed | failed`
//! and collects the process output line by line, so clients can poll it
//! while the command runs.
//!
//! # Usage
//!
//! ```ignore
//! let tracker = TaskTracker::new();
//! let id = tracker.dispatch(TaskRequest::backup(BackupType::Mongodb, "bash backup.sh"));
//!
//! // later
//! if let Some(task) = tracker.get(&id) {
//!     println!("{}: {:?}", task.task_id, task.status);
//! }
//! ```

mod runner;
mod tracker;

pub use tracker::TaskTracker;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::backup::BackupType;
use crate::scheduler::JobId;

/// Unique identifier for a task.
pub type TaskId = String;

// ============================================================================
// Task Record
// ============================================================================

/// State of one tracked process invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    /// Set once the task reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Non-empty output lines in arrival order.
    pub output: Vec<String>,
    pub error: Option<String>,
    /// Whether the scheduler started this task.
    pub scheduled: bool,
    /// Originating job for scheduled tasks.
    pub job_id: Option<JobId>,
}

impl Task {
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// What a task is doing: one backup type, or a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum TaskKind {
    Backup(BackupType),
    Restore,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Backup(backup_type) => write!(f, "{backup_type}"),
            TaskKind::Restore => f.write_str("restore"),
        }
    }
}

impl From<TaskKind> for String {
    fn from(value: TaskKind) -> Self {
        value.to_string()
    }
}

// ============================================================================
// Task Request
// ============================================================================

/// Everything needed to start a tracked process.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub kind: TaskKind,
    /// Shell command, run through `bash -c`.
    pub command: String,
    /// Extra environment variables for the process.
    pub env: HashMap<String, String>,
    pub scheduled: bool,
    pub job_id: Option<JobId>,
    /// Leading part of the generated task id.
    pub id_prefix: String,
    /// Lines placed in the output before the process starts.
    pub initial_output: Vec<String>,
}

impl TaskRequest {
    /// A manually started backup.
    pub fn backup(backup_type: BackupType, command: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::Backup(backup_type),
            command: command.into(),
            env: HashMap::new(),
            scheduled: false,
            job_id: None,
            id_prefix: format!("backup_{backup_type}"),
            initial_output: Vec::new(),
        }
    }

    /// A backup started by a scheduled job.
    pub fn scheduled_backup(
        backup_type: BackupType,
        job_id: impl Into<JobId>,
        command: impl Into<String>,
    ) -> Self {
        let job_id = job_id.into();
        Self {
            kind: TaskKind::Backup(backup_type),
            command: command.into(),
            env: HashMap::new(),
            scheduled: true,
            initial_output: vec![format!("Scheduled backup started (job: {job_id})")],
            job_id: Some(job_id),
            id_prefix: format!("scheduled_{backup_type}"),
        }
    }

    /// A restore of the backup set taken at `timestamp`.
    pub fn restore(timestamp: &str, command: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::Restore,
            command: command.into(),
            env: HashMap::new(),
            scheduled: false,
            job_id: None,
            id_prefix: format!("restore_{timestamp}"),
            initial_output: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_initial_output(mut self, line: impl Into<String>) -> Self {
        self.initial_output.push(line.into());
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by the task tracker.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
}

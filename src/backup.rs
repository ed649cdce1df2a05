//! Backup types and the bridge between the scheduler and external commands.
//!
//! The scheduler only knows the [`BackupCallback`] trait. The production
//! implementation, [`TrackedBackupCallback`], resolves the configured shell
//! command for a backup type and runs it as a tracked task.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::BackupsConfig;
use crate::tasks::{TaskId, TaskRequest, TaskStatus, TaskTracker};

// ============================================================================
// BackupType
// ============================================================================

/// The fixed set of things that can be backed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Mongodb,
    Milvus,
    Postgres,
    Additional,
    Global,
}

impl BackupType {
    pub const ALL: [BackupType; 5] = [
        BackupType::Mongodb,
        BackupType::Milvus,
        BackupType::Postgres,
        BackupType::Additional,
        BackupType::Global,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Mongodb => "mongodb",
            BackupType::Milvus => "milvus",
            BackupType::Postgres => "postgres",
            BackupType::Additional => "additional",
            BackupType::Global => "global",
        }
    }

    /// Script run for this type when no command is configured.
    pub fn default_script(&self) -> &'static str {
        match self {
            BackupType::Mongodb => "backup_mongodb_docker.sh",
            BackupType::Milvus => "backup_volumes_docker.sh",
            BackupType::Postgres => "backup_postgres_docker.sh",
            BackupType::Additional | BackupType::Global => "backup_global.sh",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackupType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| BackupError::UnknownType(s.to_string()))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from running backup or restore commands.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The command ran and failed.
    #[error("{backup_type} backup failed (task {task_id}): {message}")]
    CommandFailed {
        backup_type: BackupType,
        task_id: TaskId,
        message: String,
    },

    /// The tracked task disappeared before it could be inspected.
    #[error("task tracking failed: {0}")]
    Tracking(String),

    #[error("unknown backup type: {0}")]
    UnknownType(String),

    /// Restore parameters that are unsafe to pass to a shell.
    #[error("invalid restore request: {0}")]
    InvalidRestore(String),
}

// ============================================================================
// BackupCallback
// ============================================================================

/// Runs one backup type on behalf of a job.
///
/// Returning `Err` marks the firing as failed and stops any remaining types.
#[async_trait]
pub trait BackupCallback: Send + Sync {
    async fn invoke(&self, backup_type: BackupType, job_id: &str) -> Result<(), BackupError>;
}

// ============================================================================
// BackupCommands
// ============================================================================

/// Default restore script, called with the timestamp and component list.
const DEFAULT_RESTORE_SCRIPT: &str = "restore_backup.sh";

/// Resolved shell commands for each backup type and for restores.
#[derive(Debug, Clone)]
pub struct BackupCommands {
    scripts_dir: PathBuf,
    overrides: HashMap<BackupType, String>,
    restore_command: Option<String>,
    env: HashMap<String, String>,
}

impl BackupCommands {
    /// Default scripts under `scripts_dir`, no overrides, no extra env.
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            overrides: HashMap::new(),
            restore_command: None,
            env: HashMap::new(),
        }
    }

    /// Build from the `backups` config section.
    ///
    /// A relative `scripts_dir` resolves against the config file directory.
    pub fn from_config(config: &BackupsConfig, config_path: &Path) -> Self {
        Self {
            scripts_dir: crate::config::resolve_path(config_path, &config.scripts_dir),
            overrides: config.commands.clone(),
            restore_command: config.restore_command.clone(),
            env: config.env.clone(),
        }
    }

    /// Replace the command for one backup type.
    pub fn with_command(mut self, backup_type: BackupType, command: impl Into<String>) -> Self {
        self.overrides.insert(backup_type, command.into());
        self
    }

    /// Replace the restore command template.
    pub fn with_restore_command(mut self, command: impl Into<String>) -> Self {
        self.restore_command = Some(command.into());
        self
    }

    /// Add an environment variable for every command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Shell command for `backup_type`.
    pub fn command_for(&self, backup_type: BackupType) -> String {
        match self.overrides.get(&backup_type) {
            Some(command) => command.clone(),
            None => format!(
                "bash {}",
                self.scripts_dir
                    .join(backup_type.default_script())
                    .display()
            ),
        }
    }

    /// Request for a manually started backup.
    pub fn backup_request(&self, backup_type: BackupType) -> TaskRequest {
        TaskRequest::backup(backup_type, self.command_for(backup_type)).with_env(self.env.clone())
    }

    /// Request for a backup started by `job_id`.
    pub fn scheduled_request(&self, backup_type: BackupType, job_id: &str) -> TaskRequest {
        TaskRequest::scheduled_backup(backup_type, job_id, self.command_for(backup_type))
            .with_env(self.env.clone())
    }

    /// Request restoring `components` from the backup set at `timestamp`.
    ///
    /// The command template may use `{timestamp}` and `{components}`
    /// (space separated). Both values are also exported as
    /// `RESTORE_TIMESTAMP` and `RESTORE_COMPONENTS`.
    pub fn restore_request(
        &self,
        timestamp: &str,
        components: &[BackupType],
    ) -> Result<TaskRequest, BackupError> {
        if timestamp.is_empty()
            || !timestamp
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(BackupError::InvalidRestore(format!(
                "timestamp must be alphanumeric, got '{timestamp}'"
            )));
        }
        if components.is_empty() {
            return Err(BackupError::InvalidRestore(
                "at least one component is required".into(),
            ));
        }

        let components = components
            .iter()
            .map(BackupType::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        let template = match &self.restore_command {
            Some(template) => template.clone(),
            None => format!(
                "bash {} {{timestamp}} {{components}}",
                self.scripts_dir.join(DEFAULT_RESTORE_SCRIPT).display()
            ),
        };
        let command = template
            .replace("{timestamp}", timestamp)
            .replace("{components}", &components);

        let mut env = self.env.clone();
        env.insert("RESTORE_TIMESTAMP".into(), timestamp.to_string());
        env.insert("RESTORE_COMPONENTS".into(), components.clone());

        Ok(TaskRequest::restore(timestamp, command)
            .with_env(env)
            .with_initial_output(format!("Restoring {components} from {timestamp}")))
    }
}

// ============================================================================
// TrackedBackupCallback
// ============================================================================

/// Runs each scheduled backup as a tracked task and waits for it.
#[derive(Clone)]
pub struct TrackedBackupCallback {
    tracker: TaskTracker,
    commands: Arc<BackupCommands>,
}

impl TrackedBackupCallback {
    pub fn new(tracker: TaskTracker, commands: Arc<BackupCommands>) -> Self {
        Self { tracker, commands }
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Start a manual backup outside the scheduler. Not gated.
    pub fn dispatch_backup(&self, backup_type: BackupType) -> TaskId {
        self.tracker
            .dispatch(self.commands.backup_request(backup_type))
    }

    /// Start a restore in the background. Not gated.
    pub fn dispatch_restore(
        &self,
        timestamp: &str,
        components: &[BackupType],
    ) -> Result<TaskId, BackupError> {
        let request = self.commands.restore_request(timestamp, components)?;
        Ok(self.tracker.dispatch(request))
    }
}

#[async_trait]
impl BackupCallback for TrackedBackupCallback {
    async fn invoke(&self, backup_type: BackupType, job_id: &str) -> Result<(), BackupError> {
        let request = self.commands.scheduled_request(backup_type, job_id);
        let task = self
            .tracker
            .run(request)
            .await
            .map_err(|e| BackupError::Tracking(e.to_string()))?;

        debug!(
            job_id = %job_id,
            task_id = %task.task_id,
            backup_type = %backup_type,
            status = ?task.status,
            "Scheduled backup task finished"
        );

        match task.status {
            TaskStatus::Completed => Ok(()),
            _ => Err(BackupError::CommandFailed {
                backup_type,
                task_id: task.task_id,
                message: task.error.unwrap_or_else(|| "unknown error".to_string()),
            }),
        }
    }
}

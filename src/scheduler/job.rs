//! Job data structures.
//!
//! A job is a persisted recurring backup definition: which backup types to
//! run, when to fire, and the statistics gathered from previous firings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Result, SchedulerError};
use super::trigger;
use crate::backup::BackupType;

/// Maximum job name length in characters.
pub const MAX_NAME_LEN: usize = 100;
/// Maximum job description length in characters.
pub const MAX_DESCRIPTION_LEN: usize = 500;
/// Upper bound for `max_retries`.
pub const MAX_RETRIES_LIMIT: u8 = 10;

// ============================================================================
// Job - Main Type
// ============================================================================

/// Unique identifier for a job.
pub type JobId = String;

/// A recurring backup job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, immutable after creation.
    pub id: JobId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Backup types to run, in order.
    pub backup_types: Vec<BackupType>,
    /// When to fire.
    pub recurrence: Recurrence,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(flatten)]
    pub stats: JobStats,
    #[serde(flatten)]
    pub options: JobOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Generate a new job ID.
    pub fn generate_id() -> JobId {
        format!("job_{}", ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Build a job from a creation request without validating it.
    pub fn from_new(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::generate_id(),
            name: new.name,
            description: new.description,
            backup_types: new.backup_types,
            recurrence: new.recurrence,
            status: new.status,
            stats: JobStats::default(),
            options: new.options,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Active
    }

    /// Check field constraints and recurrence parameters.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(SchedulerError::InvalidJob("name must not be empty".into()));
        }
        if self.name.chars().count() > MAX_NAME_LEN {
            return Err(SchedulerError::InvalidJob(format!(
                "name exceeds {MAX_NAME_LEN} characters"
            )));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(SchedulerError::InvalidJob(format!(
                "description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if self.backup_types.is_empty() {
            return Err(SchedulerError::InvalidJob(
                "at least one backup type is required".into(),
            ));
        }
        if self.options.max_retries > MAX_RETRIES_LIMIT {
            return Err(SchedulerError::InvalidJob(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}"
            )));
        }
        trigger::validate(&self.recurrence)
    }

    /// Apply a partial update. Fields left as `None` are unchanged.
    pub fn apply(&mut self, update: JobUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(backup_types) = update.backup_types {
            self.backup_types = backup_types;
        }
        if let Some(recurrence) = update.recurrence {
            self.recurrence = recurrence;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(sequential) = update.sequential_execution {
            self.options.sequential_execution = sequential;
        }
        if let Some(retry) = update.retry_on_failure {
            self.options.retry_on_failure = retry;
        }
        if let Some(max_retries) = update.max_retries {
            self.options.max_retries = max_retries;
        }
    }
}

// ============================================================================
// Recurrence
// ============================================================================

/// When a job fires. Each kind carries only its own parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    /// Standard 5-field cron expression (minute hour day month weekday).
    Cron { expression: String },
    /// Every N minutes from the reference time.
    Interval { minutes: u32 },
    /// Every day at a wall-clock time.
    Daily { time: TimeOfDay },
    /// On the listed weekdays (0 = Monday .. 6 = Sunday).
    Weekly { time: TimeOfDay, days_of_week: Vec<u8> },
    /// On the listed days of the month (1..=31).
    Monthly {
        time: TimeOfDay,
        days_of_month: Vec<u8>,
    },
    /// A single instant.
    Once { run_at: DateTime<Utc> },
}

impl Recurrence {
    pub fn kind(&self) -> &'static str {
        match self {
            Recurrence::Cron { .. } => "cron",
            Recurrence::Interval { .. } => "interval",
            Recurrence::Daily { .. } => "daily",
            Recurrence::Weekly { .. } => "weekly",
            Recurrence::Monthly { .. } => "monthly",
            Recurrence::Once { .. } => "once",
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Cron { expression } => write!(f, "cron '{expression}'"),
            Recurrence::Interval { minutes } => write!(f, "every {minutes} minutes"),
            Recurrence::Daily { time } => write!(f, "daily at {time}"),
            Recurrence::Weekly { time, days_of_week } => {
                write!(f, "weekly at {time} on days {days_of_week:?}")
            }
            Recurrence::Monthly {
                time,
                days_of_month,
            } => write!(f, "monthly at {time} on days {days_of_month:?}"),
            Recurrence::Once { run_at } => write!(f, "once at {}", run_at.to_rfc3339()),
        }
    }
}

/// Wall-clock time of day, serialized as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    /// Create from hour and minute. Returns `None` when out of range.
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|_| {
                SchedulerError::InvalidRecurrence(format!("time must be HH:MM, got '{s}'"))
            })
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = SchedulerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

// ============================================================================
// Status, Statistics & Options
// ============================================================================

/// Job lifecycle status. Only active jobs have a live timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Active,
    Paused,
    Disabled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Disabled => "disabled",
        })
    }
}

/// Outcome of a firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failed,
}

/// Statistics updated by the coordinator after each firing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub last_status: Option<RunOutcome>,
}

/// Execution behaviour flags.
///
/// `retry_on_failure` and `max_retries` are stored with the job but the
/// coordinator does not act on them yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default = "default_true")]
    pub sequential_execution: bool,
    #[serde(default = "default_true")]
    pub retry_on_failure: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            sequential_execution: true,
            retry_on_failure: true,
            max_retries: default_max_retries(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u8 {
    3
}

// ============================================================================
// Requests
// ============================================================================

/// Parameters for creating a job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewJob {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub backup_types: Vec<BackupType>,
    pub recurrence: Recurrence,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(flatten)]
    pub options: JobOptions,
}

impl NewJob {
    /// An active job with default options.
    pub fn new(
        name: impl Into<String>,
        backup_types: Vec<BackupType>,
        recurrence: Recurrence,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            backup_types,
            recurrence,
            status: JobStatus::Active,
            options: JobOptions::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Partial update of a job. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub backup_types: Option<Vec<BackupType>>,
    pub recurrence: Option<Recurrence>,
    pub status: Option<JobStatus>,
    pub sequential_execution: Option<bool>,
    pub retry_on_failure: Option<bool>,
    pub max_retries: Option<u8>,
}

impl JobUpdate {
    /// An update that only changes the status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn daily_job() -> Job {
        let new = NewJob::new(
            "nightly",
            vec![BackupType::Global],
            Recurrence::Daily {
                time: "02:00".parse().unwrap(),
            },
        );
        Job::from_new(new, Utc::now())
    }

    #[test]
    fn time_of_day_parses_and_displays() {
        let t: TimeOfDay = "7:05".parse().unwrap();
        assert_eq!(t.to_string(), "07:05");
        assert_eq!(TimeOfDay::new(23, 59).unwrap().to_string(), "23:59");
    }

    #[test]
    fn time_of_day_rejects_out_of_range() {
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert!(TimeOfDay::new(25, 0).is_none());
    }

    #[test]
    fn recurrence_serializes_with_kind_tag() {
        let recurrence = Recurrence::Weekly {
            time: "06:00".parse().unwrap(),
            days_of_week: vec![0, 4],
        };
        let json = serde_json::to_value(&recurrence).unwrap();
        assert_eq!(json["kind"], "weekly");
        assert_eq!(json["time"], "06:00");
        assert_eq!(json["days_of_week"], serde_json::json!([0, 4]));
    }

    #[test]
    fn recurrence_missing_parameter_fails_to_parse() {
        let result: std::result::Result<Recurrence, _> =
            serde_json::from_value(serde_json::json!({"kind": "weekly", "time": "06:00"}));
        assert!(result.is_err());
    }

    #[test]
    fn job_defaults_fill_missing_fields() {
        let json = serde_json::json!({
            "id": "job_1",
            "name": "legacy",
            "backup_types": ["mongodb"],
            "recurrence": {"kind": "interval", "minutes": 60},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        });
        let job: Job = serde_json::from_value(json).unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.stats.run_count, 0);
        assert!(job.options.sequential_execution);
        assert!(job.options.retry_on_failure);
        assert_eq!(job.options.max_retries, 3);
    }

    #[test]
    fn validate_rejects_empty_name() {
        let mut job = daily_job();
        job.name = "   ".into();
        assert!(matches!(job.validate(), Err(SchedulerError::InvalidJob(_))));
    }

    #[test]
    fn validate_rejects_long_name() {
        let mut job = daily_job();
        job.name = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(job.validate(), Err(SchedulerError::InvalidJob(_))));
    }

    #[test]
    fn validate_rejects_empty_backup_types() {
        let mut job = daily_job();
        job.backup_types.clear();
        assert!(matches!(job.validate(), Err(SchedulerError::InvalidJob(_))));
    }

    #[test]
    fn validate_rejects_too_many_retries() {
        let mut job = daily_job();
        job.options.max_retries = MAX_RETRIES_LIMIT + 1;
        assert!(matches!(job.validate(), Err(SchedulerError::InvalidJob(_))));
    }

    #[test]
    fn apply_changes_only_given_fields() {
        let mut job = daily_job();
        job.apply(JobUpdate {
            name: Some("renamed".into()),
            max_retries: Some(5),
            ..JobUpdate::default()
        });
        assert_eq!(job.name, "renamed");
        assert_eq!(job.options.max_retries, 5);
        assert_eq!(job.backup_types, vec![BackupType::Global]);
        assert_eq!(job.status, JobStatus::Active);
    }
}

//! Scheduling and execution coordination for backup jobs.
//!
//! Jobs describe which backup types to run and when. The service keeps one
//! timer per active job, fires jobs through a [`BackupCallback`], and records
//! the outcome in the job statistics and the execution history.
//!
//! # Usage
//!
//! ```ignore
//! let config = SchedulerConfig::new(Arc::new(FileJobStore::new(path)), callback);
//! let handle = SchedulerService::new(config).start().await;
//!
//! let job = handle
//!     .create_job(NewJob::new(
//!         "nightly",
//!         vec![BackupType::Global],
//!         Recurrence::Daily { time: "02:00".parse()? },
//!     ))
//!     .await?;
//!
//! handle.run_now(&job.id).await?;
//! let recent = handle.history(None, DEFAULT_HISTORY_LIMIT).await;
//! ```
//!
//! [`BackupCallback`]: crate::backup::BackupCallback

pub mod error;
pub mod history;
pub mod job;
pub mod presets;
pub mod registry;
pub mod service;
pub mod trigger;

pub use error::{Result, SchedulerError};
pub use history::{DEFAULT_HISTORY_CAPACITY, ExecutionHistory, HistoryEntry};
pub use job::{
    Job, JobId, JobOptions, JobStats, JobStatus, JobUpdate, NewJob, Recurrence, RunOutcome,
    TimeOfDay,
};
pub use registry::JobRegistry;
pub use service::{
    DEFAULT_HISTORY_LIMIT, FireOutcome, SchedulerConfig, SchedulerHandle, SchedulerService,
    SchedulerStats, UpcomingRun,
};

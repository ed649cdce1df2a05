//! File-based job storage.
//!
//! Stores the whole job set as one JSON document:
//!
//! ```json
//! { "jobs": [ { "id": "job_…", … } ], "updated_at": "2024-01-01T00:00:00Z" }
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use super::atomic_write_file;
use crate::scheduler::Job;
use crate::store::{JobStore, StorageError, StorageResult};

/// Default file name inside the data directory.
pub const DEFAULT_JOBS_FILE: &str = "schedules.json";

#[derive(Serialize)]
struct JobDocumentRef<'a> {
    jobs: &'a [Job],
    updated_at: DateTime<Utc>,
}

/// Entries are kept as raw values so one bad job doesn't sink the rest.
#[derive(Deserialize)]
struct JobDocument {
    #[serde(default)]
    jobs: Vec<serde_json::Value>,
}

/// File-based implementation of `JobStore`.
///
/// Uses atomic writes (temp file + rename) to prevent corruption.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    path: PathBuf,
}

impl FileJobStore {
    /// Create a store backed by the JSON file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store using the default file name inside `data_dir`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(DEFAULT_JOBS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn load_all(&self) -> StorageResult<Vec<Job>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&self.path, e)),
        };

        let document: JobDocument = serde_json::from_str(&content)
            .map_err(|e| StorageError::file_deserialization(&self.path, e.to_string()))?;

        let mut jobs = Vec::with_capacity(document.jobs.len());
        for value in document.jobs {
            let id = value
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or("<unknown>")
                .to_string();
            match serde_json::from_value::<Job>(value) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        job_id = %id,
                        error = %e,
                        "Skipping unparseable job"
                    );
                }
            }
        }

        Ok(jobs)
    }

    async fn save_all(&self, jobs: &[Job]) -> StorageResult<()> {
        let document = JobDocumentRef {
            jobs,
            updated_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&document)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        atomic_write_file(&self.path, &content).await
    }
}

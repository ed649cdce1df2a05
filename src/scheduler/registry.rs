//! In-memory job registry with write-through persistence.
//!
//! Wraps a [`JobStore`] implementation. The in-memory map is the source of
//! truth while the process runs; every mutation rewrites the whole job set
//! to the store before returning. A failed write is logged and the
//! in-memory state stays authoritative until the next successful write.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::error::{Result, SchedulerError};
use super::job::{Job, JobId, JobStatus, JobUpdate, NewJob, RunOutcome};
use super::trigger;
use crate::store::JobStore;

/// Registry of job definitions.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
    /// Underlying persistence store.
    persistence: Arc<dyn JobStore>,
    /// Serializes writes so the file always reflects the latest snapshot.
    persist_lock: Arc<Mutex<()>>,
}

impl JobRegistry {
    /// Create an empty registry backed by `persistence`.
    pub fn new(persistence: Arc<dyn JobStore>) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            persistence,
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load every job from storage, replacing the in-memory set.
    ///
    /// Call this on startup. Returns the number of jobs loaded.
    pub async fn load(&self) -> Result<usize> {
        let loaded = self.persistence.load_all().await?;
        let count = loaded.len();

        let mut jobs = self.jobs.write().await;
        jobs.clear();
        for job in loaded {
            jobs.insert(job.id.clone(), job);
        }

        if count > 0 {
            info!(count, "Loaded jobs");
        }
        Ok(count)
    }

    /// Validate and store a new job, computing its first fire time.
    pub async fn create(&self, new: NewJob) -> Result<Job> {
        let now = Utc::now();
        let mut job = Job::from_new(new, now);
        job.validate()?;
        job.stats.next_run = trigger::next_fire(&job.recurrence, now)?;

        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(job.id.clone(), job.clone());
        }
        self.persist().await;

        debug!(job_id = %job.id, recurrence = %job.recurrence, "Created job");
        Ok(job)
    }

    /// Apply a partial update and recompute the next fire time.
    pub async fn update(&self, id: &str, update: JobUpdate) -> Result<Job> {
        let now = Utc::now();
        let job = {
            let mut jobs = self.jobs.write().await;
            let current = jobs
                .get(id)
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

            let mut updated = current.clone();
            updated.apply(update);
            updated.validate()?;
            updated.stats.next_run = trigger::next_fire(&updated.recurrence, now)?;
            updated.updated_at = now;

            jobs.insert(updated.id.clone(), updated.clone());
            updated
        };
        self.persist().await;

        debug!(job_id = %job.id, status = %job.status, "Updated job");
        Ok(job)
    }

    /// Change only the status of a job.
    pub async fn set_status(&self, id: &str, status: JobStatus) -> Result<Job> {
        self.update(id, JobUpdate::status(status)).await
    }

    /// Remove a job. Returns `false` when it did not exist.
    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.jobs.write().await.remove(id).is_some();
        if removed {
            self.persist().await;
            debug!(job_id = %id, "Deleted job");
        }
        removed
    }

    /// Get a job by ID.
    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// All jobs, oldest first.
    pub async fn list_all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// All active jobs, oldest first.
    pub async fn list_active(&self) -> Vec<Job> {
        let mut jobs = self.list_all().await;
        jobs.retain(Job::is_active);
        jobs
    }

    /// Store a freshly computed fire time.
    pub async fn set_next_run(&self, id: &str, next_run: Option<DateTime<Utc>>) {
        let changed = {
            let mut jobs = self.jobs.write().await;
            match jobs.get_mut(id) {
                Some(job) if job.stats.next_run != next_run => {
                    job.stats.next_run = next_run;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.persist().await;
        }
    }

    /// Record the outcome of a firing that ended at `finished_at`.
    ///
    /// Success bumps `run_count` and `last_run`. Either outcome sets
    /// `last_status` and recomputes `next_run` from the later of
    /// `finished_at` and `scheduled_for`, the instant a timer firing was armed
    /// for. A wall clock lagging the timer therefore cannot yield the same
    /// instant again. Returns `None` if the job was deleted while running.
    pub async fn record_outcome(
        &self,
        id: &str,
        outcome: RunOutcome,
        finished_at: DateTime<Utc>,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Option<Job> {
        let job = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(id)?;

            job.stats.last_status = Some(outcome);
            if outcome == RunOutcome::Success {
                job.stats.run_count += 1;
                job.stats.last_run = Some(finished_at);
            }
            let reference = scheduled_for.map_or(finished_at, |at| at.max(finished_at));
            job.stats.next_run = match trigger::next_fire(&job.recurrence, reference) {
                Ok(next) => next,
                Err(e) => {
                    error!(job_id = %id, error = %e, "Failed to compute next run");
                    None
                }
            };
            job.clone()
        };
        self.persist().await;
        Some(job)
    }

    /// Rewrite the full job set to storage, logging failures.
    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.list_all().await;
        if let Err(e) = self.persistence.save_all(&snapshot).await {
            error!(error = %e, "Failed to persist jobs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupType;
    use crate::scheduler::job::Recurrence;
    use crate::store::{StorageError, StorageResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store that counts writes and can be told to fail.
    #[derive(Default)]
    struct MemoryStore {
        saved: std::sync::Mutex<Vec<Job>>,
        saves: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl JobStore for MemoryStore {
        async fn load_all(&self) -> StorageResult<Vec<Job>> {
            Ok(self.saved.lock().unwrap().clone())
        }

        async fn save_all(&self, jobs: &[Job]) -> StorageResult<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StorageError::serialization("disk full"));
            }
            *self.saved.lock().unwrap() = jobs.to_vec();
            Ok(())
        }
    }

    fn interval_job(name: &str) -> NewJob {
        NewJob::new(
            name,
            vec![BackupType::Postgres],
            Recurrence::Interval { minutes: 30 },
        )
    }

    #[tokio::test]
    async fn create_persists_and_sets_next_run() {
        let store = Arc::new(MemoryStore::default());
        let registry = JobRegistry::new(store.clone());

        let before = Utc::now();
        let job = registry.create(interval_job("db")).await.unwrap();

        let next = job.stats.next_run.unwrap();
        assert!(next > before);
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert_eq!(registry.get(&job.id).await, Some(job));
    }

    #[tokio::test]
    async fn create_rejects_invalid_recurrence_without_storing() {
        let store = Arc::new(MemoryStore::default());
        let registry = JobRegistry::new(store.clone());

        let result = registry
            .create(NewJob::new(
                "bad",
                vec![BackupType::Global],
                Recurrence::Interval { minutes: 1 },
            ))
            .await;

        assert!(matches!(result, Err(SchedulerError::InvalidRecurrence(_))));
        assert!(registry.list_all().await.is_empty());
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn update_missing_job_is_not_found() {
        let registry = JobRegistry::new(Arc::new(MemoryStore::default()));
        let result = registry.update("nope", JobUpdate::default()).await;
        assert!(matches!(result, Err(SchedulerError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_recomputes_next_run() {
        let registry = JobRegistry::new(Arc::new(MemoryStore::default()));
        let job = registry.create(interval_job("db")).await.unwrap();

        let once = Utc::now() + chrono::Duration::days(3);
        let updated = registry
            .update(
                &job.id,
                JobUpdate {
                    recurrence: Some(Recurrence::Once { run_at: once }),
                    ..JobUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.stats.next_run, Some(once));
        assert_eq!(updated.created_at, job.created_at);
        assert!(updated.updated_at >= job.updated_at);
    }

    #[tokio::test]
    async fn invalid_update_leaves_job_unchanged() {
        let registry = JobRegistry::new(Arc::new(MemoryStore::default()));
        let job = registry.create(interval_job("db")).await.unwrap();

        let result = registry
            .update(
                &job.id,
                JobUpdate {
                    backup_types: Some(vec![]),
                    ..JobUpdate::default()
                },
            )
            .await;

        assert!(matches!(result, Err(SchedulerError::InvalidJob(_))));
        assert_eq!(registry.get(&job.id).await, Some(job));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = Arc::new(MemoryStore::default());
        let registry = JobRegistry::new(store.clone());
        let job = registry.create(interval_job("db")).await.unwrap();

        assert!(registry.delete(&job.id).await);
        assert!(!registry.delete(&job.id).await);
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn persist_failure_keeps_memory_state() {
        let store = Arc::new(MemoryStore {
            fail: true,
            ..MemoryStore::default()
        });
        let registry = JobRegistry::new(store.clone());

        let job = registry.create(interval_job("db")).await.unwrap();

        assert_eq!(registry.get(&job.id).await, Some(job));
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_outcome_updates_stats() {
        let registry = JobRegistry::new(Arc::new(MemoryStore::default()));
        let job = registry.create(interval_job("db")).await.unwrap();
        let finished = Utc::now();

        let ok = registry
            .record_outcome(&job.id, RunOutcome::Success, finished, None)
            .await
            .unwrap();
        assert_eq!(ok.stats.run_count, 1);
        assert_eq!(ok.stats.last_run, Some(finished));
        assert_eq!(ok.stats.last_status, Some(RunOutcome::Success));
        assert_eq!(
            ok.stats.next_run,
            Some(finished + chrono::Duration::minutes(30))
        );

        let failed = registry
            .record_outcome(&job.id, RunOutcome::Failed, finished, None)
            .await
            .unwrap();
        assert_eq!(failed.stats.run_count, 1);
        assert_eq!(failed.stats.last_status, Some(RunOutcome::Failed));
    }

    #[tokio::test]
    async fn record_outcome_never_repeats_the_scheduled_instant() {
        let registry = JobRegistry::new(Arc::new(MemoryStore::default()));
        let job = registry
            .create(NewJob::new(
                "nightly",
                vec![BackupType::Global],
                Recurrence::Daily {
                    time: "02:00".parse().unwrap(),
                },
            ))
            .await
            .unwrap();

        // The firing finished a few seconds before the wall clock reached
        // the instant it was armed for.
        let scheduled = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        let finished = scheduled - chrono::Duration::seconds(3);

        let recorded = registry
            .record_outcome(&job.id, RunOutcome::Success, finished, Some(scheduled))
            .await
            .unwrap();
        assert_eq!(
            recorded.stats.next_run,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 2, 0, 0).unwrap())
        );
        assert_eq!(recorded.stats.last_run, Some(finished));

        let manual = registry
            .record_outcome(&job.id, RunOutcome::Success, finished, None)
            .await
            .unwrap();
        assert_eq!(manual.stats.next_run, Some(scheduled));
    }

    #[tokio::test]
    async fn load_restores_saved_jobs() {
        let store = Arc::new(MemoryStore::default());
        let first = JobRegistry::new(store.clone());
        let a = first.create(interval_job("a")).await.unwrap();
        let b = first.create(interval_job("b")).await.unwrap();

        let second = JobRegistry::new(store);
        assert_eq!(second.load().await.unwrap(), 2);
        assert_eq!(second.get(&a.id).await, Some(a));
        assert_eq!(second.get(&b.id).await, Some(b));
    }
}

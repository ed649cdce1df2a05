//! Bounded execution history, newest first.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use super::job::{Job, JobId, RunOutcome};
use crate::backup::BackupType;

/// Default number of entries kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// One completed firing. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Short generated identifier (8 characters).
    pub id: String,
    pub job_id: JobId,
    /// Job name at the time of the firing.
    pub job_name: String,
    /// Backup types at the time of the firing.
    pub backup_types: Vec<BackupType>,
    pub outcome: RunOutcome,
    pub duration_seconds: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Snapshot `job` into a new entry stamped with the current time.
    pub fn new(
        job: &Job,
        outcome: RunOutcome,
        duration_seconds: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_entry_id(),
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            backup_types: job.backup_types.clone(),
            outcome,
            duration_seconds,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

fn generate_entry_id() -> String {
    // The trailing characters of a ULID are its random component.
    let ulid = ulid::Ulid::new().to_string().to_lowercase();
    ulid[ulid.len() - 8..].to_string()
}

/// Append-at-head log capped at a fixed number of entries.
///
/// Insertion order is authoritative for recency; timestamps are informative.
#[derive(Clone)]
pub struct ExecutionHistory {
    entries: Arc<RwLock<VecDeque<HistoryEntry>>>,
    capacity: usize,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Record an entry, dropping the oldest when over capacity.
    pub async fn record(&self, entry: HistoryEntry) {
        let mut entries = self.entries.write().await;
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    /// Up to `limit` most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read().await;
        entries.iter().take(limit).cloned().collect()
    }

    /// Up to `limit` most recent entries for one job, newest first.
    pub async fn for_job(&self, job_id: &str, limit: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.job_id == job_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{NewJob, Recurrence};

    fn job(name: &str) -> Job {
        Job::from_new(
            NewJob::new(
                name,
                vec![BackupType::Mongodb],
                Recurrence::Interval { minutes: 60 },
            ),
            Utc::now(),
        )
    }

    fn entry(job: &Job, message: &str) -> HistoryEntry {
        HistoryEntry::new(job, RunOutcome::Success, 1.5, message)
    }

    #[tokio::test]
    async fn record_inserts_newest_first() {
        let history = ExecutionHistory::default();
        let job = job("a");

        history.record(entry(&job, "first")).await;
        history.record(entry(&job, "second")).await;

        let recent = history.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[1].message, "first");
    }

    #[tokio::test]
    async fn capacity_drops_oldest() {
        let history = ExecutionHistory::new(3);
        let job = job("a");

        for i in 0..5 {
            history.record(entry(&job, &format!("run {i}"))).await;
        }

        assert_eq!(history.len().await, 3);
        let messages: Vec<_> = history
            .recent(10)
            .await
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["run 4", "run 3", "run 2"]);
    }

    #[tokio::test]
    async fn default_capacity_is_one_hundred() {
        let history = ExecutionHistory::default();
        let job = job("a");

        for i in 0..(DEFAULT_HISTORY_CAPACITY + 1) {
            history.record(entry(&job, &format!("run {i}"))).await;
        }

        assert_eq!(history.len().await, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(history.recent(1).await[0].message, "run 100");
    }

    #[tokio::test]
    async fn for_job_filters_and_limits() {
        let history = ExecutionHistory::default();
        let a = job("a");
        let b = job("b");

        history.record(entry(&a, "a1")).await;
        history.record(entry(&b, "b1")).await;
        history.record(entry(&a, "a2")).await;
        history.record(entry(&a, "a3")).await;

        let for_a = history.for_job(&a.id, 2).await;
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].message, "a3");
        assert_eq!(for_a[1].message, "a2");

        let for_b = history.for_job(&b.id, 10).await;
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].job_name, "b");
    }

    #[test]
    fn entry_ids_are_eight_characters() {
        let job = job("a");
        let e = entry(&job, "x");
        assert_eq!(e.id.len(), 8);
        assert_eq!(e.backup_types, vec![BackupType::Mongodb]);
    }
}

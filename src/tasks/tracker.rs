//! Concurrent registry of tracked tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{info, warn};

use super::runner::{self, ProcessExit};
use super::{Task, TaskError, TaskId, TaskRequest, TaskStatus};

/// Registry of every task started during this process's lifetime.
///
/// Cheap to clone; clones share the same records. Records are never
/// evicted.
#[derive(Clone, Default)]
pub struct TaskTracker {
    tasks: Arc<DashMap<TaskId, Task>>,
    /// Kill processes that run longer than this.
    timeout: Option<Duration>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-process timeout. `None` lets processes run indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Start a task in the background and return its id immediately.
    pub fn dispatch(&self, request: TaskRequest) -> TaskId {
        let task_id = self.register(&request);
        let tracker = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            tracker.execute(&id, request).await;
        });
        task_id
    }

    /// Start a task and wait for it to finish.
    pub async fn run(&self, request: TaskRequest) -> Result<Task, TaskError> {
        let task_id = self.register(&request);
        self.execute(&task_id, request).await;
        self.get(&task_id).ok_or(TaskError::NotFound(task_id))
    }

    /// Snapshot of one task.
    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.value().clone())
    }

    /// Snapshot of all tasks, in no particular order.
    pub fn list_all(&self) -> Vec<Task> {
        self.tasks.iter().map(|t| t.value().clone()).collect()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Insert a pending record under a fresh, unique id.
    fn register(&self, request: &TaskRequest) -> TaskId {
        let now = Utc::now();
        loop {
            let task_id = generate_task_id(&request.id_prefix, now);
            if let Entry::Vacant(slot) = self.tasks.entry(task_id.clone()) {
                slot.insert(Task {
                    task_id: task_id.clone(),
                    kind: request.kind,
                    status: TaskStatus::Pending,
                    started_at: now,
                    completed_at: None,
                    output: request.initial_output.clone(),
                    error: None,
                    scheduled: request.scheduled,
                    job_id: request.job_id.clone(),
                });
                return task_id;
            }
        }
    }

    async fn execute(&self, task_id: &str, request: TaskRequest) {
        self.update(task_id, |task| task.status = TaskStatus::Running);
        info!(task_id = %task_id, kind = %request.kind, "Task started");

        let result = runner::run_command(&request.command, &request.env, self.timeout, |line| {
            self.update(task_id, |task| task.output.push(line));
        })
        .await;

        let error = match result {
            Ok(ProcessExit::Exited(0)) => None,
            Ok(ProcessExit::Exited(code)) => Some(format!("exit code: {code}")),
            Ok(ProcessExit::Signaled) => Some("terminated by signal".to_string()),
            Ok(ProcessExit::TimedOut(limit)) => {
                Some(format!("timed out after {} seconds", limit.as_secs()))
            }
            Err(e) => Some(format!("failed to run command: {e}")),
        };

        match &error {
            None => info!(task_id = %task_id, "Task completed"),
            Some(e) => warn!(task_id = %task_id, error = %e, "Task failed"),
        }

        self.update(task_id, |task| {
            task.status = if error.is_some() {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
            task.error = error;
            task.completed_at = Some(Utc::now());
        });
    }

    /// Mutate a record in place. The map guard is released before returning.
    fn update(&self, task_id: &str, f: impl FnOnce(&mut Task)) {
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            f(task.value_mut());
        }
    }
}

/// `<prefix>_<YYYYmmdd_HHMMSS>_<suffix>`; the suffix keeps same-second ids apart.
fn generate_task_id(prefix: &str, now: DateTime<Utc>) -> TaskId {
    let ulid = ulid::Ulid::new().to_string().to_lowercase();
    format!(
        "{}_{}_{}",
        prefix,
        now.format("%Y%m%d_%H%M%S"),
        &ulid[ulid.len() - 6..]
    )
}

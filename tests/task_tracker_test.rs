//! Integration tests for tracked backup and restore processes.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use backupd::backup::{BackupCommands, BackupType, TrackedBackupCallback};
use backupd::scheduler::{FireOutcome, NewJob, Recurrence, SchedulerConfig, SchedulerService};
use backupd::store::file::FileJobStore;
use backupd::tasks::{TaskRequest, TaskStatus, TaskTracker};

async fn wait_finished(tracker: &TaskTracker, task_id: &str) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if tracker.get(task_id).is_some_and(|t| t.is_finished()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn concurrent_tasks_keep_their_own_output() {
    let tracker = TaskTracker::new();

    let a = tracker.dispatch(TaskRequest::backup(
        BackupType::Mongodb,
        "echo first; sleep 0.2; echo first-done",
    ));
    let b = tracker.dispatch(TaskRequest::backup(
        BackupType::Mongodb,
        "echo second; sleep 0.1; echo second-done",
    ));
    assert_ne!(a, b);

    // Dispatch returns before the process finishes.
    assert!(tracker.get(&a).is_some());

    assert!(wait_finished(&tracker, &a).await);
    assert!(wait_finished(&tracker, &b).await);

    let a = tracker.get(&a).unwrap();
    let b = tracker.get(&b).unwrap();
    assert_eq!(a.status, TaskStatus::Completed);
    assert_eq!(b.status, TaskStatus::Completed);
    assert_eq!(a.output, vec!["first", "first-done"]);
    assert_eq!(b.output, vec!["second", "second-done"]);
    assert_eq!(tracker.list_all().len(), 2);
}

#[tokio::test]
async fn restore_runs_with_timestamp_and_components() {
    let tracker = TaskTracker::new();
    let commands = BackupCommands::new("/unused")
        .with_restore_command("echo restoring {timestamp}; echo \"$RESTORE_COMPONENTS\"");

    let request = commands
        .restore_request("20240101_020000", &[BackupType::Mongodb, BackupType::Postgres])
        .unwrap();
    let task = tracker.run(request).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.task_id.starts_with("restore_20240101_020000_"));
    assert_eq!(
        task.output[1..],
        ["restoring 20240101_020000", "mongodb postgres"]
    );
}

#[tokio::test]
async fn scheduled_job_runs_scripts_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let scripts = tmp.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    std::fs::write(
        scripts.join("backup_mongodb_docker.sh"),
        "echo \"mongo dump to $BACKUP_ROOT\"\n",
    )
    .unwrap();
    std::fs::write(scripts.join("backup_postgres_docker.sh"), "echo pg failed\nexit 3\n").unwrap();

    let tracker = TaskTracker::new();
    let commands = Arc::new(BackupCommands::new(&scripts).with_env("BACKUP_ROOT", "/backups"));
    let callback = Arc::new(TrackedBackupCallback::new(tracker.clone(), commands));
    let store = Arc::new(FileJobStore::in_dir(tmp.path().join("data")));
    let handle = SchedulerService::new(SchedulerConfig::new(store, callback))
        .start()
        .await;

    let ok = handle
        .create_job(NewJob::new(
            "mongo",
            vec![BackupType::Mongodb],
            Recurrence::Interval { minutes: 30 },
        ))
        .await
        .unwrap();
    assert_eq!(handle.fire(&ok.id).await.unwrap(), FireOutcome::Completed);

    let failing = handle
        .create_job(NewJob::new(
            "pg",
            vec![BackupType::Postgres],
            Recurrence::Interval { minutes: 30 },
        ))
        .await
        .unwrap();
    let outcome = handle.fire(&failing.id).await.unwrap();
    assert!(matches!(outcome, FireOutcome::Failed(ref m) if m.contains("exit code: 3")));

    let tasks = tracker.list_all();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.scheduled));

    let mongo = tasks
        .iter()
        .find(|t| t.job_id.as_deref() == Some(ok.id.as_str()))
        .unwrap();
    assert_eq!(mongo.status, TaskStatus::Completed);
    assert!(mongo.task_id.starts_with("scheduled_mongodb_"));
    assert_eq!(mongo.output.last().map(String::as_str), Some("mongo dump to /backups"));

    let pg = tasks
        .iter()
        .find(|t| t.job_id.as_deref() == Some(failing.id.as_str()))
        .unwrap();
    assert_eq!(pg.status, TaskStatus::Failed);
    assert_eq!(pg.error.as_deref(), Some("exit code: 3"));

    handle.shutdown().await;
}

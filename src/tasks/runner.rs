//! External process execution with streamed output.
//!
//! Commands run through `bash -c`. Stdout and stderr are read by two
//! producer tasks that feed one channel; the consumer sees lines in arrival
//! order and the channel closes once both pipes are closed.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

/// Lines buffered between the pipe readers and the consumer.
const LINE_BUFFER: usize = 256;

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Exited normally with this code.
    Exited(i32),
    /// Killed by a signal it did not handle.
    Signaled,
    /// Ran past the configured timeout and was killed.
    TimedOut(Duration),
}

/// Run `command`, handing each non-empty output line to `on_line`.
///
/// Returns an error only when the process cannot be spawned or waited on.
pub(crate) async fn run_command<F>(
    command: &str,
    env: &HashMap<String, String>,
    timeout: Option<Duration>,
    mut on_line: F,
) -> std::io::Result<ProcessExit>
where
    F: FnMut(String),
{
    let mut child = spawn_shell(command, env)?;

    let (tx, mut rx) = mpsc::channel(LINE_BUFFER);
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, tx.clone());
    }
    drop(tx);

    let collect = async {
        while let Some(line) = rx.recv().await {
            on_line(line);
        }
        child.wait().await
    };

    let status = match timeout {
        Some(limit) => {
            let waited = tokio::time::timeout(limit, collect).await;
            match waited {
                Ok(status) => status?,
                Err(_) => {
                    graceful_kill(&mut child).await;
                    return Ok(ProcessExit::TimedOut(limit));
                }
            }
        }
        None => collect.await?,
    };

    Ok(match status.code() {
        Some(code) => ProcessExit::Exited(code),
        None => ProcessExit::Signaled,
    })
}

fn spawn_shell(command: &str, env: &HashMap<String, String>) -> std::io::Result<Child> {
    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(command)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // SAFETY: the closure runs in the forked child before exec and only calls
    // prctl, which is async-signal-safe and touches no shared state. The child
    // gets SIGTERM when this process dies.
    #[cfg(target_os = "linux")]
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Forward non-empty lines from `reader` until EOF or the receiver goes away.
///
/// Invalid UTF-8 is replaced rather than ending the stream, so the pipe
/// keeps draining and the child never blocks on a full buffer.
fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Output stream read failed");
                    break;
                }
            }
        }
    });
}

/// SIGTERM, wait for the grace period, SIGKILL.
async fn graceful_kill(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: the pid comes from a live Child handle.
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }

        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
        debug!(pid, "Process didn't exit after SIGTERM, sending SIGKILL");
    }

    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(command: &str) -> (ProcessExit, Vec<String>) {
        let mut lines = Vec::new();
        let exit = run_command(command, &HashMap::new(), None, |line| lines.push(line))
            .await
            .unwrap();
        (exit, lines)
    }

    #[tokio::test]
    async fn captures_stdout_lines_and_skips_blank_ones() {
        let (exit, lines) = run("echo one; echo; echo two").await;
        assert_eq!(exit, ProcessExit::Exited(0));
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn merges_stderr() {
        let (_, lines) = run("echo out; echo err >&2").await;
        assert_eq!(lines.len(), 2);
        assert!(lines.contains(&"out".to_string()));
        assert!(lines.contains(&"err".to_string()));
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let (exit, lines) = run("echo partial; exit 3").await;
        assert_eq!(exit, ProcessExit::Exited(3));
        assert_eq!(lines, vec!["partial"]);
    }

    #[tokio::test]
    async fn passes_environment() {
        let env = HashMap::from([("BACKUP_TARGET".to_string(), "/mnt/backup".to_string())]);
        let mut lines = Vec::new();
        run_command("echo $BACKUP_TARGET", &env, None, |line| lines.push(line))
            .await
            .unwrap();
        assert_eq!(lines, vec!["/mnt/backup"]);
    }

    #[tokio::test]
    async fn kills_on_timeout() {
        let exit = run_command(
            "sleep 30",
            &HashMap::new(),
            Some(Duration::from_millis(100)),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(exit, ProcessExit::TimedOut(Duration::from_millis(100)));
    }
}

//! Child process execution with masked output capture

use crate::core::RunContext;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Errors that prevent a process from producing an exit code
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),
}

/// Exit code and combined stdout/stderr, with secrets masked
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub output: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `n` lines of output, for error messages
    pub fn tail(&self, n: usize) -> String {
        let lines: Vec<&str> = self.output.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

/// Run `sh -c <script>` in the run workspace
pub async fn run_shell(
    script: &str,
    context: &RunContext,
    step_env: &BTreeMap<String, String>,
    timeout_secs: Option<u64>,
) -> Result<ProcessOutput, ProcessError> {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    run_command(command, "sh", context, step_env, timeout_secs).await
}

/// Run a program with arguments in the run workspace
pub async fn run_program<I, S>(
    program: &str,
    args: I,
    context: &RunContext,
    timeout_secs: Option<u64>,
) -> Result<ProcessOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut command = Command::new(program);
    command.args(args);
    run_command(command, program, context, &BTreeMap::new(), timeout_secs).await
}

async fn run_command(
    mut command: Command,
    program: &str,
    context: &RunContext,
    step_env: &BTreeMap<String, String>,
    timeout_secs: Option<u64>,
) -> Result<ProcessOutput, ProcessError> {
    if context.cancel.is_cancelled() {
        return Err(ProcessError::Cancelled);
    }

    command
        .current_dir(context.workspace())
        .envs(context.command_env(step_env))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| ProcessError::Spawn {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    // The child leads its own process group so backgrounded grandchildren die with it
    let pgid = child.id().map(|id| Pid::from_raw(id as i32));

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let deadline = async {
        match timeout_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    let finish = tokio::select! {
        result = wait_and_collect(&mut child, &mut rx, context) => Finish::Exited(result),
        _ = context.cancel.cancelled() => Finish::Cancelled,
        _ = deadline => Finish::TimedOut,
    };

    match finish {
        Finish::Exited(result) => result,
        Finish::Cancelled => {
            kill_group(pgid, &mut child).await;
            Err(ProcessError::Cancelled)
        }
        Finish::TimedOut => {
            kill_group(pgid, &mut child).await;
            Err(ProcessError::Timeout(timeout_secs.unwrap_or_default()))
        }
    }
}

enum Finish {
    Exited(Result<ProcessOutput, ProcessError>),
    Cancelled,
    TimedOut,
}

/// Wait for exit, then drain output until the pipes close or the grace period ends
///
/// A backgrounded grandchild inherits the pipes and may hold them open long
/// after the child itself exited.
async fn wait_and_collect(
    child: &mut Child,
    rx: &mut mpsc::UnboundedReceiver<String>,
    context: &RunContext,
) -> Result<ProcessOutput, ProcessError> {
    let mut output = String::new();
    let mut push = |line: String| {
        let line = context.masker.mask(&line);
        debug!(target: "covpipe::output", "{}", line);
        output.push_str(&line);
        output.push('\n');
    };

    let status = loop {
        tokio::select! {
            status = child.wait() => break status.map_err(|e| ProcessError::Io(e.to_string()))?,
            Some(line) = rx.recv() => push(line),
        }
    };

    let grace = tokio::time::sleep(DRAIN_GRACE);
    tokio::pin!(grace);
    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => push(line),
                None => break,
            },
            _ = &mut grace => {
                debug!("Output pipes still open after exit, not waiting for background processes");
                break;
            }
        }
    }

    Ok(ProcessOutput {
        exit_code: status.code().unwrap_or(-1),
        output,
    })
}

async fn kill_group(pgid: Option<Pid>, child: &mut Child) {
    if let Some(pgid) = pgid {
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            debug!("killpg {} failed: {}", pgid, e);
        }
    }
    let _ = child.kill().await;
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SecretStore;
    use uuid::Uuid;

    fn context(secrets: SecretStore) -> (tempfile::TempDir, RunContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(Uuid::new_v4(), "test", "main", "abc", dir.path(), secrets);
        (dir, ctx)
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let (_dir, ctx) = context(SecretStore::new());
        let out = run_shell("echo out; echo err 1>&2", &ctx, &BTreeMap::new(), None)
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_code() {
        let (_dir, ctx) = context(SecretStore::new());
        let out = run_shell("exit 3", &ctx, &BTreeMap::new(), None).await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_secrets_are_masked() {
        let mut secrets = SecretStore::new();
        secrets.insert("TOKEN", "hunter2-token");
        let (_dir, ctx) = context(secrets);
        let out = run_shell("echo using hunter2-token", &ctx, &BTreeMap::new(), None)
            .await
            .unwrap();
        assert!(!out.output.contains("hunter2-token"));
        assert!(out.output.contains("using ***"));
    }

    #[tokio::test]
    async fn test_runs_in_workspace_with_run_env() {
        let (dir, ctx) = context(SecretStore::new());
        let out = run_shell("pwd; echo $COVPIPE_BRANCH", &ctx, &BTreeMap::new(), None)
            .await
            .unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(out.output.contains(canonical.to_str().unwrap()) || out.output.contains(dir.path().to_str().unwrap()));
        assert!(out.output.contains("main"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let (_dir, ctx) = context(SecretStore::new());
        let err = run_shell("sleep 5", &ctx, &BTreeMap::new(), Some(1)).await.unwrap_err();
        assert!(matches!(err, ProcessError::Timeout(1)));
    }

    #[tokio::test]
    async fn test_timeout_with_background_child() {
        let (_dir, ctx) = context(SecretStore::new());
        let started = std::time::Instant::now();
        let err = run_shell("sleep 8 & sleep 5", &ctx, &BTreeMap::new(), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout(1)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_cancel_with_background_child() {
        let (_dir, ctx) = context(SecretStore::new());
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let err = run_shell("sleep 8 & sleep 5", &ctx, &BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_background_child_does_not_hold_step_open() {
        let (_dir, ctx) = context(SecretStore::new());
        let started = std::time::Instant::now();
        let out = run_shell("sleep 8 & echo started", &ctx, &BTreeMap::new(), Some(30))
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.output.contains("started"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_dir, ctx) = context(SecretStore::new());
        ctx.cancel.cancel();
        let err = run_shell("true", &ctx, &BTreeMap::new(), None).await.unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let (_dir, ctx) = context(SecretStore::new());
        let err = run_program("definitely-not-a-real-binary-xyz", ["--version"], &ctx, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn test_tail() {
        let out = ProcessOutput {
            exit_code: 1,
            output: "a\nb\nc\n".to_string(),
        };
        assert_eq!(out.tail(2), "b\nc");
    }
}

//! Disposable-process sandbox.
//!
//! Isolation is limited to a throwaway temp file, a fresh process group and
//! a wall-clock limit. There is no filesystem, network or memory confinement.

use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ExecutionError, Sandbox};

/// Runs `interpreter [args...] <artifact>` once per call.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    interpreter: String,
    args: Vec<String>,
    artifact_suffix: String,
    scratch_dir: Option<PathBuf>,
}

impl ProcessSandbox {
    pub fn new(interpreter: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args,
            artifact_suffix: ".py".into(),
            scratch_dir: None,
        }
    }

    /// Directory for artifacts instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_artifact_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.artifact_suffix = suffix.into();
        self
    }

    /// Write `code` to a fresh 0600 file that is removed when dropped.
    fn materialize(&self, code: &str) -> Result<NamedTempFile, ExecutionError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("judgeline-").suffix(&self.artifact_suffix);

        let mut file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| ExecutionError::InternalError(format!("failed to create artifact: {e}")))?;

        file.write_all(code.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| ExecutionError::InternalError(format!("failed to write artifact: {e}")))?;

        Ok(file)
    }
}

struct Captured {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Feed stdin, drain both output pipes and wait for exit, concurrently so a
/// chatty child cannot deadlock on a full pipe.
async fn communicate(child: &mut Child, input: &[u8]) -> std::io::Result<Captured> {
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let write = async move {
        if let Some(mut pipe) = stdin {
            match pipe.write_all(input).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                _ => {}
            }
        }
        Ok(())
    };
    let read_stdout = async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };
    let read_stderr = async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };

    let ((), stdout, stderr) = tokio::try_join!(write, read_stdout, read_stderr)?;
    let status = child.wait().await?;
    Ok(Captured {
        status,
        stdout,
        stderr,
    })
}

/// SIGKILL the whole process group led by `pid`.
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; the group was
    // created for this child and has not been reaped yet.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "Process group already gone");
    }
}

/// Kill the group and reap the child so nothing outlives the call.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_process_group(pid);
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to reap sandboxed child");
    }
}

fn exit_error(status: ExitStatus, stderr: &[u8]) -> ExecutionError {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    if !stderr.is_empty() {
        return ExecutionError::RuntimeError(stderr);
    }
    match (status.code(), status.signal()) {
        (_, Some(signal)) => ExecutionError::RuntimeError(format!("terminated by signal {signal}")),
        (Some(code), None) => ExecutionError::RuntimeError(format!("exited with status {code}")),
        (None, None) => ExecutionError::RuntimeError("exited abnormally".into()),
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run(
        &self,
        code: &str,
        stdin: &str,
        timeout: Duration,
    ) -> Result<String, ExecutionError> {
        let artifact = self.materialize(code)?;

        let mut command = Command::new(&self.interpreter);
        command
            .args(&self.args)
            .arg(artifact.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ExecutionError::RuntimeError(format!("failed to start {}: {e}", self.interpreter))
        })?;
        let pid = child.id();

        let deadline = Instant::now() + timeout;
        let outcome = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => None,
            result = tokio::time::timeout_at(deadline, communicate(&mut child, stdin.as_bytes())) => {
                result.ok()
            }
        };

        match outcome {
            None => {
                debug!(?pid, timeout_ms = timeout.as_millis() as u64, "Execution timed out");
                terminate(&mut child, pid).await;
                Err(ExecutionError::Timeout)
            }
            Some(Err(e)) => {
                terminate(&mut child, pid).await;
                Err(ExecutionError::RuntimeError(format!(
                    "failed to communicate with program: {e}"
                )))
            }
            Some(Ok(captured)) if captured.status.success() => {
                Ok(String::from_utf8_lossy(&captured.stdout).into_owned())
            }
            Some(Ok(captured)) => Err(exit_error(captured.status, &captured.stderr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh() -> ProcessSandbox {
        ProcessSandbox::new("/bin/sh", vec![]).with_artifact_suffix(".sh")
    }

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn returns_stdout_verbatim() {
        let out = sh()
            .run("read x\nprintf '  got %s  \\n' \"$x\"", "5\n", SECOND * 5)
            .await
            .unwrap();
        assert_eq!(out, "  got 5  \n");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_trimmed_stderr() {
        let err = sh()
            .run("echo partial\necho '  boom  ' >&2\nexit 3", "", SECOND * 5)
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::RuntimeError("boom".into()));
    }

    #[tokio::test]
    async fn silent_failure_reports_exit_status() {
        let err = sh().run("exit 4", "", SECOND * 5).await.unwrap_err();
        assert_eq!(err, ExecutionError::RuntimeError("exited with status 4".into()));
    }

    #[tokio::test]
    async fn signal_death_is_runtime_error() {
        let err = sh().run("kill -9 $$", "", SECOND * 5).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::RuntimeError("terminated by signal 9".into())
        );
    }

    #[tokio::test]
    async fn timeout_kills_the_child_promptly() {
        let started = std::time::Instant::now();
        let err = sh()
            .run("sleep 30", "", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Timeout);
        assert_eq!(err.to_string(), "Execution timed out");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let code = format!("sleep 30 &\necho $! > {}\nwait", pid_file.display());

        let err = sh()
            .run(&code, "", Duration::from_millis(300))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Timeout);

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let stat = format!("/proc/{pid}/stat");
        let mut gone = false;
        for _ in 0..50 {
            match std::fs::read_to_string(&stat) {
                Err(_) => gone = true,
                // Killed but not yet reaped by init.
                Ok(s) if s.contains(") Z ") => gone = true,
                Ok(_) => {}
            }
            if gone {
                break;
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert!(gone, "background process {pid} survived the timeout");
    }

    #[tokio::test]
    async fn missing_interpreter_is_runtime_error() {
        let sandbox = ProcessSandbox::new("/nonexistent/interpreter", vec![]);
        match sandbox.run("print(1)", "", SECOND).await {
            Err(ExecutionError::RuntimeError(msg)) => assert!(msg.contains("failed to start")),
            other => panic!("expected RuntimeError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unwritable_scratch_dir_is_internal_error() {
        let sandbox = sh().with_scratch_dir("/nonexistent/scratch");
        assert!(matches!(
            sandbox.run("echo hi", "", SECOND).await,
            Err(ExecutionError::InternalError(_))
        ));
    }

    #[tokio::test]
    async fn artifact_is_removed_on_every_path() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sh().with_scratch_dir(dir.path());

        sandbox.run("echo ok", "", SECOND * 5).await.unwrap();
        sandbox.run("exit 1", "", SECOND * 5).await.unwrap_err();
        sandbox
            .run("sleep 30", "", Duration::from_millis(100))
            .await
            .unwrap_err();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn large_output_and_ignored_stdin_do_not_block() {
        let input = "x".repeat(1 << 20);
        let out = sh()
            .run("head -c 200000 /dev/zero | tr '\\0' 'a'", &input, SECOND * 10)
            .await
            .unwrap();
        assert_eq!(out.len(), 200_000);
    }

    #[tokio::test]
    async fn artifact_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let file = sh().materialize("echo hi").unwrap();
        let mode = file.as_file().metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

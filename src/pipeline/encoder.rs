//! Spawning and supervising the external encoder/prober processes.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::common::error::{PipelineError, PipelineResult};

/// Diagnostic lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string_lossy().to_string())
}

fn exit_error(program: &str, status: ExitStatus, stderr: &str) -> PipelineError {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        PipelineError::Encode(format!("{program} exited with {status}"))
    } else {
        PipelineError::Encode(format!("{program} exited with {status}: {stderr}"))
    }
}

/// Runs a short-lived tool to completion and returns its stdout.
///
/// A non-zero exit status is an [`PipelineError::Encode`]; exceeding
/// `timeout` kills the process and yields [`PipelineError::Timeout`].
pub async fn run(program: &Path, args: &[String], timeout: Duration) -> PipelineResult<String> {
    let name = program_name(program);
    debug!("Executing {} {:?}", name, args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(PipelineError::Encode(format!("failed to run {name}: {e}")));
        }
        Err(_) => {
            return Err(PipelineError::Timeout(format!(
                "{name} did not finish within {timeout:?}"
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(exit_error(&name, output.status, &stderr));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// A long-running encoder whose diagnostics are drained in the background.
pub struct EncoderProcess {
    name: String,
    child: Child,
    stderr: Option<JoinHandle<String>>,
}

impl EncoderProcess {
    /// Starts `program`; with `pipe_stdout` its standard output is captured
    /// for [`EncoderProcess::take_stdout`], otherwise discarded.
    pub fn spawn(program: &Path, args: &[String], pipe_stdout: bool) -> PipelineResult<Self> {
        let name = program_name(program);
        debug!("Spawning {} {:?}", name, args);

        let stdout = if pipe_stdout { Stdio::piped() } else { Stdio::null() };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Encode(format!("failed to spawn {name}: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .map(|s| tokio::spawn(drain_stderr(name.clone(), s)));

        Ok(Self {
            name,
            child,
            stderr,
        })
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Non-blocking exit check.
    pub fn try_status(&mut self) -> PipelineResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    pub async fn wait(&mut self) -> PipelineResult<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill {}: {}", self.name, e);
        }
    }

    /// Turns an exit status into a result, attaching the diagnostic tail on
    /// failure.
    pub async fn check(mut self, status: ExitStatus) -> PipelineResult<()> {
        if status.success() {
            return Ok(());
        }
        let tail = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(exit_error(&self.name, status, &tail))
    }
}

async fn drain_stderr(name: String, stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: Vec<String> = Vec::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "chunkmill::encoder", "[{}] {}", name, line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.remove(0);
        }
        tail.push(line);
    }

    tail.join("\n")
}

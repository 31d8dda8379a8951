//! External analyzers: local subprocesses and the hosted completion API.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{process::Command, task::JoinHandle};

use crate::{
    errors::Error,
    ports::{CompletionClient, CompletionRequest},
    Result,
};

const STDERR_TAIL_MAX_CHARS: usize = 1000;

/// How to launch one analyzer binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSpec {
    /// Name used in logs and error messages.
    pub name: String,
    pub program: PathBuf,
    /// Arguments placed before the per-call arguments (e.g. an interpreter's script).
    pub leading_args: Vec<String>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StderrMode {
    Discard,
    Capture,
}

/// Raw outcome of one subprocess run.
#[derive(Clone, Debug)]
pub struct ToolInvocationResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitStatus,
    pub elapsed: Duration,
}

impl ToolInvocationResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs analyzer subprocesses with an optional bound on the wait.
///
/// Children are killed when the waiting future is dropped, so a cancelled
/// invocation does not leave a process behind.
#[derive(Clone, Debug, Default)]
pub struct ToolInvoker {
    timeout: Option<Duration>,
}

impl ToolInvoker {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Run `tool <args..> <input>`; a non-zero exit is a `ToolExecution` error.
    pub async fn run(
        &self,
        tool: &ToolSpec,
        args: &[String],
        input: &Path,
        stderr: StderrMode,
    ) -> Result<ToolInvocationResult> {
        let out = self.execute(tool, args, input, stderr).await?;
        if !out.success() {
            return Err(Error::ToolExecution {
                tool: tool.name.clone(),
                status: out.status.to_string(),
                stderr: stderr_tail(&out.stderr),
            });
        }
        Ok(out)
    }

    /// Run without judging the exit status.
    pub async fn execute(
        &self,
        tool: &ToolSpec,
        args: &[String],
        input: &Path,
        stderr: StderrMode,
    ) -> Result<ToolInvocationResult> {
        let mut cmd = Command::new(&tool.program);
        cmd.args(&tool.leading_args)
            .args(args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(match stderr {
                StderrMode::Discard => Stdio::null(),
                StderrMode::Capture => Stdio::piped(),
            })
            .kill_on_drop(true);

        let started = Instant::now();
        let child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => Error::Unavailable(format!(
                "{} ({}): {e}",
                tool.name,
                tool.program.display()
            )),
            _ => Error::Io(e),
        })?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| Error::ToolTimeout {
                    tool: tool.name.clone(),
                    after: limit,
                })??,
            None => child.wait_with_output().await?,
        };

        let elapsed = started.elapsed();
        tracing::debug!(
            tool = %tool.name,
            status = %output.status,
            stdout_bytes = output.stdout.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "tool finished"
        );

        Ok(ToolInvocationResult {
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status,
            elapsed,
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL_MAX_CHARS {
        return text.to_string();
    }
    text.chars().skip(count - STDERR_TAIL_MAX_CHARS).collect()
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run a completion request on a runtime worker task and await it.
///
/// The request never executes on the calling task, so a slow provider cannot
/// stall the interaction that is waiting. Empty answers are failures.
pub async fn complete_on_worker(
    client: Arc<dyn CompletionClient>,
    req: CompletionRequest,
    timeout: Option<Duration>,
) -> Result<String> {
    let model = req.model.clone();
    let mut task = AbortOnDrop(tokio::spawn(async move { client.complete(req).await }));

    let joined = match timeout {
        Some(limit) => tokio::time::timeout(limit, &mut task.0)
            .await
            .map_err(|_| Error::ToolTimeout {
                tool: format!("completion ({model})"),
                after: limit,
            })?,
        None => (&mut task.0).await,
    };

    let text = joined.map_err(|e| Error::External(format!("completion worker failed: {e}")))??;
    if text.trim().is_empty() {
        return Err(Error::EmptyResponse(
            "Empty response received from AI".to_string(),
        ));
    }
    Ok(text)
}

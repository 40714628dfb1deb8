//! Command runner: spawn inside the live sandbox and collect output.

use super::WorkspaceError;
use crate::sandbox::Sandbox;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Tracing target for mirrored process output.
pub const OUTPUT_TARGET: &str = "zerobuild_preview::output";

/// How long `wait` lets the output sink drain after the process exits.
const SINK_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Output chunks collected while a process runs. Clones share the buffer.
#[derive(Clone)]
pub struct OutputLog {
    inner: Arc<Mutex<LogBuffer>>,
}

struct LogBuffer {
    chunks: VecDeque<String>,
    capacity: Option<usize>,
    dropped: usize,
}

impl OutputLog {
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Keep the newest `capacity` chunks.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogBuffer {
                chunks: VecDeque::new(),
                capacity,
                dropped: 0,
            })),
        }
    }

    pub fn push(&self, chunk: String) {
        let mut buf = self.inner.lock();
        if let Some(cap) = buf.capacity {
            while buf.chunks.len() >= cap {
                buf.chunks.pop_front();
                buf.dropped += 1;
            }
        }
        buf.chunks.push_back(chunk);
    }

    pub fn chunks(&self) -> Vec<String> {
        self.inner.lock().chunks.iter().cloned().collect()
    }

    pub fn joined(&self) -> String {
        self.inner.lock().chunks.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chunks evicted because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.inner.lock().dropped
    }
}

impl std::fmt::Debug for OutputLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buf = self.inner.lock();
        f.debug_struct("OutputLog")
            .field("chunks", &buf.chunks.len())
            .field("capacity", &buf.capacity)
            .field("dropped", &buf.dropped)
            .finish()
    }
}

/// A spawned command whose output is being collected.
pub struct RunningCommand {
    command: String,
    output: OutputLog,
    exit: BoxFuture<'static, anyhow::Result<i32>>,
    sink: JoinHandle<()>,
}

impl RunningCommand {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Live view of the output; keeps filling until the process exits.
    pub fn output(&self) -> &OutputLog {
        &self.output
    }

    /// Wait for the exit code. Output collected by then is complete.
    pub async fn wait(self) -> Result<i32, WorkspaceError> {
        let code = self.exit.await.map_err(|reason| WorkspaceError::Process {
            command: self.command.clone(),
            reason,
        })?;
        if tokio::time::timeout(SINK_DRAIN_GRACE, self.sink).await.is_err() {
            tracing::debug!(
                command = %self.command,
                "Output still open after exit; not waiting for it"
            );
        }
        Ok(code)
    }
}

impl std::fmt::Debug for RunningCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningCommand")
            .field("command", &self.command)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

pub fn display_command(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawns commands and attaches an output sink. No backpressure: the sink
/// keeps up with whatever the sandbox produces.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    buffer_chunks: usize,
}

impl CommandRunner {
    pub fn new(buffer_chunks: usize) -> Self {
        Self { buffer_chunks }
    }

    /// Run with a log bounded at the configured size.
    pub async fn run(
        &self,
        sandbox: &dyn Sandbox,
        command: &str,
        args: &[String],
    ) -> Result<RunningCommand, WorkspaceError> {
        self.run_with_log(sandbox, command, args, OutputLog::bounded(self.buffer_chunks))
            .await
    }

    /// Returns as soon as the process is spawned.
    pub async fn run_with_log(
        &self,
        sandbox: &dyn Sandbox,
        command: &str,
        args: &[String],
        log: OutputLog,
    ) -> Result<RunningCommand, WorkspaceError> {
        let line = display_command(command, args);
        let process = sandbox
            .spawn(command, args)
            .await
            .map_err(|reason| WorkspaceError::Spawn {
                command: line.clone(),
                reason,
            })?;
        tracing::info!(sandbox = sandbox.id(), command = %line, "Spawned command");

        let (mut output, exit) = process.into_parts();
        let sink_log = log.clone();
        let label = line.clone();
        let sink = tokio::spawn(async move {
            while let Some(chunk) = output.next().await {
                tracing::debug!(target: OUTPUT_TARGET, command = %label, "{}", chunk.trim_end());
                sink_log.push(chunk);
            }
        });

        Ok(RunningCommand {
            command: line,
            output: log,
            exit,
            sink,
        })
    }
}

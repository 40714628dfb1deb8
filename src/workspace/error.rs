use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by workspace operations.
///
/// Boot and install failures are never returned from
/// [`ensure_ready`](super::WorkspaceSession::ensure_ready); they are recorded in
/// [`WorkspaceState::last_error`](super::WorkspaceState::last_error) instead.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("sandbox failed to boot: {0:#}")]
    Boot(anyhow::Error),

    #[error("dependency install exited with code {exit_code}")]
    Install { exit_code: i32 },

    #[error("failed to spawn `{command}`: {reason:#}")]
    Spawn {
        command: String,
        reason: anyhow::Error,
    },

    #[error("process `{command}` failed: {reason:#}")]
    Process {
        command: String,
        reason: anyhow::Error,
    },

    #[error("sandbox is not ready")]
    NotReady,

    #[error("{operation} timed out after {after:?}")]
    TimedOut {
        operation: &'static str,
        after: Duration,
    },
}

impl WorkspaceError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, WorkspaceError::NotReady)
    }
}

//! Workspace orchestrator.
//!
//! A [`WorkspaceSession`] is what a UI scope holds while it is mounted. It
//! drives the shared [`SandboxContext`]: boot or reuse the sandbox, install
//! dependencies once, start the development server once and resolve the
//! preview URL. Observable flags are published on a `watch` channel.
//!
//! - [`lifecycle`]: `ensure_ready` / `reboot`
//! - [`runner`]: spawn + output collection
//! - [`preview`]: dev server start and preview URL resolution
//! - [`subscriptions`]: release of sandbox event listeners
//! - [`files`]: best-effort file sync and tree listing

pub mod context;
pub mod error;
pub mod files;
pub mod lifecycle;
pub mod preview;
pub mod runner;
pub mod subscriptions;
pub mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use context::SandboxContext;
pub use error::WorkspaceError;
pub use files::FileEntry;
pub use preview::{AutoStartGuard, PreviewPhase, PreviewResolver, PreviewSignal, PreviewSource};
pub use runner::{CommandRunner, OutputLog, RunningCommand};
pub use subscriptions::{SubscriptionId, SubscriptionRegistry};

use crate::sandbox::Sandbox;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Observable session state.
///
/// `preview_url.is_some()` implies `!server_starting`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkspaceState {
    /// A sandbox handle is adopted by this session.
    pub ready: bool,
    pub booting: bool,
    pub installing_deps: bool,
    pub server_starting: bool,
    pub preview_url: Option<String>,
    /// Latest boot, install or preview failure.
    pub last_error: Option<String>,
}

impl WorkspaceState {
    pub fn preview_phase(&self) -> PreviewPhase {
        if self.preview_url.is_some() {
            PreviewPhase::Ready
        } else if self.server_starting {
            PreviewPhase::Starting
        } else {
            PreviewPhase::Idle
        }
    }
}

/// Notifications for editor-side consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceEvent {
    FileModified { path: String },
}

/// Per-UI-scope orchestrator state and operations.
///
/// Dropping the session releases every sandbox listener it registered; the
/// shared sandbox itself stays alive in the context.
pub struct WorkspaceSession {
    context: Arc<SandboxContext>,
    state: Arc<watch::Sender<WorkspaceState>>,
    sandbox: RwLock<Option<Arc<dyn Sandbox>>>,
    preview: PreviewResolver,
    auto_start: AutoStartGuard,
    subscriptions: Arc<SubscriptionRegistry>,
    runner: CommandRunner,
    dev_server_output: Mutex<Option<OutputLog>>,
    events: broadcast::Sender<WorkspaceEvent>,
}

impl WorkspaceSession {
    pub fn new(context: Arc<SandboxContext>) -> Self {
        let (state, _) = watch::channel(WorkspaceState::default());
        let state = Arc::new(state);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let runner = CommandRunner::new(context.config().output_buffer_chunks);

        Self {
            preview: PreviewResolver::new(Arc::clone(&state)),
            context,
            state,
            sandbox: RwLock::new(None),
            auto_start: AutoStartGuard::default(),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            runner,
            dev_server_output: Mutex::new(None),
            events,
        }
    }

    pub fn context(&self) -> &Arc<SandboxContext> {
        &self.context
    }

    /// Snapshot of the observable state.
    pub fn state(&self) -> WorkspaceState {
        self.state.borrow().clone()
    }

    /// Receiver that sees every state change.
    pub fn watch(&self) -> watch::Receiver<WorkspaceState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }

    pub fn preview_url(&self) -> Option<String> {
        self.state.borrow().preview_url.clone()
    }

    pub fn is_booting(&self) -> bool {
        self.state.borrow().booting
    }

    pub fn is_installing_deps(&self) -> bool {
        self.state.borrow().installing_deps
    }

    pub fn is_server_starting(&self) -> bool {
        self.state.borrow().server_starting
    }

    /// The sandbox this session has adopted.
    pub fn sandbox(&self) -> Option<Arc<dyn Sandbox>> {
        self.sandbox.read().clone()
    }

    /// Output of the dev server started by this session, if any.
    pub fn dev_server_output(&self) -> Option<OutputLog> {
        self.dev_server_output.lock().clone()
    }

    /// Run a command in the adopted sandbox.
    pub async fn run_command(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<RunningCommand, WorkspaceError> {
        let sandbox = self.sandbox().ok_or(WorkspaceError::NotReady)?;
        self.runner.run(sandbox.as_ref(), command, args).await
    }

    /// Wait until a preview URL is known or nothing is in flight any more.
    pub async fn wait_for_preview(&self) -> Option<String> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|s| {
                s.preview_url.is_some() || !(s.booting || s.installing_deps || s.server_starting)
            })
            .await
            .ok()?;
        settled.preview_url.clone()
    }

    /// Release every listener registered by this session.
    pub fn teardown(&self) {
        let released = self.subscriptions.release_all();
        if released > 0 {
            tracing::debug!(released, "Released sandbox event subscriptions");
        }
    }

    pub(crate) fn adopt(&self, sandbox: Arc<dyn Sandbox>) {
        *self.sandbox.write() = Some(sandbox);
        self.state.send_modify(|s| {
            s.ready = true;
            s.booting = false;
            s.last_error = None;
        });
    }

    pub(crate) fn record_error(&self, error: &WorkspaceError) {
        let message = error.to_string();
        self.state.send_modify(|s| s.last_error = Some(message));
    }
}

impl Drop for WorkspaceSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

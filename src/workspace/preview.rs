//! Preview resolver: start the dev server once and settle on one preview URL.
//!
//! Two sandbox events can announce the server: `server-ready` and `port`
//! (open on the preview port). Both are turned into a [`PreviewSignal`] and
//! fed into [`PreviewResolver::resolve`], so whichever arrives first wins and
//! the other is a no-op.

use super::subscriptions::{SubscriptionId, SubscriptionRegistry};
use super::{WorkspaceError, WorkspaceSession, WorkspaceState};
use crate::sandbox::{EventKind, Listener, PortStatus, Sandbox, SandboxEvent, Unsubscribe};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Which event produced a preview URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewSource {
    ServerReady,
    PortOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSignal {
    pub source: PreviewSource,
    pub url: String,
}

impl PreviewSignal {
    /// `server-ready` always counts; `port` only when `preview_port` opens.
    pub fn from_event(event: &SandboxEvent, preview_port: u16) -> Option<Self> {
        match event {
            SandboxEvent::ServerReady { url, .. } => Some(Self {
                source: PreviewSource::ServerReady,
                url: url.clone(),
            }),
            SandboxEvent::Port {
                port,
                status: PortStatus::Open,
                url,
            } if *port == preview_port => Some(Self {
                source: PreviewSource::PortOpen,
                url: url.clone(),
            }),
            SandboxEvent::Port { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewPhase {
    Idle,
    Starting,
    Ready,
}

/// Outcome of asking to start the dev server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    /// `Idle → Starting` happened; the caller owns this start cycle.
    Begin(u64),
    AlreadyStarting,
    AlreadyReady(String),
}

/// Preview state transitions on the session's state channel.
///
/// Every transition is a single `send_if_modified`, so concurrent callers
/// observe exactly one winner.
#[derive(Clone)]
pub struct PreviewResolver {
    state: Arc<watch::Sender<WorkspaceState>>,
    cycle: Arc<AtomicU64>,
}

impl PreviewResolver {
    pub fn new(state: Arc<watch::Sender<WorkspaceState>>) -> Self {
        Self {
            state,
            cycle: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn phase(&self) -> PreviewPhase {
        self.state.borrow().preview_phase()
    }

    pub fn begin(&self) -> StartDecision {
        let mut decision = StartDecision::AlreadyStarting;
        self.state.send_if_modified(|s| {
            if let Some(url) = &s.preview_url {
                decision = StartDecision::AlreadyReady(url.clone());
                return false;
            }
            if s.server_starting {
                return false;
            }
            s.server_starting = true;
            decision = StartDecision::Begin(self.cycle.fetch_add(1, Ordering::AcqRel) + 1);
            true
        });
        decision
    }

    /// Adopt `signal.url` unless a URL is already known. Returns whether this
    /// call changed the state.
    pub fn resolve(&self, signal: &PreviewSignal) -> bool {
        self.state.send_if_modified(|s| {
            if s.preview_url.is_some() {
                return false;
            }
            s.preview_url = Some(signal.url.clone());
            s.server_starting = false;
            true
        })
    }

    /// `Starting → Idle` for start `cycle`, if it is still the current one and
    /// has not resolved.
    pub fn abort(&self, cycle: u64, error: Option<String>) -> bool {
        self.state.send_if_modified(|s| {
            if self.cycle.load(Ordering::Acquire) != cycle
                || !s.server_starting
                || s.preview_url.is_some()
            {
                return false;
            }
            s.server_starting = false;
            if error.is_some() {
                s.last_error = error;
            }
            true
        })
    }

    /// Back to `Idle`, invalidating any in-flight start cycle.
    pub fn reset(&self) {
        self.cycle.fetch_add(1, Ordering::AcqRel);
        self.state.send_if_modified(|s| {
            let changed = s.server_starting || s.preview_url.is_some();
            s.server_starting = false;
            s.preview_url = None;
            changed
        });
    }
}

/// One-shot latch for the automatic dev server start after a ready
/// transition.
#[derive(Debug, Default)]
pub struct AutoStartGuard {
    claimed: AtomicBool,
}

impl AutoStartGuard {
    /// True for exactly one caller until `reset`.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn reset(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

/// One dev server start attempt and the listeners registered for it.
#[derive(Clone)]
struct StartCycle {
    id: u64,
    resolver: PreviewResolver,
    subscriptions: Arc<SubscriptionRegistry>,
    listeners: Arc<[SubscriptionId]>,
}

impl StartCycle {
    /// Release this cycle's listeners, then `Starting → Idle` unless the
    /// cycle already resolved or was superseded.
    fn abort(&self, error: String) -> bool {
        for id in self.listeners.iter() {
            self.subscriptions.release(*id);
        }
        self.resolver.abort(self.id, Some(error))
    }
}

impl WorkspaceSession {
    /// Start the dev server and wait for its URL through sandbox events.
    ///
    /// No-op when a URL is already known or a start is in flight. Fails with
    /// [`WorkspaceError::NotReady`] before the sandbox is adopted and with
    /// [`WorkspaceError::Spawn`] when the dev server cannot be started, in
    /// which case the phase returns to `Idle`.
    pub async fn start_preview_server(&self) -> Result<(), WorkspaceError> {
        let sandbox = self.sandbox().ok_or(WorkspaceError::NotReady)?;

        let id = match self.preview.begin() {
            StartDecision::Begin(id) => id,
            StartDecision::AlreadyReady(url) => {
                tracing::info!(%url, "Preview URL already known");
                return Ok(());
            }
            StartDecision::AlreadyStarting => {
                tracing::debug!("Dev server start already in progress");
                return Ok(());
            }
        };

        let config = self.context.config();
        let listeners = [EventKind::ServerReady, EventKind::Port]
            .into_iter()
            .map(|kind| {
                let handle = self.subscribe_preview(sandbox.as_ref(), kind, config.preview_port);
                self.subscriptions.track(move || handle.release())
            })
            .collect();
        let cycle = StartCycle {
            id,
            resolver: self.preview.clone(),
            subscriptions: Arc::clone(&self.subscriptions),
            listeners,
        };

        let dev = &config.dev_server;
        let running = match self.runner.run(sandbox.as_ref(), &dev.program, &dev.args).await {
            Ok(running) => running,
            Err(e) => {
                tracing::error!("Failed to start dev server: {e}");
                cycle.abort(e.to_string());
                return Err(e);
            }
        };
        *self.dev_server_output.lock() = Some(running.output().clone());

        let exited = cycle.clone();
        tokio::spawn(async move {
            let command = running.command().to_string();
            let reason = match running.wait().await {
                Ok(code) => format!("dev server `{command}` exited with code {code}"),
                Err(e) => e.to_string(),
            };
            tracing::warn!("{reason}");
            exited.abort(reason);
        });

        if let Some(after) = config.preview_timeout() {
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let err = WorkspaceError::TimedOut {
                    operation: "preview",
                    after,
                };
                if cycle.abort(err.to_string()) {
                    tracing::warn!("{err}; preview is idle again");
                }
            });
        }

        Ok(())
    }

    /// Register a listener that resolves the preview and then releases
    /// itself once it has seen a matching event.
    fn subscribe_preview(&self, sandbox: &dyn Sandbox, kind: EventKind, port: u16) -> Unsubscribe {
        let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::default();
        let fired = Arc::new(AtomicBool::new(false));

        let resolver = self.preview.clone();
        let own = Arc::clone(&slot);
        let seen = Arc::clone(&fired);
        let listener: Listener = Arc::new(move |event: &SandboxEvent| {
            let Some(signal) = PreviewSignal::from_event(event, port) else {
                return;
            };
            if resolver.resolve(&signal) {
                tracing::info!(url = %signal.url, source = ?signal.source, "Preview ready");
            }
            seen.store(true, Ordering::SeqCst);
            if let Some(handle) = own.lock().take() {
                handle.release();
            }
        });

        let handle = sandbox.on(kind, listener);
        *slot.lock() = Some(handle.clone());
        // The provider may have delivered a matching event during `on`.
        if fired.load(Ordering::SeqCst) {
            handle.release();
        }
        handle
    }
}

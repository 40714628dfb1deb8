//! Sandbox event channel: `server-ready` and `port` notifications.
//!
//! Providers embed an [`EventEmitter`] and forward [`Sandbox::on`] to it.
//! Listeners are called outside the registration lock, so a listener may
//! release its own [`Unsubscribe`] while it is running.
//!
//! [`Sandbox::on`]: super::Sandbox::on

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Port state reported by a `port` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    Open,
    Close,
}

impl PortStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortStatus::Open => "open",
            PortStatus::Close => "close",
        }
    }
}

impl std::fmt::Display for PortStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification emitted by a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxEvent {
    /// A server inside the sandbox is reachable at `url`.
    ServerReady { port: u16, url: String },
    /// A port was opened or closed.
    Port {
        port: u16,
        status: PortStatus,
        url: String,
    },
}

impl SandboxEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SandboxEvent::ServerReady { .. } => EventKind::ServerReady,
            SandboxEvent::Port { .. } => EventKind::Port,
        }
    }
}

/// Event name a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServerReady,
    Port,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ServerReady => "server-ready",
            EventKind::Port => "port",
        }
    }
}

pub type Listener = Arc<dyn Fn(&SandboxEvent) + Send + Sync>;

struct Registration {
    id: u64,
    kind: EventKind,
    listener: Listener,
}

type Registrations = Mutex<Vec<Registration>>;

/// Listener table shared by a sandbox and the handles it gives out.
#[derive(Clone, Default)]
pub struct EventEmitter {
    registrations: Arc<Registrations>,
    next_id: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: EventKind, listener: Listener) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registrations.lock().push(Registration { id, kind, listener });
        Unsubscribe {
            inner: Arc::new(UnsubscribeInner {
                id,
                registrations: Arc::downgrade(&self.registrations),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Deliver `event` to every listener of its kind. Returns how many
    /// listeners were called.
    pub fn emit(&self, event: &SandboxEvent) -> usize {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .registrations
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| Arc::clone(&r.listener))
            .collect();

        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn clear(&self) {
        self.registrations.lock().clear();
    }
}

struct UnsubscribeInner {
    id: u64,
    registrations: Weak<Registrations>,
    released: AtomicBool,
}

/// Handle that removes one listener. Clones share state; only the first
/// `release` has an effect.
#[derive(Clone)]
pub struct Unsubscribe {
    inner: Arc<UnsubscribeInner>,
}

impl Unsubscribe {
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registrations) = self.inner.registrations.upgrade() {
            registrations.lock().retain(|r| r.id != self.inner.id);
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.inner.id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let listener: Listener = Arc::new(move |_: &SandboxEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, listener)
    }

    fn ready(port: u16) -> SandboxEvent {
        SandboxEvent::ServerReady {
            port,
            url: format!("http://localhost:{port}"),
        }
    }

    #[test]
    fn emit_only_reaches_matching_kind() {
        let emitter = EventEmitter::new();
        let (ready_hits, on_ready) = counter();
        let (port_hits, on_port) = counter();
        let _a = emitter.on(EventKind::ServerReady, on_ready);
        let _b = emitter.on(EventKind::Port, on_port);

        assert_eq!(emitter.emit(&ready(3000)), 1);
        assert_eq!(ready_hits.load(Ordering::SeqCst), 1);
        assert_eq!(port_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn release_is_idempotent() {
        let emitter = EventEmitter::new();
        let (hits, listener) = counter();
        let unsub = emitter.on(EventKind::ServerReady, listener);
        let _other = emitter.on(EventKind::ServerReady, Arc::new(|_: &SandboxEvent| {}));

        unsub.release();
        unsub.clone().release();
        assert!(unsub.is_released());
        assert_eq!(emitter.listener_count(), 1);

        emitter.emit(&ready(3000));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_can_release_itself_while_running() {
        let emitter = EventEmitter::new();
        let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&slot);
        let h = Arc::clone(&hits);
        let unsub = emitter.on(
            EventKind::ServerReady,
            Arc::new(move |_: &SandboxEvent| {
                h.fetch_add(1, Ordering::SeqCst);
                if let Some(u) = s.lock().take() {
                    u.release();
                }
            }),
        );
        *slot.lock() = Some(unsub);

        emitter.emit(&ready(3000));
        emitter.emit(&ready(3000));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn release_after_emitter_dropped_does_not_panic() {
        let emitter = EventEmitter::new();
        let unsub = emitter.on(EventKind::Port, Arc::new(|_: &SandboxEvent| {}));
        drop(emitter);
        unsub.release();
        assert!(unsub.is_released());
    }
}

//! Session-owned list of unsubscribe callbacks.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

type Release = Box<dyn FnOnce() + Send>;

/// Key of one tracked callback, for releasing it ahead of the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Tracks every event unsubscribe handle created during a session.
///
/// `release_all` runs each tracked callback once, in the order added, and
/// leaves the registry empty.
#[derive(Default)]
pub struct SubscriptionRegistry {
    pending: Mutex<Vec<(SubscriptionId, Release)>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, release: impl FnOnce() + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().push((id, Box::new(release)));
        id
    }

    /// Run and forget one callback. False when it already ran.
    pub fn release(&self, id: SubscriptionId) -> bool {
        let release = {
            let mut pending = self.pending.lock();
            match pending.iter().position(|(tracked, _)| *tracked == id) {
                Some(index) => pending.remove(index).1,
                None => return false,
            }
        };
        release();
        true
    }

    /// Returns how many callbacks ran.
    pub fn release_all(&self) -> usize {
        // Drain before running so a callback may track or release re-entrantly.
        let drained = std::mem::take(&mut *self.pending.lock());
        let count = drained.len();
        for (_, release) in drained {
            release();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

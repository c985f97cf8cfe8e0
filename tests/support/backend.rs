//! Scriptable in-memory backend for pool tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use coordkit::pool::{Backend, BackendError};

#[derive(Debug, PartialEq, Eq)]
pub struct MemoryHandle {
    pub id: u64,
}

/// Counts every connect/close and lets a test refuse connections or kill
/// individual handles.
pub struct MemoryBackend {
    next_id: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    /// Connects still allowed; negative means unlimited.
    budget: AtomicI64,
    live: Mutex<HashSet<u64>>,
    dead: Mutex<HashSet<u64>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            next_id: AtomicU64::new(1),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            budget: AtomicI64::new(-1),
            live: Mutex::new(HashSet::new()),
            dead: Mutex::new(HashSet::new()),
        }
    }

    /// Allow exactly `n` more successful connects.
    pub fn allow_connects(&self, n: i64) {
        self.budget.store(n, Ordering::SeqCst);
    }

    pub fn refuse_connects(&self) {
        self.allow_connects(0);
    }

    pub fn accept_connects(&self) {
        self.allow_connects(-1);
    }

    /// Make a handle fail its next ping, as if the server dropped it.
    pub fn kill(&self, id: u64) {
        self.dead.lock().unwrap().insert(id);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_live(&self, id: u64) -> bool {
        self.live.lock().unwrap().contains(&id)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    type Handle = MemoryHandle;

    fn connect(&self) -> Result<MemoryHandle, BackendError> {
        let allowed = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |budget| match budget {
                b if b < 0 => Some(b),
                0 => None,
                b => Some(b - 1),
            })
            .is_ok();
        if !allowed {
            return Err(BackendError::ConnectionFailed("connection refused".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(id);
        Ok(MemoryHandle { id })
    }

    fn ping(&self, handle: &MemoryHandle) -> bool {
        !self.dead.lock().unwrap().contains(&handle.id)
    }

    fn close(&self, handle: MemoryHandle) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().remove(&handle.id);
    }
}

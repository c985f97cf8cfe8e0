use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::{Backend, Connection, PoolConfig, PoolError};

/// Identity of a pooled connection, unique within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolPhase {
    /// Constructed, not yet initialized (or initialization failed).
    New,
    /// Initialized and handing out connections.
    Ready,
    /// Cleaned up. Never usable again.
    Retired,
}

/// Point-in-time snapshot of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub phase: PoolPhase,
    pub size: usize,
    pub available: usize,
    pub in_use: usize,
}

type Shared<B> = Arc<Mutex<Connection<B>>>;

struct Slot<B: Backend> {
    id: ConnectionId,
    conn: Shared<B>,
    in_use: bool,
}

struct PoolState<B: Backend> {
    phase: PoolPhase,
    slots: Vec<Slot<B>>,
}

/// A bounded, thread-safe pool of [`Connection`]s.
///
/// Every pool method runs under one mutex. Checkout never waits for a
/// connection to be returned: when the pool is at `max_size` and everything
/// is in use, [`get_connection`](Self::get_connection) returns `None` at once.
/// [`get_connection_timeout`](Self::get_connection_timeout) is the waiting
/// variant. Waiters are not served in FIFO order; whoever takes the pool
/// mutex first after a release wins.
///
/// Before each checkout, available connections that fail a health check are
/// closed and dropped from the pool. Connections out on loan are never
/// checked.
///
/// ## Example
///
/// ```ignore
/// let pool = ConnectionPool::new(PostgresBackend::new(url), PoolConfig::new(2, 3))?;
/// assert!(pool.initialize()?);
///
/// if let Some(conn) = pool.get_connection()? {
///     conn.with(|conn| run_query(conn.ensure_handle()))?;
///     pool.release_connection(conn)?;
/// }
///
/// pool.cleanup();
/// ```
pub struct ConnectionPool<B: Backend> {
    backend: Arc<B>,
    config: PoolConfig,
    state: Mutex<PoolState<B>>,
    released: Condvar,
    next_id: AtomicU64,
}

impl<B: Backend> ConnectionPool<B> {
    /// Create a pool. No connection is opened until [`initialize`](Self::initialize).
    pub fn new(backend: B, config: PoolConfig) -> Result<Self, PoolError> {
        Self::with_shared_backend(Arc::new(backend), config)
    }

    pub fn with_shared_backend(backend: Arc<B>, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(ConnectionPool {
            backend,
            config,
            state: Mutex::new(PoolState {
                phase: PoolPhase::New,
                slots: Vec::new(),
            }),
            released: Condvar::new(),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn state(&self) -> Result<MutexGuard<'_, PoolState<B>>, PoolError> {
        self.state
            .lock()
            .map_err(|_| PoolError::Poisoned("pool state"))
    }

    /// Open `min_size` connections.
    ///
    /// All or nothing: if any connection fails to open, the ones already
    /// opened are closed and the pool stays uninitialized, so a later call
    /// starts from scratch. Returns `Ok(false)` on failure and when the pool
    /// was already initialized or cleaned up.
    pub fn initialize(&self) -> Result<bool, PoolError> {
        let mut state = self.state()?;
        if state.phase != PoolPhase::New {
            return Ok(false);
        }

        let mut opened = Vec::with_capacity(self.config.min_size);
        while opened.len() < self.config.min_size {
            match self.open_slot(false) {
                Some(slot) => opened.push(slot),
                None => {
                    tracing::warn!(
                        opened = opened.len(),
                        min_size = self.config.min_size,
                        "pool initialization failed, closing partial pool"
                    );
                    // Dropping the slots closes their connections.
                    return Ok(false);
                }
            }
        }

        state.slots = opened;
        state.phase = PoolPhase::Ready;
        tracing::debug!(size = state.slots.len(), "pool initialized");
        Ok(true)
    }

    /// Check out a connection without waiting.
    ///
    /// Reuses an available connection if one passes the health check,
    /// otherwise opens a new one while below `max_size`. `None` when the pool
    /// is not initialized, is exhausted, or a new connection failed to open.
    pub fn get_connection(&self) -> Result<Option<PooledConnection<B>>, PoolError> {
        let mut state = self.state()?;
        if state.phase != PoolPhase::Ready {
            return Ok(None);
        }
        Ok(self.try_checkout(&mut state))
    }

    /// Check out a connection, waiting up to `timeout` for one to be released.
    pub fn get_connection_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<PooledConnection<B>>, PoolError> {
        // A timeout too large to represent waits until a release or cleanup.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state()?;
        loop {
            if state.phase != PoolPhase::Ready {
                return Ok(None);
            }
            if let Some(conn) = self.try_checkout(&mut state) {
                return Ok(Some(conn));
            }
            state = match deadline {
                None => self
                    .released
                    .wait(state)
                    .map_err(|_| PoolError::Poisoned("pool state"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.released
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| PoolError::Poisoned("pool state"))?
                        .0
                }
            };
        }
    }

    /// Check out a connection that goes back to the pool when dropped.
    pub fn checkout(&self) -> Result<Option<ScopedConnection<'_, B>>, PoolError> {
        Ok(self.get_connection()?.map(|conn| ScopedConnection {
            pool: self,
            conn: Some(conn),
        }))
    }

    /// Return a connection to the pool.
    ///
    /// A no-op if the connection is no longer pooled or the pool is not
    /// initialized.
    pub fn release_connection(&self, mut conn: PooledConnection<B>) -> Result<(), PoolError> {
        conn.returned = true;
        let mut state = self.state()?;
        if state.phase != PoolPhase::Ready {
            return Ok(());
        }
        let slot = state
            .slots
            .iter_mut()
            .find(|slot| slot.id == conn.id && Arc::ptr_eq(&slot.conn, &conn.conn));
        match slot {
            Some(slot) => {
                slot.in_use = false;
                self.released.notify_one();
                tracing::debug!(id = ?conn.id, "connection released");
            }
            None => tracing::debug!(id = ?conn.id, "released connection is no longer pooled"),
        }
        Ok(())
    }

    /// Close every connection, in use or not, and retire the pool.
    ///
    /// Idempotent and safe before `initialize`. A connection whose borrower
    /// is using it right now is closed when the borrower drops it.
    pub fn cleanup(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let closing = state.slots.len();
        for slot in state.slots.drain(..) {
            match slot.conn.try_lock() {
                Ok(mut conn) => conn.close(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().close(),
                Err(TryLockError::WouldBlock) => {
                    tracing::debug!(id = ?slot.id, "connection busy, closing on last drop")
                }
            }
        }
        if state.phase != PoolPhase::Retired {
            tracing::debug!(closed = closing, "pool cleaned up");
        }
        state.phase = PoolPhase::Retired;
        self.released.notify_all();
    }

    pub fn status(&self) -> Result<PoolStatus, PoolError> {
        let state = self.state()?;
        let in_use = state.slots.iter().filter(|slot| slot.in_use).count();
        Ok(PoolStatus {
            phase: state.phase,
            size: state.slots.len(),
            available: state.slots.len() - in_use,
            in_use,
        })
    }

    /// Number of pooled connections, in use or not.
    pub fn len(&self) -> usize {
        self.state().map(|state| state.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_initialized(&self) -> bool {
        self.state()
            .map(|state| state.phase == PoolPhase::Ready)
            .unwrap_or(false)
    }

    fn open_slot(&self, in_use: bool) -> Option<Slot<B>> {
        let mut conn = Connection::new(Arc::clone(&self.backend));
        conn.open()?;
        Some(Slot {
            id: ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            conn: Arc::new(Mutex::new(conn)),
            in_use,
        })
    }

    fn try_checkout(&self, state: &mut PoolState<B>) -> Option<PooledConnection<B>> {
        evict_unhealthy(&mut state.slots);

        if let Some(slot) = state.slots.iter_mut().find(|slot| !slot.in_use) {
            slot.in_use = true;
            tracing::debug!(id = ?slot.id, "connection checked out");
            return Some(PooledConnection::from_slot(slot));
        }

        if self.config.is_bounded() && state.slots.len() >= self.config.max_size {
            tracing::debug!(max_size = self.config.max_size, "pool exhausted");
            return None;
        }

        let slot = self.open_slot(true)?;
        let conn = PooledConnection::from_slot(&slot);
        tracing::debug!(id = ?slot.id, size = state.slots.len() + 1, "pool grew");
        state.slots.push(slot);
        Some(conn)
    }
}

/// Close and drop available connections that fail their health check.
fn evict_unhealthy<B: Backend>(slots: &mut Vec<Slot<B>>) {
    slots.retain(|slot| {
        if slot.in_use {
            return true;
        }
        let healthy = match slot.conn.try_lock() {
            Ok(mut conn) => {
                let healthy = conn.is_healthy();
                if !healthy {
                    conn.close();
                }
                healthy
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().close();
                false
            }
            Err(TryLockError::WouldBlock) => true,
        };
        if !healthy {
            tracing::warn!(id = ?slot.id, "evicted unhealthy connection");
        }
        healthy
    });
}

impl<B: Backend> Drop for ConnectionPool<B> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl<B: Backend> fmt::Debug for ConnectionPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("status", &self.status().ok())
            .finish()
    }
}

/// A connection on loan from a [`ConnectionPool`].
///
/// Hand it back with [`ConnectionPool::release_connection`]. Releasing takes
/// it by value, so the same loan cannot be returned twice.
///
/// Dropping it without releasing leaks the slot: the pool keeps it marked
/// in use until [`cleanup`](ConnectionPool::cleanup), and a leak is logged.
/// Use [`ConnectionPool::checkout`] to have the return done on drop.
pub struct PooledConnection<B: Backend> {
    id: ConnectionId,
    conn: Shared<B>,
    returned: bool,
}

impl<B: Backend> PooledConnection<B> {
    fn from_slot(slot: &Slot<B>) -> Self {
        PooledConnection {
            id: slot.id,
            conn: Arc::clone(&slot.conn),
            returned: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with<R>(&self, f: impl FnOnce(&mut Connection<B>) -> R) -> Result<R, PoolError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| PoolError::Poisoned("pooled connection"))?;
        Ok(f(&mut *conn))
    }
}

impl<B: Backend> Drop for PooledConnection<B> {
    fn drop(&mut self) {
        if !self.returned {
            tracing::warn!(id = ?self.id, "pooled connection dropped without release, slot stays in use");
        }
    }
}

impl<B: Backend> fmt::Debug for PooledConnection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .finish()
    }
}

/// A [`PooledConnection`] that releases itself when dropped.
pub struct ScopedConnection<'a, B: Backend> {
    pool: &'a ConnectionPool<B>,
    conn: Option<PooledConnection<B>>,
}

impl<B: Backend> Deref for ScopedConnection<'_, B> {
    type Target = PooledConnection<B>;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("scoped connection used after release"),
        }
    }
}

impl<B: Backend> Drop for ScopedConnection<'_, B> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(err) = self.pool.release_connection(conn) {
                tracing::error!(error = %err, "failed to release scoped connection");
            }
        }
    }
}

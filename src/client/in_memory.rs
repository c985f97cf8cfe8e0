//! In-process coordination service for tests and single-process deployments.
//!
//! [`InMemoryCoordinator`] plays the server: it keeps a contender queue per
//! lock path and owns the session table. Every [`InMemoryClient`] connected to
//! the same coordinator sees the same locks, so several clients stand in for
//! several processes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{
    validate_path, ClientError, CoordinationClient, LockKind, LockRecipe, SessionId,
    SessionListener, SessionListeners, SessionState, SubscriptionId,
};

/// Payload stored in each contender node.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContenderData {
    identifier: String,
    kind: LockKind,
    session: u64,
}

struct Contender {
    seq: u64,
    lock_id: u64,
    kind: LockKind,
    session: SessionId,
    ephemeral: bool,
    data: Vec<u8>,
}

#[derive(Default)]
struct ServerState {
    nodes: HashMap<String, Vec<Contender>>,
    next_seq: u64,
    /// Sessions that have not expired or closed.
    live: HashSet<SessionId>,
}

impl ServerState {
    /// A contender holds the lock once nobody queued ahead of it conflicts.
    fn is_granted(&self, path: &str, seq: u64) -> bool {
        let Some(queue) = self.nodes.get(path) else {
            return false;
        };
        let Some(position) = queue.iter().position(|c| c.seq == seq) else {
            return false;
        };
        let kind = queue[position].kind;
        queue[..position]
            .iter()
            .all(|ahead| kind.is_compatible_with(ahead.kind))
    }

    fn withdraw(&mut self, path: &str, lock_id: u64) -> bool {
        let Some(queue) = self.nodes.get_mut(path) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|c| c.lock_id != lock_id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.nodes.remove(path);
        }
        removed
    }
}

struct Server {
    state: Mutex<ServerState>,
    wake: Condvar,
    next_session: AtomicU64,
    next_lock: AtomicU64,
}

impl Server {
    fn state(&self) -> Result<MutexGuard<'_, ServerState>, ClientError> {
        self.state
            .lock()
            .map_err(|_| ClientError::Poisoned("coordinator state"))
    }

    fn open_session(&self) -> SessionId {
        let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .live
            .insert(session);
        session
    }

    /// Drop every ephemeral node owned by `session` and wake all waiters.
    fn expire(&self, session: SessionId) -> Result<usize, ClientError> {
        let mut state = self.state()?;
        let mut removed = 0;
        state.nodes.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|c| !(c.ephemeral && c.session == session));
            removed += before - queue.len();
            !queue.is_empty()
        });
        state.live.remove(&session);
        self.wake.notify_all();
        Ok(removed)
    }
}

/// The shared in-memory "server".
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use coordkit::client::InMemoryCoordinator;
/// use coordkit::lock::{LockKind, SessionAwareLock};
///
/// let coordinator = InMemoryCoordinator::new();
/// let client = Arc::new(coordinator.connect());
///
/// let lock = SessionAwareLock::new(client, "/zuul/locks/tenant/acme", LockKind::Exclusive).unwrap();
/// assert!(lock.acquire(true, None, true).unwrap());
/// assert!(lock.is_still_valid());
/// lock.release().unwrap();
/// ```
#[derive(Clone)]
pub struct InMemoryCoordinator {
    server: Arc<Server>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        InMemoryCoordinator {
            server: Arc::new(Server {
                state: Mutex::new(ServerState::default()),
                wake: Condvar::new(),
                next_session: AtomicU64::new(0),
                next_lock: AtomicU64::new(0),
            }),
        }
    }

    /// Open a new client with a fresh session.
    pub fn connect(&self) -> InMemoryClient {
        let session = self.server.open_session();
        tracing::debug!(%session, "in-memory client connected");
        InMemoryClient {
            shared: Arc::new(ClientShared {
                server: Arc::clone(&self.server),
                session: AtomicU64::new(session.0),
                state: Mutex::new(SessionState::Connected),
                closed: AtomicBool::new(false),
                listeners: SessionListeners::new(),
            }),
        }
    }

    /// Identifiers of all contenders on `path`, in queue order.
    pub fn contenders(&self, path: &str) -> Result<Vec<String>, ClientError> {
        let state = self.server.state()?;
        decode_contenders(&state, path)
    }

    /// Number of sessions still open against this coordinator.
    pub fn live_sessions(&self) -> usize {
        self.server.state().map(|state| state.live.len()).unwrap_or(0)
    }

    /// Number of live nodes (held or waiting) on `path`.
    pub fn node_count(&self, path: &str) -> usize {
        self.server
            .state()
            .map(|state| state.nodes.get(path).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_contenders(state: &ServerState, path: &str) -> Result<Vec<String>, ClientError> {
    state
        .nodes
        .get(path)
        .map(|queue| {
            queue
                .iter()
                .map(|c| {
                    serde_json::from_slice::<ContenderData>(&c.data)
                        .map(|data| data.identifier)
                        .map_err(ClientError::from)
                })
                .collect()
        })
        .unwrap_or_else(|| Ok(Vec::new()))
}

struct ClientShared {
    server: Arc<Server>,
    session: AtomicU64,
    state: Mutex<SessionState>,
    closed: AtomicBool,
    listeners: SessionListeners,
}

impl ClientShared {
    fn session(&self) -> SessionId {
        SessionId(self.session.load(Ordering::SeqCst))
    }

    fn session_state(&self) -> SessionState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(SessionState::Lost)
    }

    fn transition(&self, next: SessionState) -> Result<(), ClientError> {
        *self
            .state
            .lock()
            .map_err(|_| ClientError::Poisoned("client session state"))? = next;
        tracing::debug!(session = %self.session(), state = ?next, "session state changed");
        self.listeners.notify(next)
    }

    /// Operations need a live, connected session.
    fn ensure_connected(&self) -> Result<SessionId, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionLoss);
        }
        match self.session_state() {
            SessionState::Connected => Ok(self.session()),
            SessionState::Suspended | SessionState::Lost => Err(ClientError::ConnectionLoss),
        }
    }
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        // The last handle is gone, so nobody can renew the session.
        if let Err(err) = self.server.expire(self.session()) {
            tracing::warn!(session = %self.session(), error = %err, "failed to end dropped session");
        }
    }
}

/// One client session against an [`InMemoryCoordinator`].
///
/// Besides the [`CoordinationClient`] contract it exposes the session
/// transitions a real network client goes through, so callers can exercise
/// suspension and expiry deterministically. Dropping the client and every lock
/// created from it ends the session like [`close`](Self::close).
pub struct InMemoryClient {
    shared: Arc<ClientShared>,
}

impl InMemoryClient {
    /// Simulate a connection blip. The session stays alive server-side.
    pub fn suspend(&self) -> Result<(), ClientError> {
        self.shared.transition(SessionState::Suspended)
    }

    /// Recover from [`suspend`](Self::suspend) with the same session.
    pub fn resume(&self) -> Result<(), ClientError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionLoss);
        }
        self.shared.transition(SessionState::Connected)
    }

    /// Expire the current session, then reconnect with a new one.
    ///
    /// Server-side, every ephemeral node of the old session disappears and
    /// blocked acquirers of that session fail. Listeners observe `Lost`
    /// followed by `Connected`.
    pub fn expire_session(&self) -> Result<SessionId, ClientError> {
        let old = self.shared.session();
        let removed = self.shared.server.expire(old)?;
        tracing::debug!(session = %old, removed, "session expired");
        self.shared.transition(SessionState::Lost)?;

        let fresh = self.shared.server.open_session();
        self.shared.session.store(fresh.0, Ordering::SeqCst);
        self.shared.transition(SessionState::Connected)?;
        Ok(fresh)
    }

    /// End the session for good. Later operations fail with `ConnectionLoss`.
    pub fn close(&self) -> Result<(), ClientError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.server.expire(self.shared.session())?;
        self.shared.transition(SessionState::Lost)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of registered session listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }
}

impl CoordinationClient for InMemoryClient {
    type Lock = InMemoryLock;

    fn lock(
        &self,
        path: &str,
        kind: LockKind,
        identifier: Option<&str>,
    ) -> Result<InMemoryLock, ClientError> {
        validate_path(path)?;
        Ok(InMemoryLock {
            client: Arc::clone(&self.shared),
            path: path.to_string(),
            kind,
            identifier: identifier.unwrap_or_default().to_string(),
            lock_id: self.shared.server.next_lock.fetch_add(1, Ordering::Relaxed),
            held: Mutex::new(None),
        })
    }

    fn subscribe(&self, listener: SessionListener) -> Result<SubscriptionId, ClientError> {
        self.shared.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, ClientError> {
        self.shared.listeners.unsubscribe(id)
    }

    fn session_id(&self) -> SessionId {
        self.shared.session()
    }

    fn session_state(&self) -> SessionState {
        self.shared.session_state()
    }
}

/// Lock recipe backed by the coordinator's contender queue.
pub struct InMemoryLock {
    client: Arc<ClientShared>,
    path: String,
    kind: LockKind,
    identifier: String,
    lock_id: u64,
    held: Mutex<Option<u64>>,
}

impl InMemoryLock {
    fn held(&self) -> Result<MutexGuard<'_, Option<u64>>, ClientError> {
        self.held
            .lock()
            .map_err(|_| ClientError::Poisoned("lock holder state"))
    }
}

impl LockRecipe for InMemoryLock {
    fn acquire(
        &self,
        blocking: bool,
        timeout: Option<Duration>,
        ephemeral: bool,
    ) -> Result<bool, ClientError> {
        let session = self.client.ensure_connected()?;
        let server = &self.client.server;
        let previous = *self.held()?;
        let mut state = server.state()?;

        // Still holding from an earlier acquire: only valid if the node survived.
        if let Some(seq) = previous {
            if state.is_granted(&self.path, seq) {
                return Ok(true);
            }
        }

        let data = serde_json::to_vec(&ContenderData {
            identifier: self.identifier.clone(),
            kind: self.kind,
            session: session.0,
        })?;
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .nodes
            .entry(self.path.clone())
            .or_default()
            .push(Contender {
                seq,
                lock_id: self.lock_id,
                kind: self.kind,
                session,
                ephemeral,
                data,
            });

        // A timeout too large to represent waits forever.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let acquired = loop {
            if self.client.closed.load(Ordering::SeqCst) {
                state.withdraw(&self.path, self.lock_id);
                server.wake.notify_all();
                return Err(ClientError::ConnectionLoss);
            }
            if !state.live.contains(&session) {
                state.withdraw(&self.path, self.lock_id);
                server.wake.notify_all();
                return Err(ClientError::SessionExpired);
            }
            if state.is_granted(&self.path, seq) {
                break true;
            }
            if !blocking {
                break false;
            }

            state = match deadline {
                None => server
                    .wake
                    .wait(state)
                    .map_err(|_| ClientError::Poisoned("coordinator state"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    server
                        .wake
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| ClientError::Poisoned("coordinator state"))?
                        .0
                }
            };
        };

        if !acquired {
            state.withdraw(&self.path, self.lock_id);
            server.wake.notify_all();
            return Ok(false);
        }
        drop(state);
        *self.held()? = Some(seq);
        Ok(true)
    }

    fn release(&self) -> Result<bool, ClientError> {
        if self.held()?.is_none() {
            return Ok(false);
        }
        self.client.ensure_connected()?;
        if self.held()?.take().is_none() {
            return Ok(false);
        }

        let server = &self.client.server;
        let mut state = server.state()?;
        // The node may already be gone if the session expired; that still
        // counts as released.
        state.withdraw(&self.path, self.lock_id);
        server.wake.notify_all();
        Ok(true)
    }

    fn is_acquired(&self) -> bool {
        self.held.lock().map(|held| held.is_some()).unwrap_or(false)
    }

    fn contenders(&self) -> Result<Vec<String>, ClientError> {
        self.client.ensure_connected()?;
        let state = self.client.server.state()?;
        decode_contenders(&state, &self.path)
    }

    fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_try_acquire_fails_while_held() {
        let coordinator = InMemoryCoordinator::new();
        let a = coordinator.connect();
        let b = coordinator.connect();
        let first = a.lock("/locks/x", LockKind::Exclusive, Some("a")).unwrap();
        let second = b.lock("/locks/x", LockKind::Exclusive, Some("b")).unwrap();

        assert!(first.acquire(false, None, true).unwrap());
        assert!(!second.acquire(false, None, true).unwrap());
        assert_eq!(coordinator.node_count("/locks/x"), 1);

        assert!(first.release().unwrap());
        assert!(second.acquire(false, None, true).unwrap());
    }

    #[test]
    fn readers_share_and_writer_waits() {
        let coordinator = InMemoryCoordinator::new();
        let client = coordinator.connect();
        let r1 = client.lock("/locks/t", LockKind::Read, None).unwrap();
        let r2 = client.lock("/locks/t", LockKind::Read, None).unwrap();
        let w = client.lock("/locks/t", LockKind::Write, None).unwrap();

        assert!(r1.acquire(false, None, true).unwrap());
        assert!(r2.acquire(false, None, true).unwrap());
        assert!(!w.acquire(false, None, true).unwrap());

        r1.release().unwrap();
        r2.release().unwrap();
        assert!(w.acquire(false, None, true).unwrap());
    }

    #[test]
    fn timeout_returns_false_and_withdraws() {
        let coordinator = InMemoryCoordinator::new();
        let client = coordinator.connect();
        let holder = client.lock("/locks/t", LockKind::Exclusive, None).unwrap();
        let waiter = client.lock("/locks/t", LockKind::Exclusive, None).unwrap();

        holder.acquire(true, None, true).unwrap();
        let acquired = waiter
            .acquire(true, Some(Duration::from_millis(20)), true)
            .unwrap();

        assert!(!acquired);
        assert_eq!(coordinator.node_count("/locks/t"), 1);
    }

    #[test]
    fn release_when_not_held_is_false() {
        let coordinator = InMemoryCoordinator::new();
        let client = coordinator.connect();
        let lock = client.lock("/locks/t", LockKind::Exclusive, None).unwrap();
        assert!(!lock.release().unwrap());
    }

    #[test]
    fn expiry_drops_ephemeral_nodes_only() {
        let coordinator = InMemoryCoordinator::new();
        let client = coordinator.connect();
        let ephemeral = client.lock("/locks/e", LockKind::Exclusive, None).unwrap();
        let durable = client.lock("/locks/d", LockKind::Exclusive, None).unwrap();
        ephemeral.acquire(true, None, true).unwrap();
        durable.acquire(true, None, false).unwrap();

        let old = client.session_id();
        let fresh = client.expire_session().unwrap();

        assert_ne!(old, fresh);
        assert_eq!(coordinator.node_count("/locks/e"), 0);
        assert_eq!(coordinator.node_count("/locks/d"), 1);
        // Local state is stale until released.
        assert!(ephemeral.is_acquired());
        assert!(ephemeral.release().unwrap());
    }

    #[test]
    fn contenders_report_identifiers_in_queue_order() {
        let coordinator = InMemoryCoordinator::new();
        let client = coordinator.connect();
        let a = client.lock("/locks/r", LockKind::Read, Some("alpha")).unwrap();
        let b = client.lock("/locks/r", LockKind::Read, Some("beta")).unwrap();
        a.acquire(true, None, true).unwrap();
        b.acquire(true, None, true).unwrap();

        assert_eq!(a.contenders().unwrap(), vec!["alpha", "beta"]);
        assert_eq!(
            coordinator.contenders("/locks/r").unwrap(),
            vec!["alpha", "beta"]
        );
    }

    #[test]
    fn operations_fail_while_suspended_or_closed() {
        let coordinator = InMemoryCoordinator::new();
        let client = coordinator.connect();
        let lock = client.lock("/locks/s", LockKind::Exclusive, None).unwrap();

        client.suspend().unwrap();
        assert_eq!(
            lock.acquire(false, None, true),
            Err(ClientError::ConnectionLoss)
        );
        client.resume().unwrap();
        assert!(lock.acquire(false, None, true).unwrap());

        client.close().unwrap();
        assert_eq!(lock.release(), Err(ClientError::ConnectionLoss));
        assert_eq!(coordinator.node_count("/locks/s"), 0);
    }

    #[test]
    fn unrepresentable_timeout_never_panics() {
        let coordinator = InMemoryCoordinator::new();
        let client = coordinator.connect();
        let holder = client.lock("/locks/m", LockKind::Exclusive, None).unwrap();
        let waiter = client.lock("/locks/m", LockKind::Exclusive, None).unwrap();

        assert!(holder.acquire(true, Some(Duration::MAX), true).unwrap());
        assert!(!waiter.acquire(false, Some(Duration::MAX), true).unwrap());
        assert_eq!(coordinator.node_count("/locks/m"), 1);
    }

    #[test]
    fn unrepresentable_timeout_waits_until_granted() {
        let coordinator = InMemoryCoordinator::new();
        let client = coordinator.connect();
        let holder = client.lock("/locks/w", LockKind::Exclusive, None).unwrap();
        holder.acquire(true, None, true).unwrap();

        let other = coordinator.connect();
        let waiter = std::thread::spawn(move || {
            let lock = other.lock("/locks/w", LockKind::Exclusive, None).unwrap();
            lock.acquire(true, Some(Duration::MAX), true).unwrap()
        });

        while coordinator.node_count("/locks/w") < 2 {
            std::thread::yield_now();
        }
        holder.release().unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn session_table_holds_only_open_sessions() {
        let coordinator = InMemoryCoordinator::new();
        let churning = coordinator.connect();
        let closing = coordinator.connect();
        let dropped = coordinator.connect();
        assert_eq!(coordinator.live_sessions(), 3);

        for _ in 0..10 {
            churning.expire_session().unwrap();
        }
        assert_eq!(coordinator.live_sessions(), 3);

        closing.close().unwrap();
        assert_eq!(coordinator.live_sessions(), 2);

        drop(dropped);
        assert_eq!(coordinator.live_sessions(), 1);
    }

    #[test]
    fn dropping_a_client_ends_its_session() {
        let coordinator = InMemoryCoordinator::new();
        let client = coordinator.connect();
        let lock = client.lock("/locks/gone", LockKind::Exclusive, None).unwrap();
        lock.acquire(true, None, true).unwrap();

        drop(client);
        assert_eq!(coordinator.node_count("/locks/gone"), 1);
        drop(lock);
        assert_eq!(coordinator.node_count("/locks/gone"), 0);
        assert_eq!(coordinator.live_sessions(), 0);
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let coordinator = InMemoryCoordinator::new();
        let client = coordinator.connect();
        assert!(matches!(
            client.lock("no-slash", LockKind::Read, None),
            Err(ClientError::InvalidPath(_))
        ));
    }
}

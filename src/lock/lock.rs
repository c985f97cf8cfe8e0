use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::LockError;
use crate::client::{
    ClientError, CoordinationClient, ListenerAction, LockKind, LockRecipe, SessionId,
    SessionState, SubscriptionId,
};

/// A coordination-service lock that knows when its session died.
///
/// Losing the session makes the service delete every ephemeral node the
/// session owned, lock nodes included. The recipe underneath keeps reporting
/// the lock as held because nothing told it otherwise. This wrapper watches
/// the client's session and remembers the loss, so holders can ask
/// [`is_still_valid`](Self::is_still_valid) before trusting the lock.
///
/// The expired flag only goes `false -> true` from the session listener. Only
/// the next successful [`acquire`](Self::acquire) resets it.
pub struct SessionAwareLock<C: CoordinationClient> {
    client: Arc<C>,
    recipe: C::Lock,
    kind: LockKind,
    identifier: Option<String>,
    ephemeral: AtomicBool,
    session_expired: Arc<AtomicBool>,
    watch: Mutex<Option<SubscriptionId>>,
}

impl<C: CoordinationClient> SessionAwareLock<C> {
    pub fn new(client: Arc<C>, path: &str, kind: LockKind) -> Result<Self, LockError> {
        Self::build(client, path, kind, None)
    }

    /// Like [`new`](Self::new), labelling this contender for diagnostics.
    pub fn with_identifier(
        client: Arc<C>,
        path: &str,
        kind: LockKind,
        identifier: impl Into<String>,
    ) -> Result<Self, LockError> {
        Self::build(client, path, kind, Some(identifier.into()))
    }

    pub fn exclusive(client: Arc<C>, path: &str) -> Result<Self, LockError> {
        Self::new(client, path, LockKind::Exclusive)
    }

    pub fn read(client: Arc<C>, path: &str) -> Result<Self, LockError> {
        Self::new(client, path, LockKind::Read)
    }

    pub fn write(client: Arc<C>, path: &str) -> Result<Self, LockError> {
        Self::new(client, path, LockKind::Write)
    }

    fn build(
        client: Arc<C>,
        path: &str,
        kind: LockKind,
        identifier: Option<String>,
    ) -> Result<Self, LockError> {
        let recipe = client.lock(path, kind, identifier.as_deref())?;
        Ok(SessionAwareLock {
            client,
            recipe,
            kind,
            identifier,
            ephemeral: AtomicBool::new(false),
            session_expired: Arc::new(AtomicBool::new(false)),
            watch: Mutex::new(None),
        })
    }

    /// Acquire the lock.
    ///
    /// Returns `Ok(false)` when `blocking` is false and the lock is taken, or
    /// when `timeout` runs out. Client failures propagate unchanged.
    /// A successful ephemeral acquire starts watching the session.
    pub fn acquire(
        &self,
        blocking: bool,
        timeout: Option<Duration>,
        ephemeral: bool,
    ) -> Result<bool, LockError> {
        let started = self.client.session_id();
        if !self.recipe.acquire(blocking, timeout, ephemeral)? {
            tracing::debug!(path = self.path(), kind = %self.kind, "lock not acquired");
            return Ok(false);
        }

        self.session_expired.store(false, Ordering::SeqCst);
        self.ephemeral.store(ephemeral, Ordering::SeqCst);
        if ephemeral {
            self.watch_session(started)?;
        }
        tracing::debug!(path = self.path(), kind = %self.kind, ephemeral, "lock acquired");
        Ok(true)
    }

    /// Stop watching the session, then release the recipe.
    ///
    /// Safe to call when not held and safe to call twice.
    pub fn release(&self) -> Result<(), LockError> {
        self.unwatch_session()?;
        if self.recipe.release()? {
            tracing::debug!(path = self.path(), kind = %self.kind, "lock released");
        }
        Ok(())
    }

    /// Whether the lock can still be trusted.
    ///
    /// Always `true` for a non-ephemeral acquisition. For an ephemeral one,
    /// `false` once the session was lost, regardless of what the recipe
    /// believes. Poll this across long critical sections.
    pub fn is_still_valid(&self) -> bool {
        if !self.ephemeral.load(Ordering::SeqCst) {
            return true;
        }
        !self.session_expired.load(Ordering::SeqCst)
    }

    /// The recipe's local view. Can be stale after a session loss.
    pub fn is_acquired(&self) -> bool {
        self.recipe.is_acquired()
    }

    /// Identifiers of every contender on this lock's path.
    pub fn contenders(&self) -> Result<Vec<String>, LockError> {
        Ok(self.recipe.contenders()?)
    }

    pub fn path(&self) -> &str {
        self.recipe.path()
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    fn watch(&self) -> Result<MutexGuard<'_, Option<SubscriptionId>>, ClientError> {
        self.watch
            .lock()
            .map_err(|_| ClientError::Poisoned("session watch"))
    }

    fn watch_session(&self, started: SessionId) -> Result<(), ClientError> {
        let mut watch = self.watch()?;
        // A listener left over from an earlier cycle may already have fired
        // and deregistered itself; start fresh either way.
        if let Some(previous) = watch.take() {
            self.client.unsubscribe(previous)?;
        }

        let expired = Arc::clone(&self.session_expired);
        let id = self.client.subscribe(Arc::new(move |state| {
            if state == SessionState::Lost {
                expired.store(true, Ordering::SeqCst);
                ListenerAction::Remove
            } else {
                ListenerAction::Keep
            }
        }))?;
        *watch = Some(id);

        // The session may have been lost, or already replaced, before the
        // listener existed.
        if self.client.session_id() != started
            || self.client.session_state() == SessionState::Lost
        {
            self.session_expired.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn unwatch_session(&self) -> Result<(), ClientError> {
        if let Some(id) = self.watch()?.take() {
            self.client.unsubscribe(id)?;
        }
        Ok(())
    }
}

impl<C: CoordinationClient> Drop for SessionAwareLock<C> {
    fn drop(&mut self) {
        if let Err(err) = self.unwatch_session() {
            tracing::warn!(path = self.path(), error = %err, "failed to remove session watch");
        }
    }
}

impl<C: CoordinationClient> fmt::Debug for SessionAwareLock<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAwareLock")
            .field("path", &self.path())
            .field("kind", &self.kind)
            .field("identifier", &self.identifier)
            .field("acquired", &self.is_acquired())
            .field("valid", &self.is_still_valid())
            .finish()
    }
}

impl<C: CoordinationClient> fmt::Display for SessionAwareLock<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} lock {}>", self.kind, self.path())
    }
}

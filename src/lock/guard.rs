use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use super::{LockError, SessionAwareLock};
use crate::client::CoordinationClient;

/// How a scoped acquisition waits for its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Wait for the lock instead of failing immediately.
    pub blocking: bool,
    /// Upper bound on the wait. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Tie the lock node to the client session.
    pub ephemeral: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            blocking: true,
            timeout: None,
            ephemeral: true,
        }
    }
}

impl LockOptions {
    /// Fail immediately if the lock is taken.
    pub fn non_blocking() -> Self {
        Self {
            blocking: false,
            ..Self::default()
        }
    }

    /// Block for at most `timeout`.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

/// A held lock, released when dropped.
///
/// Dereferences to the [`SessionAwareLock`], so holders can keep checking
/// [`is_still_valid`](SessionAwareLock::is_still_valid) inside the critical
/// section.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<C: CoordinationClient> {
    lock: Option<SessionAwareLock<C>>,
}

impl<C: CoordinationClient> LockGuard<C> {
    /// Release now and report failures instead of only logging them.
    pub fn release(mut self) -> Result<(), LockError> {
        match self.lock.take() {
            Some(lock) => lock.release(),
            None => Ok(()),
        }
    }
}

impl<C: CoordinationClient> fmt::Debug for LockGuard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("lock", &self.lock).finish()
    }
}

impl<C: CoordinationClient> Deref for LockGuard<C> {
    type Target = SessionAwareLock<C>;

    fn deref(&self) -> &Self::Target {
        // Only `release(self)` and `drop` take the lock out.
        match &self.lock {
            Some(lock) => lock,
            None => unreachable!("lock guard used after release"),
        }
    }
}

impl<C: CoordinationClient> Drop for LockGuard<C> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            if let Err(err) = lock.release() {
                tracing::error!(lock = %lock, error = %err, "failed to release lock");
            }
        }
    }
}

/// Acquire `lock` according to `options` and hold it for the guard's lifetime.
///
/// Fails with [`LockError::AcquireFailed`] when the lock was not obtained;
/// client errors propagate. No retry is attempted.
///
/// ```
/// use std::sync::Arc;
/// use coordkit::client::InMemoryCoordinator;
/// use coordkit::lock::{locked, LockKind, LockOptions, SessionAwareLock};
///
/// let client = Arc::new(InMemoryCoordinator::new().connect());
/// let lock = SessionAwareLock::new(client, "/zuul/locks/demo", LockKind::Exclusive).unwrap();
///
/// let guard = locked(lock, LockOptions::non_blocking()).unwrap();
/// assert!(guard.is_still_valid());
/// ```
pub fn locked<C: CoordinationClient>(
    lock: SessionAwareLock<C>,
    options: LockOptions,
) -> Result<LockGuard<C>, LockError> {
    if !lock.acquire(options.blocking, options.timeout, options.ephemeral)? {
        return Err(LockError::AcquireFailed {
            path: lock.path().to_string(),
        });
    }
    Ok(LockGuard { lock: Some(lock) })
}

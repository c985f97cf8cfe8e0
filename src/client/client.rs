use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ClientError, SessionId, SessionListener, SessionState, SubscriptionId};

/// Lock recipe variant.
///
/// `Read` contenders share the lock with each other. `Exclusive` and `Write`
/// contenders exclude everyone else on the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Exclusive,
    Read,
    Write,
}

impl LockKind {
    /// Whether a holder of `self` can coexist with a holder of `other`.
    pub fn is_compatible_with(self, other: LockKind) -> bool {
        matches!((self, other), (LockKind::Read, LockKind::Read))
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Exclusive => f.write_str("exclusive"),
            LockKind::Read => f.write_str("read"),
            LockKind::Write => f.write_str("write"),
        }
    }
}

/// Trait for a single lock recipe instance bound to one path.
///
/// This is the service-side primitive: it knows nothing about sessions
/// beyond what the service enforces. Implementations are expected to be
/// backed by sequential ephemeral nodes or an equivalent server-side queue.
pub trait LockRecipe: Send + Sync {
    /// Try to acquire the lock.
    ///
    /// Returns `Ok(false)` if `blocking` is false and the lock is taken, or if
    /// `timeout` elapsed first. `timeout = None` waits forever when blocking.
    /// Transport and session failures are errors.
    fn acquire(
        &self,
        blocking: bool,
        timeout: Option<Duration>,
        ephemeral: bool,
    ) -> Result<bool, ClientError>;

    /// Release the lock. Returns `Ok(false)` if it was not held.
    fn release(&self) -> Result<bool, ClientError>;

    /// Whether this instance believes it holds the lock.
    fn is_acquired(&self) -> bool;

    /// Identifiers of every contender on the path, holders first, in queue order.
    fn contenders(&self) -> Result<Vec<String>, ClientError>;

    fn path(&self) -> &str;
}

/// Client handle to a hierarchical coordination service.
///
/// One client owns one session at a time. Locks created through it are tied
/// to that session when acquired ephemerally.
pub trait CoordinationClient: Send + Sync {
    /// The concrete lock recipe type returned by this client.
    type Lock: LockRecipe;

    /// Create a lock recipe for `path`. Nothing is sent to the service until
    /// the lock is acquired.
    fn lock(
        &self,
        path: &str,
        kind: LockKind,
        identifier: Option<&str>,
    ) -> Result<Self::Lock, ClientError>;

    /// Register a session state listener.
    fn subscribe(&self, listener: SessionListener) -> Result<SubscriptionId, ClientError>;

    /// Remove a session state listener. Returns `Ok(false)` if it was already gone.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, ClientError>;

    /// Id of the current session.
    fn session_id(&self) -> SessionId;

    fn session_state(&self) -> SessionState;
}

/// Reject anything that is not an absolute path with non-empty segments.
pub fn validate_path(path: &str) -> Result<(), ClientError> {
    let valid = path
        .strip_prefix('/')
        .map(|rest| !rest.is_empty() && rest.split('/').all(|segment| !segment.is_empty()))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ClientError::InvalidPath(path.to_string()))
    }
}

use thiserror::Error;

use crate::client::ClientError;

/// Error type for lock operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock was not available (non-blocking attempt, or timeout).
    #[error("failed to acquire lock {path}")]
    AcquireFailed { path: String },
    /// The coordination service failed underneath the lock.
    #[error(transparent)]
    Client(#[from] ClientError),
}

use thiserror::Error;

/// Error type for pool operations.
///
/// Exhaustion and unhealthy connections are not errors: they surface as
/// `None` from the checkout methods.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool's internal lock was poisoned (a thread panicked while holding it).
    #[error("pool state poisoned: {0}")]
    Poisoned(&'static str),
    /// The pool configuration is inconsistent.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Failure reported by a [`Backend`](super::Backend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The resource could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Credentials or permissions were rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("backend error: {0}")]
    Other(String),
}

use thiserror::Error;

/// Error type for coordination-service client operations.
///
/// These are transport and session failures. A lock that is simply not
/// available is never an error; see [`LockRecipe::acquire`](super::LockRecipe::acquire).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The client is not connected to the service (closed or partitioned).
    #[error("connection to coordination service lost")]
    ConnectionLoss,
    /// The session expired while the operation was in flight.
    #[error("session expired")]
    SessionExpired,
    /// The node the operation refers to does not exist.
    #[error("no node at {0}")]
    NoNode(String),
    /// The path is not a valid absolute node path.
    #[error("invalid node path {0:?}")]
    InvalidPath(String),
    /// An internal lock was poisoned (a thread panicked while holding it).
    #[error("client state poisoned: {0}")]
    Poisoned(&'static str),
    /// A node payload could not be encoded or decoded.
    #[error("node payload serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

//! Connection pooling.
//!
//! A [`Backend`] opens, pings and closes handles. [`Connection`] wraps one
//! handle with an open/closed state machine and transparent reconnects.
//! [`ConnectionPool`] keeps a bounded set of connections and lends them out
//! one borrower at a time.

mod backend;
mod config;
mod connection;
mod error;
mod pool;

pub use backend::Backend;
pub use config::PoolConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{BackendError, PoolError};
pub use pool::{
    ConnectionId, ConnectionPool, PoolPhase, PoolStatus, PooledConnection, ScopedConnection,
};

//! Coordination primitives.
//!
//! - [`lock`]: locks over a hierarchical coordination service that notice
//!   when the client session behind them was lost.
//! - [`pool`]: a bounded, health-checked pool of reusable connections.
//! - [`client`]: the coordination-service contract the locks are built on,
//!   plus an in-process implementation.
//!
//! The two halves are independent of each other.

pub mod client;
pub mod config;
pub mod lock;
pub mod pool;

pub use client::{ClientError, CoordinationClient, InMemoryClient, InMemoryCoordinator};
pub use config::{Config, ConfigError, LockConfig};
pub use lock::{locked, LockError, LockGuard, LockKind, LockOptions, SessionAwareLock};
pub use pool::{
    Backend, BackendError, Connection, ConnectionPool, PoolConfig, PoolError, PooledConnection,
};

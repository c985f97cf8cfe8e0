//! Coordination-service client contract.
//!
//! The lock layer talks to the service only through [`CoordinationClient`]
//! and [`LockRecipe`]. Network clients implement these traits outside this
//! crate; [`InMemoryCoordinator`] is the in-process implementation used for
//! tests and single-process deployments.
//!
//! ```text
//! ┌────────────────────────┐      subscribe / unsubscribe
//! │   CoordinationClient   │◄──────────────────────────────┐
//! │  lock(path, kind, id)  │                               │
//! └───────────┬────────────┘                     ┌─────────┴─────────┐
//!             │ creates                          │  SessionAwareLock  │
//!             ▼                                  └───────────────────┘
//! ┌────────────────────────┐
//! │       LockRecipe       │  acquire / release / contenders
//! └────────────────────────┘
//! ```

mod client;
mod error;
mod in_memory;
mod session;

pub use client::{validate_path, CoordinationClient, LockKind, LockRecipe};
pub use error::ClientError;
pub use in_memory::{InMemoryClient, InMemoryCoordinator, InMemoryLock};
pub use session::{
    ListenerAction, SessionId, SessionListener, SessionListeners, SessionState, SubscriptionId,
};

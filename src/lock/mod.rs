//! Session-aware locks.
//!
//! [`SessionAwareLock`] wraps a [`LockRecipe`](crate::client::LockRecipe) and
//! tracks whether the client session survived since the lock was taken.
//! [`locked`] turns a lock into a scoped [`LockGuard`], and the helpers in
//! [`named`] build guards for the well-known lock paths.

mod error;
mod guard;
mod lock;
pub mod named;

pub use crate::client::LockKind;
pub use error::LockError;
pub use guard::{locked, LockGuard, LockOptions};
pub use lock::SessionAwareLock;
pub use named::{
    management_queue_lock, pipeline_lock, tenant_read_lock, tenant_write_lock,
    trigger_queue_lock,
};

//! Named locks over well-known paths.
//!
//! Other tools share these paths on the same service, so the layout is fixed:
//!
//! ```text
//! /zuul/locks/tenant/<tenant>
//! /zuul/locks/pipeline/<tenant>/<pipeline>
//! /zuul/locks/events/management/<tenant>
//! /zuul/locks/events/trigger/<tenant>
//! ```
//!
//! Every variable segment is form-encoded (alphanumerics and `_.-~` kept,
//! space as `+`, everything else `%XX`), so a name containing `/` stays inside
//! its own segment.

use std::sync::Arc;

use super::{locked, LockError, LockGuard, LockOptions, SessionAwareLock};
use crate::client::{CoordinationClient, LockKind};

pub const LOCK_ROOT: &str = "/zuul/locks";
pub const TENANT_LOCK_ROOT: &str = "/zuul/locks/tenant";
pub const PIPELINE_LOCK_ROOT: &str = "/zuul/locks/pipeline";
pub const MANAGEMENT_QUEUE_LOCK_ROOT: &str = "/zuul/locks/events/management";
pub const TRIGGER_QUEUE_LOCK_ROOT: &str = "/zuul/locks/events/trigger";

/// Encode one path segment.
pub fn quote_segment(name: &str) -> String {
    // `%20` can only come from a space: a literal `%` is encoded as `%25`.
    urlencoding::encode(name).replace("%20", "+")
}

pub fn tenant_lock_path(tenant: &str) -> String {
    format!("{TENANT_LOCK_ROOT}/{}", quote_segment(tenant))
}

pub fn pipeline_lock_path(tenant: &str, pipeline: &str) -> String {
    format!(
        "{PIPELINE_LOCK_ROOT}/{}/{}",
        quote_segment(tenant),
        quote_segment(pipeline)
    )
}

pub fn management_queue_lock_path(tenant: &str) -> String {
    format!("{MANAGEMENT_QUEUE_LOCK_ROOT}/{}", quote_segment(tenant))
}

pub fn trigger_queue_lock_path(tenant: &str) -> String {
    format!("{TRIGGER_QUEUE_LOCK_ROOT}/{}", quote_segment(tenant))
}

fn named_lock<C: CoordinationClient>(
    client: &Arc<C>,
    path: String,
    kind: LockKind,
    options: LockOptions,
) -> Result<LockGuard<C>, LockError> {
    tracing::debug!(%path, %kind, blocking = options.blocking, "acquiring named lock");
    let lock = SessionAwareLock::new(Arc::clone(client), &path, kind)?;
    locked(lock, options)
}

/// Shared lock on a tenant's layout.
pub fn tenant_read_lock<C: CoordinationClient>(
    client: &Arc<C>,
    tenant: &str,
    options: LockOptions,
) -> Result<LockGuard<C>, LockError> {
    named_lock(client, tenant_lock_path(tenant), LockKind::Read, options)
}

/// Exclusive lock on a tenant's layout. Excludes every tenant reader.
pub fn tenant_write_lock<C: CoordinationClient>(
    client: &Arc<C>,
    tenant: &str,
    options: LockOptions,
) -> Result<LockGuard<C>, LockError> {
    named_lock(client, tenant_lock_path(tenant), LockKind::Write, options)
}

pub fn pipeline_lock<C: CoordinationClient>(
    client: &Arc<C>,
    tenant: &str,
    pipeline: &str,
    options: LockOptions,
) -> Result<LockGuard<C>, LockError> {
    named_lock(
        client,
        pipeline_lock_path(tenant, pipeline),
        LockKind::Exclusive,
        options,
    )
}

pub fn management_queue_lock<C: CoordinationClient>(
    client: &Arc<C>,
    tenant: &str,
    options: LockOptions,
) -> Result<LockGuard<C>, LockError> {
    named_lock(
        client,
        management_queue_lock_path(tenant),
        LockKind::Exclusive,
        options,
    )
}

pub fn trigger_queue_lock<C: CoordinationClient>(
    client: &Arc<C>,
    tenant: &str,
    options: LockOptions,
) -> Result<LockGuard<C>, LockError> {
    named_lock(
        client,
        trigger_queue_lock_path(tenant),
        LockKind::Exclusive,
        options,
    )
}

mod support;

use std::sync::Arc;

use coordkit::client::InMemoryCoordinator;
use coordkit::lock::named::{
    management_queue_lock_path, pipeline_lock_path, tenant_lock_path, trigger_queue_lock_path,
};
use coordkit::lock::{tenant_read_lock, tenant_write_lock, LockError, LockOptions};
use proptest::prelude::*;
use support::init_tracing;

#[test]
fn slash_in_tenant_name_gets_its_own_lock() {
    init_tracing();
    let coordinator = InMemoryCoordinator::new();
    let client = Arc::new(coordinator.connect());

    let nested = tenant_write_lock(&client, "a/b", LockOptions::non_blocking()).unwrap();
    let parent = tenant_write_lock(&client, "a", LockOptions::non_blocking()).unwrap();

    assert_eq!(nested.path(), "/zuul/locks/tenant/a%2Fb");
    assert_eq!(parent.path(), "/zuul/locks/tenant/a");
    assert!(!nested.path().starts_with(&format!("{}/", parent.path())));
}

#[test]
fn write_lock_waits_out_readers_from_other_clients() {
    init_tracing();
    let coordinator = InMemoryCoordinator::new();
    let scheduler = Arc::new(coordinator.connect());
    let web = Arc::new(coordinator.connect());

    let reader = tenant_read_lock(&web, "acme", LockOptions::non_blocking()).unwrap();
    let result = tenant_write_lock(&scheduler, "acme", LockOptions::non_blocking());
    assert!(matches!(result, Err(LockError::AcquireFailed { path }) if path == "/zuul/locks/tenant/acme"));

    reader.release().unwrap();
    let writer = tenant_write_lock(&scheduler, "acme", LockOptions::non_blocking()).unwrap();
    assert!(writer.is_still_valid());
}

#[test]
fn guard_reports_session_loss_inside_critical_section() {
    init_tracing();
    let coordinator = InMemoryCoordinator::new();
    let client = Arc::new(coordinator.connect());

    let guard = tenant_write_lock(&client, "acme", LockOptions::default()).unwrap();
    client.expire_session().unwrap();

    assert!(!guard.is_still_valid());
    guard.release().unwrap();
    assert_eq!(coordinator.node_count("/zuul/locks/tenant/acme"), 0);
}

proptest! {
    #[test]
    fn distinct_tenants_never_share_a_path(a in ".{1,12}", b in ".{1,12}") {
        prop_assume!(a != b);
        prop_assert_ne!(tenant_lock_path(&a), tenant_lock_path(&b));
        prop_assert_ne!(management_queue_lock_path(&a), management_queue_lock_path(&b));
        prop_assert_ne!(trigger_queue_lock_path(&a), trigger_queue_lock_path(&b));
    }

    #[test]
    fn tenant_segment_never_contains_a_separator(name in ".{1,24}") {
        let path = tenant_lock_path(&name);
        let segment = path.trim_start_matches("/zuul/locks/tenant/");
        prop_assert!(!segment.contains('/'));
    }

    #[test]
    fn pipeline_paths_keep_tenant_and_pipeline_apart(
        tenant in "[a-z/]{1,6}",
        pipeline in "[a-z/]{1,6}",
    ) {
        let path = pipeline_lock_path(&tenant, &pipeline);
        let rest = path.trim_start_matches("/zuul/locks/pipeline/");
        prop_assert_eq!(rest.matches('/').count(), 1);
    }
}

//! Scope ownership, nesting and event visibility through the public API

use super::test_utils::{event, ProbeUnit};
use std::sync::Arc;
use unitary::events::InMemoryEventBus;
use unitary::{FlushSettings, UnitOfWorkContext, UnitOfWorkError, UnitOfWorkScope};

fn open(root: &Arc<InMemoryEventBus>) -> UnitOfWorkScope {
    let root = root.clone();
    UnitOfWorkScope::begin(None, move || {
        UnitOfWorkContext::new(FlushSettings::default(), root, None)
    })
}

#[test]
fn nested_scopes_share_one_flush() {
    let root = InMemoryEventBus::shared();
    let mut outer = open(&root);
    let unit = ProbeUnit::new("orders", "", false);

    {
        let mut inner = UnitOfWorkScope::begin(Some(outer.context()), || unreachable!());
        assert!(!inner.is_owner());
        inner.context().enlist(unit.clone()).unwrap();
        inner.context().publish(event("order_placed")).unwrap();
        inner.complete().unwrap();
        inner.dispose().unwrap();
    }
    assert_eq!(unit.flush_count(), 0);
    assert!(root.published().is_empty());

    outer.context().enlist(unit.clone()).unwrap();
    let report = outer.complete().unwrap();
    assert_eq!(unit.flush_count(), 1);
    assert_eq!(report.rounds, 2);
    assert_eq!(root.published_types(), vec!["order_placed"]);
}

#[test]
fn usage_errors_surface_immediately() {
    let root = InMemoryEventBus::shared();
    let mut outer = open(&root);
    let mut inner = UnitOfWorkScope::enter(outer.context()).unwrap();

    assert!(matches!(
        outer.dispose(),
        Err(UnitOfWorkError::InvalidNesting(_))
    ));
    inner.complete().unwrap();
    assert!(matches!(
        inner.complete(),
        Err(UnitOfWorkError::AlreadyCompleted)
    ));
    inner.dispose().unwrap();
    outer.dispose().unwrap();
    assert!(matches!(outer.complete(), Err(UnitOfWorkError::Disposed)));

    let stale = outer.context().clone();
    assert!(matches!(
        stale.enlist(ProbeUnit::new("late", "", false)),
        Err(UnitOfWorkError::NoActiveContext)
    ));
}

#[test]
fn abandoned_scope_discards_everything() {
    let root = InMemoryEventBus::shared();
    let unit = ProbeUnit::new("orders", "", false);
    {
        let scope = open(&root);
        scope.context().enlist(unit.clone()).unwrap();
        scope.context().publish(event("order_placed")).unwrap();
    }
    assert_eq!(unit.flush_count(), 0);
    assert!(root.published().is_empty());
}

#[test]
fn context_cache_values_are_evicted_on_dispose() {
    let root = InMemoryEventBus::shared();
    let evicted = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let scope = open(&root);
        let flag = evicted.clone();
        scope.context().cache().insert_with_eviction(42u32, move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        assert_eq!(scope.context().cache().get::<u32>().as_deref(), Some(&42));
    }
    assert!(evicted.load(std::sync::atomic::Ordering::SeqCst));
}

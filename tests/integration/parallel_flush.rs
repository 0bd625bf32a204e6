//! Flush dispatch: grouping, background threads and dependent transactions

use super::test_utils::ProbeUnit;
use std::sync::Arc;
use unitary::events::NullEventBus;
use unitary::transaction::TransactionStatus;
use unitary::{FlushSettings, Transaction, UnitOfWorkContext, UnitOfWorkError};

fn context(settings: FlushSettings, transaction: Option<Transaction>) -> UnitOfWorkContext {
    UnitOfWorkContext::new(settings, Arc::new(NullEventBus), transaction)
}

#[test]
fn grouped_async_units_stay_together() {
    let context = context(FlushSettings::default(), None);
    let a = ProbeUnit::new("a", "ledger", true);
    let b = ProbeUnit::new("b", "ledger", true);
    let c = ProbeUnit::new("c", "", true);
    for unit in [&a, &b, &c] {
        context.enlist(unit.clone()).unwrap();
    }
    assert_eq!(context.enlisted(), 2);

    let report = context.flush().unwrap();
    assert_eq!(report.units_flushed, 2);
    assert_eq!(report.background_flushes, 1);
    assert_eq!(a.threads(), b.threads());
    assert!([&a, &b, &c].iter().all(|unit| unit.flush_count() == 1));
}

#[test]
fn sync_units_never_leave_the_calling_thread() {
    let context = context(FlushSettings::default(), None);
    let caller = std::thread::current().id();
    let units: Vec<_> = (0..4)
        .map(|i| ProbeUnit::new(&format!("sync-{i}"), "", false))
        .collect();
    let asynchronous: Vec<_> = (0..3)
        .map(|i| ProbeUnit::new(&format!("async-{i}"), "", true))
        .collect();
    for unit in units.iter().chain(asynchronous.iter()) {
        context.enlist(unit.clone()).unwrap();
    }

    let report = context.flush().unwrap();
    assert_eq!(report.background_flushes, 2);
    assert!(units.iter().all(|unit| unit.threads() == vec![caller]));
    let in_background: usize = asynchronous
        .iter()
        .map(|unit| unit.background.load(std::sync::atomic::Ordering::SeqCst))
        .sum();
    assert_eq!(in_background, 2);
}

#[test]
fn background_failure_aborts_the_root_transaction() {
    let transaction = Transaction::new();
    let context = context(FlushSettings::default(), Some(transaction.clone()));
    // The first async-capable unit is forked, the last one stays on the calling thread.
    context.enlist(ProbeUnit::failing("broken", true)).unwrap();
    context.enlist(ProbeUnit::new("fine", "", true)).unwrap();

    let err = context.flush().unwrap_err();
    let failures = err.into_failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0],
        UnitOfWorkError::FlushFailed { unit, .. } if unit == "broken"
    ));
    assert_eq!(transaction.status(), TransactionStatus::Aborted);
    assert!(transaction.commit().is_err());
}

#[test]
fn sequential_settings_flush_in_enlistment_order() {
    let context = context(FlushSettings::sequential(), None);
    let first = ProbeUnit::new("first", "", true);
    let second = ProbeUnit::new("second", "", true);
    context.enlist(first.clone()).unwrap();
    context.enlist(second.clone()).unwrap();
    let report = context.flush().unwrap();
    assert_eq!(report.background_flushes, 0);
    assert_eq!(first.threads(), second.threads());
}

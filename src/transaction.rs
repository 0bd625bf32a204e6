//! In-process transactions
//!
//! A lightweight model of an ambient transaction: a root [`Transaction`] that can hand out
//! [`DependentTransaction`] clones to other threads. The root can only commit once every
//! dependent has completed; a dependent (or the [`TransactionScope`] wrapping it) that is
//! dropped without completing aborts the root.

use crate::error::TransactionError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    Aborted,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborted => "aborted",
        }
    }
}

#[derive(Debug)]
struct TransactionState {
    status: TransactionStatus,
    outstanding: usize,
    abort_reason: Option<String>,
}

#[derive(Debug)]
struct TransactionInner {
    id: u64,
    state: Mutex<TransactionState>,
}

/// Root transaction handle. Clones share the same transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

fn next_transaction_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

impl Transaction {
    pub fn new() -> Self {
        let id = next_transaction_id();
        debug!(transaction_id = id, "transaction started");
        Self {
            inner: Arc::new(TransactionInner {
                id,
                state: Mutex::new(TransactionState {
                    status: TransactionStatus::Active,
                    outstanding: 0,
                    abort_reason: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.inner.state.lock().status
    }

    /// Number of dependent clones that have not completed yet.
    pub fn outstanding_dependents(&self) -> usize {
        self.inner.state.lock().outstanding
    }

    /// Create a dependent clone that must be completed before the root can commit.
    pub fn dependent_clone(&self) -> DependentTransaction {
        self.inner.state.lock().outstanding += 1;
        DependentTransaction {
            root: self.clone(),
            completed: false,
        }
    }

    /// Commit the transaction.
    pub fn commit(&self) -> Result<(), TransactionError> {
        let mut state = self.inner.state.lock();
        match state.status {
            TransactionStatus::Committed => Err(TransactionError::AlreadyCommitted(self.inner.id)),
            TransactionStatus::Aborted => Err(TransactionError::Aborted {
                id: self.inner.id,
                reason: state
                    .abort_reason
                    .clone()
                    .unwrap_or_else(|| "rolled back".to_string()),
            }),
            TransactionStatus::Active if state.outstanding > 0 => {
                Err(TransactionError::OutstandingDependents {
                    id: self.inner.id,
                    count: state.outstanding,
                })
            }
            TransactionStatus::Active => {
                state.status = TransactionStatus::Committed;
                debug!(transaction_id = self.inner.id, "transaction committed");
                Ok(())
            }
        }
    }

    /// Roll the transaction back. Has no effect on a committed transaction.
    pub fn rollback(&self) {
        self.abort("rolled back");
    }

    fn abort(&self, reason: &str) {
        let mut state = self.inner.state.lock();
        if state.status == TransactionStatus::Active {
            state.status = TransactionStatus::Aborted;
            state.abort_reason = Some(reason.to_string());
            debug!(transaction_id = self.inner.id, reason, "transaction aborted");
        }
    }

    fn release_dependent(&self) {
        let mut state = self.inner.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// A clone of a root transaction handed to another thread.
#[derive(Debug)]
pub struct DependentTransaction {
    root: Transaction,
    completed: bool,
}

impl DependentTransaction {
    pub fn root(&self) -> &Transaction {
        &self.root
    }

    /// Mark this dependent as done with its work.
    pub fn complete(mut self) {
        self.completed = true;
        self.root.release_dependent();
    }
}

impl Drop for DependentTransaction {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                transaction_id = self.root.id(),
                "dependent transaction dropped without completing"
            );
            self.root.abort("dependent transaction did not complete");
            self.root.release_dependent();
        }
    }
}

/// Scope around a dependent transaction. Completing the scope completes the dependent.
#[derive(Debug)]
pub struct TransactionScope {
    dependent: Option<DependentTransaction>,
}

impl TransactionScope {
    pub fn new(dependent: DependentTransaction) -> Self {
        Self {
            dependent: Some(dependent),
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.dependent.as_ref().map(DependentTransaction::root)
    }

    pub fn complete(mut self) {
        if let Some(dependent) = self.dependent.take() {
            dependent.complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_requires_completed_dependents() {
        let tx = Transaction::new();
        let dependent = tx.dependent_clone();
        assert_eq!(tx.outstanding_dependents(), 1);
        assert!(matches!(
            tx.commit(),
            Err(TransactionError::OutstandingDependents { count: 1, .. })
        ));

        dependent.complete();
        assert_eq!(tx.outstanding_dependents(), 0);
        tx.commit().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Committed);
        assert!(matches!(
            tx.commit(),
            Err(TransactionError::AlreadyCommitted(_))
        ));
    }

    #[test]
    fn dropped_scope_aborts_root() {
        let tx = Transaction::new();
        {
            let _scope = TransactionScope::new(tx.dependent_clone());
        }
        assert_eq!(tx.status(), TransactionStatus::Aborted);
        assert_eq!(tx.outstanding_dependents(), 0);
        assert!(matches!(tx.commit(), Err(TransactionError::Aborted { .. })));
    }

    #[test]
    fn completed_scope_in_other_thread() {
        let tx = Transaction::new();
        let scope = TransactionScope::new(tx.dependent_clone());
        std::thread::spawn(move || {
            assert!(scope.transaction().is_some());
            scope.complete();
        })
        .join()
        .unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn rollback_after_commit_is_ignored() {
        let tx = Transaction::new();
        tx.commit().unwrap();
        tx.rollback();
        assert_eq!(tx.status(), TransactionStatus::Committed);
        assert_eq!(TransactionStatus::Committed.as_str(), "committed");
    }
}

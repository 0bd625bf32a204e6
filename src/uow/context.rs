//! Unit-of-work context: one per scope chain.

use super::cache::DependencyCache;
use super::controller::{FlushReport, UnitOfWorkController};
use super::{FlushSettings, UnitOfWorkRef};
use crate::error::{BoxError, UnitOfWorkError};
use crate::events::{BufferedEventBus, EventBus, EventEnvelope};
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

struct ContextInner {
    id: u64,
    controller: UnitOfWorkController,
    cache: DependencyCache,
    buses: Mutex<Vec<Arc<BufferedEventBus>>>,
    root_bus: Arc<dyn EventBus>,
    transaction: Option<Transaction>,
    owned: AtomicBool,
    disposed: AtomicBool,
}

/// Handle to the context shared by every scope of one scope chain.
///
/// The handle is cheap to clone and is passed explicitly to code that enlists units or
/// publishes events.
#[derive(Clone)]
pub struct UnitOfWorkContext {
    inner: Arc<ContextInner>,
}

/// Non-owning reference held by buffered buses.
#[derive(Clone)]
pub(crate) struct WeakContext(Weak<ContextInner>);

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<UnitOfWorkContext> {
        self.0.upgrade().map(|inner| UnitOfWorkContext { inner })
    }
}

fn next_context_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

impl UnitOfWorkContext {
    pub fn new(
        settings: FlushSettings,
        root_bus: Arc<dyn EventBus>,
        transaction: Option<Transaction>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: next_context_id(),
                controller: UnitOfWorkController::new(settings),
                cache: DependencyCache::new(),
                buses: Mutex::new(Vec::new()),
                root_bus,
                transaction,
                owned: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.inner.transaction.as_ref()
    }

    pub fn cache(&self) -> &DependencyCache {
        &self.inner.cache
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn same_context(&self, other: &UnitOfWorkContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of enlisted entries waiting for the next flush.
    pub fn enlisted(&self) -> usize {
        self.inner.controller.len()
    }

    /// Number of open scopes (one bus layer each).
    pub fn depth(&self) -> usize {
        self.inner.buses.lock().len()
    }

    pub fn enlist(&self, unit: UnitOfWorkRef) -> Result<(), UnitOfWorkError> {
        if self.is_disposed() {
            return Err(UnitOfWorkError::NoActiveContext);
        }
        self.inner.controller.enlist(unit);
        Ok(())
    }

    /// The bus of the innermost open scope, or the root bus when no scope is open.
    pub fn event_bus(&self) -> Result<Arc<dyn EventBus>, UnitOfWorkError> {
        if self.is_disposed() {
            return Err(UnitOfWorkError::NoActiveContext);
        }
        let bus: Arc<dyn EventBus> = match self.inner.buses.lock().last() {
            Some(bus) => bus.clone(),
            None => self.inner.root_bus.clone(),
        };
        Ok(bus)
    }

    pub fn publish(&self, event: EventEnvelope) -> Result<(), BoxError> {
        self.event_bus()?.publish(event)
    }

    pub fn flush(&self) -> Result<FlushReport, UnitOfWorkError> {
        if self.is_disposed() {
            return Err(UnitOfWorkError::Disposed);
        }
        let report = self.inner.controller.flush(self.transaction())?;
        debug!(
            context_id = self.inner.id,
            rounds = report.rounds,
            units = report.units_flushed,
            background = report.background_flushes,
            "context flushed"
        );
        Ok(report)
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext(Arc::downgrade(&self.inner))
    }

    /// Claim ownership; only the first scope entering the context gets it.
    pub(crate) fn claim_ownership(&self) -> bool {
        !self.inner.owned.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn push_bus(&self) -> Arc<BufferedEventBus> {
        let mut buses = self.inner.buses.lock();
        let wrapped: Arc<dyn EventBus> = match buses.last() {
            Some(bus) => bus.clone(),
            None => self.inner.root_bus.clone(),
        };
        let bus = BufferedEventBus::new(wrapped, self.downgrade());
        buses.push(bus.clone());
        bus
    }

    /// Pop the innermost bus, which must be `expected`. The stack is left untouched on mismatch.
    pub(crate) fn pop_bus(&self, expected: &Arc<BufferedEventBus>) -> Result<(), UnitOfWorkError> {
        let mut buses = self.inner.buses.lock();
        match buses.last().map(|top| Arc::ptr_eq(top, expected)) {
            Some(true) => {
                buses.pop();
                Ok(())
            }
            Some(false) => Err(UnitOfWorkError::InvalidNesting(format!(
                "scope disposed while {} inner scope(s) of context {} are still open",
                buses
                    .iter()
                    .rev()
                    .take_while(|bus| !Arc::ptr_eq(bus, expected))
                    .count(),
                self.inner.id
            ))),
            None => Err(UnitOfWorkError::InvalidNesting(format!(
                "context {} has no open scope to dispose",
                self.inner.id
            ))),
        }
    }

    pub(crate) fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cache.dispose();
        let dropped = self.inner.controller.clear();
        debug!(
            context_id = self.inner.id,
            dropped_units = dropped,
            "context disposed"
        );
    }
}

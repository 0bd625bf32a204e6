//! Unit-of-work controller: enlistment and flush dispatch.

use super::item::EnlistedUnit;
use super::{FlushContext, FlushSettings, UnitOfWorkRef};
use crate::error::UnitOfWorkError;
use crate::transaction::{DependentTransaction, Transaction, TransactionScope};
use parking_lot::Mutex;
use std::any::Any;
use tracing::{debug, warn};

/// Counters describing one call to [`UnitOfWorkController::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Rounds that flushed at least one unit
    pub rounds: usize,
    /// Enlisted entries (items or groups) flushed
    pub units_flushed: usize,
    /// Entries flushed on a background thread
    pub background_flushes: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.rounds == 0
    }
}

/// Collects enlisted units and flushes them with minimal blocking.
///
/// The enlistment list is only locked for bookkeeping; units are flushed with the lock
/// released so a flush may enlist further units, which are picked up by the next round.
pub struct UnitOfWorkController {
    units: Mutex<Vec<EnlistedUnit>>,
    settings: FlushSettings,
}

impl UnitOfWorkController {
    pub fn new(settings: FlushSettings) -> Self {
        Self {
            units: Mutex::new(Vec::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &FlushSettings {
        &self.settings
    }

    /// Number of enlisted entries (a merged group counts once).
    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.lock().is_empty()
    }

    pub fn enlist(&self, unit: UnitOfWorkRef) {
        let mut units = self.units.lock();
        if units.iter().any(|entry| entry.wraps(&unit)) {
            return;
        }
        if let Some(index) = units.iter().position(|entry| entry.can_merge_with(&unit)) {
            debug!(
                unit = unit.name(),
                group = unit.flush_group_id(),
                "merging unit of work into flush group"
            );
            let entry = units.remove(index);
            units.insert(index, entry.merge(unit));
            return;
        }
        debug!(unit = unit.name(), "enlisted unit of work");
        units.push(EnlistedUnit::new(unit));
    }

    /// Drop everything enlisted without flushing it.
    pub fn clear(&self) -> usize {
        let mut units = self.units.lock();
        let dropped = units.len();
        units.clear();
        dropped
    }

    /// Flush until no enlisted unit requires flushing.
    pub fn flush(&self, transaction: Option<&Transaction>) -> Result<FlushReport, UnitOfWorkError> {
        let mut report = FlushReport::default();
        loop {
            let pending = self.take_pending();
            if pending.is_empty() {
                break;
            }
            if report.rounds >= self.settings.max_rounds {
                warn!(
                    rounds = report.rounds,
                    pending = pending.len(),
                    "units of work are still pending after the maximum number of flush rounds"
                );
                return Err(UnitOfWorkError::FlushLimitExceeded(self.settings.max_rounds));
            }
            report.rounds += 1;
            report.units_flushed += pending.len();
            debug!(round = report.rounds, units = pending.len(), "flushing units of work");
            report.background_flushes += self.dispatch(pending, transaction)?;
        }
        Ok(report)
    }

    fn take_pending(&self) -> Vec<EnlistedUnit> {
        let enlisted = std::mem::take(&mut *self.units.lock());
        enlisted
            .into_iter()
            .filter(EnlistedUnit::requires_flush)
            .collect()
    }

    /// Flush one round of units. Returns the number flushed in the background.
    fn dispatch(
        &self,
        units: Vec<EnlistedUnit>,
        transaction: Option<&Transaction>,
    ) -> Result<usize, UnitOfWorkError> {
        let local_context = FlushContext::new(transaction.cloned(), false);
        if units.len() == 1 || !self.settings.parallel {
            flush_sequentially(units.iter(), &local_context)?;
            return Ok(0);
        }

        let (mut asynchronous, synchronous): (Vec<_>, Vec<_>) = units
            .into_iter()
            .partition(EnlistedUnit::can_be_flushed_asynchronously);

        // One async-capable unit always stays on the calling thread.
        let forked = asynchronous
            .len()
            .saturating_sub(1)
            .min(self.settings.max_background_flushes);
        if forked == 0 {
            flush_sequentially(asynchronous.iter().chain(synchronous.iter()), &local_context)?;
            return Ok(0);
        }
        let local = asynchronous.split_off(forked);
        let background = asynchronous;

        let failures = std::thread::scope(|scope| {
            let handles: Vec<_> = background
                .iter()
                .map(|unit| {
                    let dependent = transaction.map(Transaction::dependent_clone);
                    let handle = scope.spawn(move || flush_in_background(unit, dependent));
                    (unit.name(), handle)
                })
                .collect();

            let mut failures = Vec::new();
            if let Err(err) = flush_sequentially(local.iter().chain(synchronous.iter()), &local_context)
            {
                failures.push(err);
            }
            for (name, handle) in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => failures.push(err),
                    Err(payload) => failures.push(UnitOfWorkError::BackgroundPanic {
                        unit: name.to_string(),
                        message: panic_message(payload.as_ref()),
                    }),
                }
            }
            failures
        });

        combine(failures)?;
        Ok(forked)
    }
}

fn flush_sequentially<'a>(
    units: impl Iterator<Item = &'a EnlistedUnit>,
    context: &FlushContext,
) -> Result<(), UnitOfWorkError> {
    for unit in units {
        unit.flush(context)?;
    }
    Ok(())
}

fn flush_in_background(
    unit: &EnlistedUnit,
    dependent: Option<DependentTransaction>,
) -> Result<(), UnitOfWorkError> {
    match dependent {
        Some(dependent) => {
            let scope = TransactionScope::new(dependent);
            let context = FlushContext::new(scope.transaction().cloned(), true);
            unit.flush(&context)?;
            scope.complete();
            Ok(())
        }
        None => unit.flush(&FlushContext::new(None, true)),
    }
}

fn combine(mut failures: Vec<UnitOfWorkError>) -> Result<(), UnitOfWorkError> {
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(UnitOfWorkError::ParallelFlushFailed(failures)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

//! Unit of Work
//!
//! Units of work are enlisted in a [`UnitOfWorkContext`] while a message is handled and are
//! flushed together when the outermost [`UnitOfWorkScope`] completes. Units that share a
//! flush-group id are merged and flushed sequentially on one thread; units that allow it are
//! flushed on background threads under a dependent transaction.

mod cache;
mod context;
mod controller;
mod item;
mod scope;

pub use cache::DependencyCache;
pub use context::UnitOfWorkContext;
pub(crate) use context::WeakContext;
pub use controller::{FlushReport, UnitOfWorkController};
pub use item::{EnlistedUnit, UnitOfWorkGroup, UnitOfWorkItem};
pub use scope::UnitOfWorkScope;

use crate::error::BoxError;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A batch of pending changes that can be flushed.
pub trait UnitOfWork: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Grouping key. Units with the same non-empty id are flushed together, in sequence.
    fn flush_group_id(&self) -> &str {
        ""
    }

    fn can_be_flushed_asynchronously(&self) -> bool {
        false
    }

    fn requires_flush(&self) -> bool;

    fn flush(&self, context: &FlushContext) -> Result<(), BoxError>;
}

/// Shared handle to an enlisted unit of work.
pub type UnitOfWorkRef = Arc<dyn UnitOfWork>;

/// Identity comparison of two unit handles (data pointer only).
pub(crate) fn same_unit(a: &UnitOfWorkRef, b: &UnitOfWorkRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const u8,
        Arc::as_ptr(b) as *const u8,
    )
}

/// Passed to every [`UnitOfWork::flush`] call.
#[derive(Debug, Clone, Default)]
pub struct FlushContext {
    transaction: Option<Transaction>,
    background: bool,
}

impl FlushContext {
    pub fn new(transaction: Option<Transaction>, background: bool) -> Self {
        Self {
            transaction,
            background,
        }
    }

    /// Transaction the flush runs under, if any.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// Whether the flush runs on a background thread.
    pub fn is_background(&self) -> bool {
        self.background
    }
}

/// Flush dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushSettings {
    /// Allow async-capable units to be flushed on background threads
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Maximum number of background flushes forked per round
    #[serde(default = "default_max_background_flushes")]
    pub max_background_flushes: usize,

    /// Maximum number of flush rounds before giving up on cascading units
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_background_flushes() -> usize {
    8
}

fn default_max_rounds() -> usize {
    64
}

impl Default for FlushSettings {
    fn default() -> Self {
        Self {
            parallel: default_true(),
            max_background_flushes: default_max_background_flushes(),
            max_rounds: default_max_rounds(),
        }
    }
}

impl FlushSettings {
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_rounds == 0 {
            return Err("max_rounds must be at least 1".to_string());
        }
        if self.parallel && self.max_background_flushes == 0 {
            return Err("max_background_flushes must be at least 1 when parallel".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording units of work shared by the unit-of-work tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread::ThreadId;

    pub struct RecordingUnit {
        name: String,
        group: String,
        asynchronous: bool,
        pending: AtomicBool,
        fail: AtomicBool,
        pub flushes: AtomicUsize,
        pub threads: Mutex<Vec<ThreadId>>,
        pub transactions: Mutex<Vec<Option<u64>>>,
    }

    impl RecordingUnit {
        pub fn new(name: &str) -> Arc<Self> {
            Self::build(name, "", false)
        }

        pub fn grouped(name: &str, group: &str) -> Arc<Self> {
            Self::build(name, group, false)
        }

        pub fn asynchronous(name: &str) -> Arc<Self> {
            Self::build(name, "", true)
        }

        pub fn build(name: &str, group: &str, asynchronous: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                group: group.to_string(),
                asynchronous,
                pending: AtomicBool::new(true),
                fail: AtomicBool::new(false),
                flushes: AtomicUsize::new(0),
                threads: Mutex::new(Vec::new()),
                transactions: Mutex::new(Vec::new()),
            })
        }

        pub fn failing(self: Arc<Self>) -> Arc<Self> {
            self.fail.store(true, Ordering::SeqCst);
            self
        }

        pub fn idle(self: Arc<Self>) -> Arc<Self> {
            self.pending.store(false, Ordering::SeqCst);
            self
        }

        pub fn flush_count(&self) -> usize {
            self.flushes.load(Ordering::SeqCst)
        }

        pub fn flushed_on(&self) -> Vec<ThreadId> {
            self.threads.lock().clone()
        }
    }

    impl UnitOfWork for RecordingUnit {
        fn name(&self) -> &str {
            &self.name
        }

        fn flush_group_id(&self) -> &str {
            &self.group
        }

        fn can_be_flushed_asynchronously(&self) -> bool {
            self.asynchronous
        }

        fn requires_flush(&self) -> bool {
            self.pending.load(Ordering::SeqCst)
        }

        fn flush(&self, context: &FlushContext) -> Result<(), BoxError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            self.threads.lock().push(std::thread::current().id());
            self.transactions
                .lock()
                .push(context.transaction().map(Transaction::id));
            self.pending.store(false, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(format!("{} refused to flush", self.name).into());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flush_settings_are_valid() {
        let settings = FlushSettings::default();
        assert!(settings.parallel);
        assert_eq!(settings.max_rounds, 64);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zero_rounds_is_rejected() {
        let settings = FlushSettings {
            max_rounds: 0,
            ..FlushSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(FlushSettings::sequential().validate().is_ok());
    }
}

//! Unit-of-work scope.

use super::context::UnitOfWorkContext;
use super::controller::FlushReport;
use crate::error::UnitOfWorkError;
use crate::events::BufferedEventBus;
use std::sync::Arc;
use tracing::{debug, error};

/// Scope around a piece of work that enlists units in a [`UnitOfWorkContext`].
///
/// The first scope to enter a context owns it: completing the owner flushes the context and
/// disposing the owner disposes the context. Every scope pushes its own event-bus layer and
/// must be disposed in reverse order of creation.
pub struct UnitOfWorkScope {
    context: UnitOfWorkContext,
    bus: Arc<BufferedEventBus>,
    owner: bool,
    completed: bool,
    disposed: bool,
}

impl UnitOfWorkScope {
    /// Join `current` if it is still open, otherwise open a fresh context from `create`.
    pub fn begin<F>(current: Option<&UnitOfWorkContext>, create: F) -> Self
    where
        F: FnOnce() -> UnitOfWorkContext,
    {
        match current.filter(|context| !context.is_disposed()) {
            Some(context) => Self::open(context.clone()),
            None => Self::open(create()),
        }
    }

    /// Enter an existing context. Fails if the context has been disposed.
    pub fn enter(context: &UnitOfWorkContext) -> Result<Self, UnitOfWorkError> {
        if context.is_disposed() {
            return Err(UnitOfWorkError::NoActiveContext);
        }
        Ok(Self::open(context.clone()))
    }

    fn open(context: UnitOfWorkContext) -> Self {
        let owner = context.claim_ownership();
        let bus = context.push_bus();
        debug!(
            context_id = context.id(),
            owner,
            depth = context.depth(),
            "unit-of-work scope opened"
        );
        Self {
            context,
            bus,
            owner,
            completed: false,
            disposed: false,
        }
    }

    pub fn context(&self) -> &UnitOfWorkContext {
        &self.context
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Mark the scope complete. The owner flushes the context; other scopes only record
    /// completion and return an empty report.
    pub fn complete(&mut self) -> Result<FlushReport, UnitOfWorkError> {
        if self.disposed {
            return Err(UnitOfWorkError::Disposed);
        }
        if self.completed {
            return Err(UnitOfWorkError::AlreadyCompleted);
        }
        self.completed = true;
        if self.owner {
            self.context.flush()
        } else {
            Ok(FlushReport::default())
        }
    }

    /// Pop this scope's bus layer; the owner also disposes the context.
    ///
    /// Disposing twice is a no-op. If inner scopes are still open the scope stays undisposed
    /// and `InvalidNesting` is returned.
    pub fn dispose(&mut self) -> Result<(), UnitOfWorkError> {
        if self.disposed {
            return Ok(());
        }
        self.context.pop_bus(&self.bus)?;
        self.disposed = true;
        if self.owner {
            if !self.completed {
                debug!(
                    context_id = self.context.id(),
                    pending = self.context.enlisted(),
                    "owner scope disposed without completing; discarding pending units"
                );
            }
            self.context.dispose();
        }
        Ok(())
    }
}

impl Drop for UnitOfWorkScope {
    /// An owner dropped while inner scopes are still open disposes the context anyway, so
    /// cached dependencies are evicted and pending units are dropped.
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            error!(
                context_id = self.context.id(),
                owner = self.owner,
                error = %err,
                "failed to dispose unit-of-work scope"
            );
            if self.owner {
                self.disposed = true;
                self.context.dispose();
            }
        }
    }
}

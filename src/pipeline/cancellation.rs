//! Cooperative cancellation.

use crate::error::HandlerError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between pipeline stages. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` naming `stage` once the token has been cancelled.
    pub fn check(&self, stage: &str) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            return Err(HandlerError::Cancelled(stage.to_string()));
        }
        Ok(())
    }
}

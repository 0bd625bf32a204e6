//! Message Pipeline
//!
//! Commands, events and queries are dispatched to handlers registered explicitly in a
//! [`HandlerRegistry`]. The [`MessageProcessor`] runs every command inside an owner
//! [`crate::uow::UnitOfWorkScope`], passes it through the configured [`Middleware`] chain and
//! completes the scope, which flushes repositories and delivers buffered events to their
//! subscribers in the same unit of work.

mod cancellation;
mod message;
mod middleware;
mod processor;
mod registry;

pub use cancellation::CancellationToken;
pub use message::{Message, MessageKind, Query};
pub use middleware::{CancellationMiddleware, Invocation, Middleware, Next, TracingMiddleware};
pub use processor::{HandleOutcome, MessageProcessor};
pub use registry::HandlerRegistry;

use serde::{Deserialize, Serialize};

/// Message processor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Run each message under a root transaction that commits after the flush
    #[serde(default = "default_true")]
    pub transactional: bool,

    /// Install the tracing middleware
    #[serde(default = "default_true")]
    pub trace_messages: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transactional: true,
            trace_messages: true,
        }
    }
}

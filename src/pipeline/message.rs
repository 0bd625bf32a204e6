//! Message and query contracts.

use crate::events::EventEnvelope;

/// A command or event handled inside a unit of work.
pub trait Message: Send + Sync + 'static {
    /// Name used for logging and error reporting.
    fn message_type(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl Message for EventEnvelope {
    fn message_type(&self) -> &str {
        &self.event_type
    }
}

/// A read-only request answered without a unit of work.
pub trait Query: Send + Sync + 'static {
    type Response: Send + 'static;

    fn query_type(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// What the pipeline is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Command,
    Event,
    Query,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Event => "event",
            MessageKind::Query => "query",
        }
    }
}

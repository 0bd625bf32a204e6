//! Commit-time event buffering.

use crate::error::{BoxError, UnitOfWorkError};
use crate::events::bus::EventBus;
use crate::events::envelope::EventEnvelope;
use crate::uow::{FlushContext, UnitOfWork, WeakContext};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Default)]
struct BufferState {
    events: Vec<EventEnvelope>,
    enlisted: bool,
}

/// Buffers published events until the owning scope completes, then forwards them to the
/// wrapped bus.
///
/// The bus is a synchronous, ungrouped unit of work. It enlists itself in its context the
/// first time an event is published, and again after each flush.
pub struct BufferedEventBus {
    inner: Arc<dyn EventBus>,
    context: WeakContext,
    this: Weak<BufferedEventBus>,
    state: Mutex<BufferState>,
}

impl BufferedEventBus {
    pub(crate) fn new(inner: Arc<dyn EventBus>, context: WeakContext) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            inner,
            context,
            this: this.clone(),
            state: Mutex::new(BufferState::default()),
        })
    }

    /// Number of buffered events.
    pub fn pending(&self) -> usize {
        self.state.lock().events.len()
    }

    fn enlist(&self) -> Result<(), UnitOfWorkError> {
        let context = self
            .context
            .upgrade()
            .ok_or(UnitOfWorkError::NoActiveContext)?;
        let this = self.this.upgrade().ok_or(UnitOfWorkError::NoActiveContext)?;
        context.enlist(this)
    }
}

impl EventBus for BufferedEventBus {
    fn publish(&self, event: EventEnvelope) -> Result<(), BoxError> {
        let first = {
            let mut state = self.state.lock();
            state.events.push(event);
            !std::mem::replace(&mut state.enlisted, true)
        };
        if first {
            if let Err(err) = self.enlist() {
                let mut state = self.state.lock();
                state.events.pop();
                state.enlisted = false;
                return Err(err.into());
            }
        }
        Ok(())
    }
}

impl UnitOfWork for BufferedEventBus {
    fn name(&self) -> &str {
        "buffered-event-bus"
    }

    fn requires_flush(&self) -> bool {
        !self.state.lock().events.is_empty()
    }

    fn flush(&self, _context: &FlushContext) -> Result<(), BoxError> {
        let events = {
            let mut state = self.state.lock();
            state.enlisted = false;
            std::mem::take(&mut state.events)
        };
        debug!(events = events.len(), "forwarding buffered events");
        for event in events {
            self.inner.publish(event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryEventBus;
    use crate::uow::{FlushSettings, UnitOfWorkContext};
    use serde_json::json;

    #[test]
    fn events_are_held_until_flush() {
        let root = InMemoryEventBus::shared();
        let context = UnitOfWorkContext::new(FlushSettings::default(), root.clone(), None);
        let bus = BufferedEventBus::new(root.clone(), context.downgrade());

        bus.publish(EventEnvelope::with_now("a", json!({}))).unwrap();
        bus.publish(EventEnvelope::with_now("b", json!({}))).unwrap();
        assert_eq!(bus.pending(), 2);
        assert!(root.published().is_empty());
        assert_eq!(context.enlisted(), 1);

        let report = context.flush().unwrap();
        assert_eq!(report.rounds, 1);
        assert_eq!(root.published_types(), vec!["a", "b"]);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn bus_re_enlists_after_flush() {
        let root = InMemoryEventBus::shared();
        let context = UnitOfWorkContext::new(FlushSettings::default(), root.clone(), None);
        let bus = BufferedEventBus::new(root.clone(), context.downgrade());

        bus.publish(EventEnvelope::with_now("a", json!({}))).unwrap();
        context.flush().unwrap();
        bus.publish(EventEnvelope::with_now("b", json!({}))).unwrap();
        assert_eq!(context.enlisted(), 1);
        context.flush().unwrap();
        assert_eq!(root.published_types(), vec!["a", "b"]);
    }

    #[test]
    fn publish_without_context_fails() {
        let root = InMemoryEventBus::shared();
        let context = UnitOfWorkContext::new(FlushSettings::default(), root.clone(), None);
        let bus = BufferedEventBus::new(root, context.downgrade());
        drop(context);

        assert!(bus.publish(EventEnvelope::with_now("a", json!({}))).is_err());
        assert_eq!(bus.pending(), 0);
    }
}

//! In-process event buses.

use crate::error::BoxError;
use crate::events::envelope::EventEnvelope;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Destination for published events.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: EventEnvelope) -> Result<(), BoxError>;
}

/// Callback invoked for every matching event.
pub type EventSubscriber = Arc<dyn Fn(&EventEnvelope) -> Result<(), BoxError> + Send + Sync>;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn publish(&self, _event: EventEnvelope) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Records published events and dispatches them synchronously to subscribers.
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: RwLock<Vec<(Option<String>, EventSubscriber)>>,
    published: Mutex<Vec<EventEnvelope>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Subscribe to one event type.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, subscriber: F)
    where
        F: Fn(&EventEnvelope) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .push((Some(event_type.into()), Arc::new(subscriber)));
    }

    pub fn subscribe_all<F>(&self, subscriber: F)
    where
        F: Fn(&EventEnvelope) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.subscribers.write().push((None, Arc::new(subscriber)));
    }

    /// Every event published so far, in order.
    pub fn published(&self) -> Vec<EventEnvelope> {
        self.published.lock().clone()
    }

    pub fn published_types(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, event: EventEnvelope) -> Result<(), BoxError> {
        self.published.lock().push(event.clone());
        // Subscribers may publish again; do not hold the lock while calling them.
        let matching: Vec<EventSubscriber> = self
            .subscribers
            .read()
            .iter()
            .filter(|(filter, _)| filter.as_deref().map_or(true, |t| t == event.event_type))
            .map(|(_, subscriber)| subscriber.clone())
            .collect();
        for subscriber in matching {
            subscriber(&event)?;
        }
        Ok(())
    }
}

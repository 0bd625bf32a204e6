//! Explicit handler registration.

use super::message::{Message, Query};
use crate::error::HandlerError;
use crate::events::EventEnvelope;
use crate::uow::UnitOfWorkContext;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) type CommandHandler =
    Arc<dyn Fn(&dyn Any, &UnitOfWorkContext) -> Result<(), HandlerError> + Send + Sync>;
pub(crate) type EventHandler =
    Arc<dyn Fn(&EventEnvelope, &UnitOfWorkContext) -> Result<(), HandlerError> + Send + Sync>;
pub(crate) type QueryHandler =
    Arc<dyn Fn(&dyn Any) -> Result<Box<dyn Any + Send>, HandlerError> + Send + Sync>;

struct Subscription {
    name: String,
    handler: EventHandler,
}

/// Command handlers by message type, event handlers by event type and query handlers by
/// query type.
#[derive(Default)]
pub struct HandlerRegistry {
    commands: HashMap<TypeId, CommandHandler>,
    events: HashMap<String, Vec<Subscription>>,
    queries: HashMap<TypeId, QueryHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for messages of type `M`, replacing any previous one.
    pub fn register_command<M, F>(&mut self, handler: F) -> &mut Self
    where
        M: Message,
        F: Fn(&M, &UnitOfWorkContext) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let name = std::any::type_name::<M>();
        let erased: CommandHandler = Arc::new(move |message, context| {
            let message = message
                .downcast_ref::<M>()
                .ok_or_else(|| HandlerError::NoHandler(name.to_string()))?;
            handler(message, context)
        });
        if self.commands.insert(TypeId::of::<M>(), erased).is_some() {
            warn!(message_type = name, "replacing registered command handler");
        } else {
            debug!(message_type = name, "registered command handler");
        }
        self
    }

    /// Add a handler for events of `event_type`. Handlers run in subscription order.
    pub fn subscribe<F>(&mut self, event_type: &str, name: &str, handler: F) -> &mut Self
    where
        F: Fn(&EventEnvelope, &UnitOfWorkContext) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        debug!(event_type, subscriber = name, "subscribed event handler");
        self.events
            .entry(event_type.to_string())
            .or_default()
            .push(Subscription {
                name: name.to_string(),
                handler: Arc::new(handler),
            });
        self
    }

    pub fn register_query<Q, F>(&mut self, handler: F) -> &mut Self
    where
        Q: Query,
        F: Fn(&Q) -> Result<Q::Response, HandlerError> + Send + Sync + 'static,
    {
        let name = std::any::type_name::<Q>();
        let erased: QueryHandler = Arc::new(move |query| {
            let query = query
                .downcast_ref::<Q>()
                .ok_or_else(|| HandlerError::NoHandler(name.to_string()))?;
            let response: Box<dyn Any + Send> = Box::new(handler(query)?);
            Ok(response)
        });
        if self.queries.insert(TypeId::of::<Q>(), erased).is_some() {
            warn!(query_type = name, "replacing registered query handler");
        }
        self
    }

    pub(crate) fn command<M: Message>(&self) -> Option<CommandHandler> {
        self.commands.get(&TypeId::of::<M>()).cloned()
    }

    pub(crate) fn query<Q: Query>(&self) -> Option<QueryHandler> {
        self.queries.get(&TypeId::of::<Q>()).cloned()
    }

    /// Subscribers of `event_type` as `(name, handler)` pairs.
    pub(crate) fn subscribers(&self, event_type: &str) -> Vec<(String, EventHandler)> {
        self.events
            .get(event_type)
            .map(|subscriptions| {
                subscriptions
                    .iter()
                    .map(|s| (s.name.clone(), s.handler.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_command<M: Message>(&self) -> bool {
        self.commands.contains_key(&TypeId::of::<M>())
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.events.get(event_type).map_or(0, Vec::len)
    }
}

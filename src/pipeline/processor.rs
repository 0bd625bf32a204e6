//! Message processor: the front door that runs messages inside a unit of work.

use super::cancellation::CancellationToken;
use super::message::{Message, MessageKind, Query};
use super::middleware::{
    run_chain, CancellationMiddleware, Invocation, Middleware, TracingMiddleware,
};
use super::registry::HandlerRegistry;
use super::PipelineConfig;
use crate::config::UnitaryConfig;
use crate::error::{BoxError, HandlerError};
use crate::events::{EventBus, EventEnvelope, NullEventBus};
use crate::transaction::Transaction;
use crate::uow::{FlushReport, FlushSettings, UnitOfWorkContext, UnitOfWorkScope, WeakContext};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

fn next_message_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Result of handling one message.
#[derive(Debug, Clone, Default)]
pub struct HandleOutcome {
    pub report: FlushReport,
    /// Events committed by the unit of work, in delivery order
    pub events: Vec<EventEnvelope>,
}

/// Root bus of a processor-owned context.
///
/// Events reaching it have left every buffered layer, so they are dispatched to subscribed
/// handlers inside the same context. Delivered events are held until the processor commits.
struct DispatchingBus {
    registry: Arc<HandlerRegistry>,
    middleware: Vec<Arc<dyn Middleware>>,
    token: CancellationToken,
    context: OnceLock<WeakContext>,
    delivered: Mutex<Vec<EventEnvelope>>,
}

impl DispatchingBus {
    /// Bind the bus to the context it is the root of. A bus serves exactly one context.
    fn bind(&self, context: &UnitOfWorkContext) -> Result<(), HandlerError> {
        self.context.set(context.downgrade()).map_err(|_| {
            HandlerError::Rejected("dispatching bus is already bound to a context".to_string())
        })
    }

    fn take_delivered(&self) -> Vec<EventEnvelope> {
        std::mem::take(&mut *self.delivered.lock())
    }
}

impl EventBus for DispatchingBus {
    fn publish(&self, event: EventEnvelope) -> Result<(), BoxError> {
        let context = self
            .context
            .get()
            .and_then(WeakContext::upgrade)
            .ok_or("event published after its unit-of-work context was dropped")?;
        let message_id = next_message_id();
        for (subscriber, handler) in self.registry.subscribers(&event.event_type) {
            debug!(
                event_type = %event.event_type,
                subscriber = %subscriber,
                "dispatching event"
            );
            let invocation = Invocation::new(
                MessageKind::Event,
                &event.event_type,
                message_id,
                Some(&context),
                &self.token,
            );
            let mut run = |_: &Invocation<'_>| handler(&event, &context);
            run_chain(&self.middleware, &invocation, &mut run)?;
        }
        self.delivered.lock().push(event);
        Ok(())
    }
}

/// Runs commands and events inside an owner [`UnitOfWorkScope`] and answers queries.
pub struct MessageProcessor {
    registry: Arc<HandlerRegistry>,
    middleware: Vec<Arc<dyn Middleware>>,
    settings: FlushSettings,
    config: PipelineConfig,
    event_bus: Arc<dyn EventBus>,
}

impl MessageProcessor {
    pub fn new(registry: HandlerRegistry, settings: FlushSettings, config: PipelineConfig) -> Self {
        let mut middleware: Vec<Arc<dyn Middleware>> = Vec::new();
        if config.trace_messages {
            middleware.push(Arc::new(TracingMiddleware));
        }
        middleware.push(Arc::new(CancellationMiddleware));
        Self {
            registry: Arc::new(registry),
            middleware,
            settings,
            config,
            event_bus: Arc::new(NullEventBus),
        }
    }

    pub fn from_config(registry: HandlerRegistry, config: &UnitaryConfig) -> Self {
        Self::new(registry, config.flush.clone(), config.pipeline.clone())
    }

    /// Append a middleware after the built-in ones.
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Bus that receives events after the unit of work commits.
    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn handle<M: Message>(&self, message: M) -> Result<HandleOutcome, HandlerError> {
        self.handle_with_token(message, &CancellationToken::new())
    }

    pub fn handle_with_token<M: Message>(
        &self,
        message: M,
        token: &CancellationToken,
    ) -> Result<HandleOutcome, HandlerError> {
        let handler = self
            .registry
            .command::<M>()
            .ok_or_else(|| HandlerError::NoHandler(message.message_type().to_string()))?;
        self.run(MessageKind::Command, message.message_type(), token, |context| {
            handler(&message, context)
        })
    }

    /// Handle an incoming event by running its subscribers in one unit of work.
    pub fn publish(&self, event: EventEnvelope) -> Result<HandleOutcome, HandlerError> {
        let subscribers = self.registry.subscribers(&event.event_type);
        if subscribers.is_empty() {
            return Err(HandlerError::NoHandler(event.event_type));
        }
        let token = CancellationToken::new();
        self.run(MessageKind::Event, &event.event_type, &token, |context| {
            subscribers
                .iter()
                .try_for_each(|(_, handler)| handler(&event, context))
        })
    }

    /// Run [`MessageProcessor::handle`] on tokio's blocking pool.
    pub async fn handle_async<M: Message>(
        self: &Arc<Self>,
        message: M,
    ) -> Result<HandleOutcome, HandlerError> {
        let processor = Arc::clone(self);
        tokio::task::spawn_blocking(move || processor.handle(message))
            .await
            .map_err(|err| HandlerError::Failed(Box::new(err)))?
    }

    /// Answer a query through the middleware chain, without a unit of work.
    pub fn execute<Q: Query>(&self, query: Q) -> Result<Q::Response, HandlerError> {
        let handler = self
            .registry
            .query::<Q>()
            .ok_or_else(|| HandlerError::NoHandler(query.query_type().to_string()))?;
        let token = CancellationToken::new();
        let invocation = Invocation::new(
            MessageKind::Query,
            query.query_type(),
            next_message_id(),
            None,
            &token,
        );
        let mut response = None;
        let mut run = |_: &Invocation<'_>| -> Result<(), HandlerError> {
            response = Some(handler(&query)?);
            Ok(())
        };
        run_chain(&self.middleware, &invocation, &mut run)?;
        let response = response.ok_or_else(|| {
            HandlerError::Rejected(format!("query {} was not executed", query.query_type()))
        })?;
        response.downcast::<Q::Response>().map(|r| *r).map_err(|_| {
            HandlerError::Failed(
                format!("query {} returned an unexpected response", query.query_type()).into(),
            )
        })
    }

    fn run<F>(
        &self,
        kind: MessageKind,
        message_type: &str,
        token: &CancellationToken,
        work: F,
    ) -> Result<HandleOutcome, HandlerError>
    where
        F: FnOnce(&UnitOfWorkContext) -> Result<(), HandlerError>,
    {
        let transaction = self.config.transactional.then(Transaction::new);
        let bus = Arc::new(DispatchingBus {
            registry: self.registry.clone(),
            middleware: self.middleware.clone(),
            token: token.clone(),
            context: OnceLock::new(),
            delivered: Mutex::new(Vec::new()),
        });
        let root: Arc<dyn EventBus> = bus.clone();
        let context = UnitOfWorkContext::new(self.settings.clone(), root, transaction.clone());
        bus.bind(&context)?;

        let mut scope = UnitOfWorkScope::begin(None, || context);
        let result = self.run_in_scope(&mut scope, kind, message_type, token, work);
        let result = match (result, &transaction) {
            (Ok(report), Some(transaction)) => transaction
                .commit()
                .map(|()| report)
                .map_err(HandlerError::from),
            (Ok(report), None) => Ok(report),
            (Err(err), transaction) => {
                if let Some(transaction) = transaction {
                    transaction.rollback();
                }
                Err(err)
            }
        };
        if let Err(err) = scope.dispose() {
            error!(error = %err, "failed to dispose message scope");
        }

        let report = result?;
        let events = bus.take_delivered();
        for event in &events {
            self.event_bus
                .publish(event.clone())
                .map_err(HandlerError::Failed)?;
        }
        Ok(HandleOutcome { report, events })
    }

    fn run_in_scope<F>(
        &self,
        scope: &mut UnitOfWorkScope,
        kind: MessageKind,
        message_type: &str,
        token: &CancellationToken,
        work: F,
    ) -> Result<FlushReport, HandlerError>
    where
        F: FnOnce(&UnitOfWorkContext) -> Result<(), HandlerError>,
    {
        let context = scope.context().clone();
        let invocation =
            Invocation::new(kind, message_type, next_message_id(), Some(&context), token);
        let mut work = Some(work);
        let mut run = |_: &Invocation<'_>| -> Result<(), HandlerError> {
            match work.take() {
                Some(work) => work(&context),
                None => Err(HandlerError::Rejected(format!(
                    "{message_type} handler invoked twice"
                ))),
            }
        };
        run_chain(&self.middleware, &invocation, &mut run)?;
        token.check("flush")?;
        scope.complete().map_err(HandlerError::from)
    }
}

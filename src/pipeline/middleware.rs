//! Middleware chain
//!
//! Each middleware receives the [`Invocation`] and a [`Next`] continuation. Calling
//! [`Next::run`] passes control to the following middleware, and finally to the handler.
//! Returning without calling it short-circuits the chain.

use super::cancellation::CancellationToken;
use super::message::MessageKind;
use crate::error::HandlerError;
use crate::uow::UnitOfWorkContext;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn};

/// The message currently travelling through the chain.
pub struct Invocation<'a> {
    kind: MessageKind,
    message_type: &'a str,
    message_id: u64,
    context: Option<&'a UnitOfWorkContext>,
    token: &'a CancellationToken,
}

impl<'a> Invocation<'a> {
    pub fn new(
        kind: MessageKind,
        message_type: &'a str,
        message_id: u64,
        context: Option<&'a UnitOfWorkContext>,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            kind,
            message_type,
            message_id,
            context,
            token,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn message_type(&self) -> &str {
        self.message_type
    }

    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// The unit-of-work context; `None` for queries.
    pub fn context(&self) -> Option<&UnitOfWorkContext> {
        self.context
    }

    pub fn token(&self) -> &CancellationToken {
        self.token
    }
}

type Handler<'a> = dyn FnMut(&Invocation<'_>) -> Result<(), HandlerError> + 'a;

/// Continuation to the rest of the chain.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    handler: &'a mut Handler<'a>,
}

impl<'a> Next<'a> {
    pub fn run(self, invocation: &Invocation<'_>) -> Result<(), HandlerError> {
        match self.remaining.split_first() {
            Some((first, rest)) => first.invoke(
                invocation,
                Next {
                    remaining: rest,
                    handler: self.handler,
                },
            ),
            None => (self.handler)(invocation),
        }
    }
}

pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn invoke(&self, invocation: &Invocation<'_>, next: Next<'_>) -> Result<(), HandlerError>;
}

/// Run `invocation` through `middleware` in order, ending in `handler`.
pub(crate) fn run_chain<'a>(
    middleware: &'a [Arc<dyn Middleware>],
    invocation: &Invocation<'_>,
    handler: &'a mut Handler<'a>,
) -> Result<(), HandlerError> {
    Next {
        remaining: middleware,
        handler,
    }
    .run(invocation)
}

/// Opens a span per message and logs the outcome with its duration.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    fn invoke(&self, invocation: &Invocation<'_>, next: Next<'_>) -> Result<(), HandlerError> {
        let span = info_span!(
            "message",
            kind = invocation.kind().as_str(),
            message_type = invocation.message_type(),
            message_id = invocation.message_id(),
        );
        let _entered = span.enter();
        let started = Instant::now();
        let result = next.run(invocation);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(elapsed_ms, "message handled"),
            Err(err) => warn!(elapsed_ms, error = %err, "message handling failed"),
        }
        result
    }
}

/// Stops the chain when the invocation's token is cancelled, before and after the handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct CancellationMiddleware;

impl Middleware for CancellationMiddleware {
    fn name(&self) -> &str {
        "cancellation"
    }

    fn invoke(&self, invocation: &Invocation<'_>, next: Next<'_>) -> Result<(), HandlerError> {
        invocation.token().check("handler")?;
        next.run(invocation)?;
        invocation.token().check("completion")
    }
}

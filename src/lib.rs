//! Unitary: Unit-of-Work Flush Coordination
//!
//! An in-process CQRS framework. Message handlers run inside a unit-of-work scope; the
//! repositories and buffered event buses they touch are enlisted in the scope's context and
//! flushed together, partly in parallel, when the outermost scope completes.

pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod pipeline;
pub mod repository;
pub mod transaction;
pub mod uow;

pub use error::{
    ApiError, BoxError, HandlerError, RepositoryError, TransactionError, UnitOfWorkError,
};
pub use events::{EventBus, EventEnvelope};
pub use pipeline::{HandlerRegistry, Message, MessageProcessor, Query};
pub use repository::{Aggregate, Repository};
pub use transaction::Transaction;
pub use uow::{FlushContext, FlushSettings, UnitOfWork, UnitOfWorkContext, UnitOfWorkScope};

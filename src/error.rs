//! Error types for the unitary framework.

use thiserror::Error;

/// Error type returned by units of work, event buses and handlers that are
/// implemented outside this crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unit-of-work usage and flush errors
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    #[error("Scope has already been completed")]
    AlreadyCompleted,

    #[error("Scope has already been disposed")]
    Disposed,

    #[error("Invalid scope nesting: {0}")]
    InvalidNesting(String),

    #[error("No active unit-of-work context")]
    NoActiveContext,

    #[error("Unit of work '{unit}' failed to flush: {source}")]
    FlushFailed {
        unit: String,
        #[source]
        source: BoxError,
    },

    #[error("{} units of work failed to flush in parallel", .0.len())]
    ParallelFlushFailed(Vec<UnitOfWorkError>),

    #[error("Background flush of '{unit}' panicked: {message}")]
    BackgroundPanic { unit: String, message: String },

    #[error("Flush did not settle after {0} rounds")]
    FlushLimitExceeded(usize),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

/// Transaction errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Transaction {id} was aborted: {reason}")]
    Aborted { id: u64, reason: String },

    #[error("Transaction {id} still has {count} outstanding dependent transactions")]
    OutstandingDependents { id: u64, count: usize },

    #[error("Transaction {0} has already been committed")]
    AlreadyCommitted(u64),
}

/// Repository and aggregate store errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Aggregate not found: {0}")]
    NotFound(String),

    #[error("Aggregate already exists: {0}")]
    DuplicateKey(String),

    #[error("Concurrency conflict on {key}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("No active unit-of-work context")]
    NoActiveContext,

    #[error("Failed to publish aggregate events: {0}")]
    Publish(String),
}

/// Message and query handling errors
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("No handler registered for {0}")]
    NoHandler(String),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Operation was cancelled before {0}")]
    Cancelled(String),

    #[error("Unit of work error: {0}")]
    UnitOfWork(#[from] UnitOfWorkError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Handler failed: {0}")]
    Failed(#[source] BoxError),
}

/// Configuration and setup errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Handler(#[from] HandlerError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl UnitOfWorkError {
    /// Flattens nested parallel failures into the individual unit failures.
    pub fn into_failures(self) -> Vec<UnitOfWorkError> {
        match self {
            UnitOfWorkError::ParallelFlushFailed(errors) => errors
                .into_iter()
                .flat_map(UnitOfWorkError::into_failures)
                .collect(),
            other => vec![other],
        }
    }
}

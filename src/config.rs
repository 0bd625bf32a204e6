//! Configuration System
//!
//! Hierarchical configuration for flush dispatch, the message pipeline and logging. Values
//! are merged from defaults, config files and environment overrides, then validated.

use crate::logging::LoggingConfig;
use crate::pipeline::PipelineConfig;
use crate::uow::FlushSettings;
use serde::{Deserialize, Serialize};

mod facade;

mod merge {
    pub mod merge_policy;
}

mod sources {
    pub mod environment;
    pub mod global_file;
    pub mod workspace_file;
}

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitaryConfig {
    /// Unit-of-work flush dispatch
    #[serde(default)]
    pub flush: FlushSettings,

    /// Message processor settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Flush(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Flush(msg) => write!(f, "Flush: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl UnitaryConfig {
    /// Validate the entire configuration, reporting every problem found.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if let Err(e) = self.flush.validate() {
            errors.push(ValidationError::Flush(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

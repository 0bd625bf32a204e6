//! CLI route: single route table and run context.

use crate::cli::demo::run_demo;
use crate::cli::parse::Commands;
use crate::config::{ConfigLoader, UnitaryConfig};
use crate::error::ApiError;
use crate::uow::FlushSettings;
use std::path::PathBuf;
use tracing::info;

/// Runtime context for CLI execution: workspace and effective configuration.
pub struct RunContext {
    workspace_root: PathBuf,
    config: UnitaryConfig,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self {
            workspace_root,
            config,
        })
    }

    pub fn config(&self) -> &UnitaryConfig {
        &self.config
    }

    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Demo { format, sequential } => self.handle_demo(format, *sequential),
            Commands::Config { check } => self.handle_config(*check),
        }
    }

    fn handle_demo(&self, format: &str, sequential: bool) -> Result<String, ApiError> {
        let mut config = self.config.clone();
        if sequential {
            config.flush = FlushSettings {
                parallel: false,
                ..config.flush
            };
        }
        info!(
            workspace = %self.workspace_root.display(),
            parallel = config.flush.parallel,
            "running ledger demo"
        );
        let report = run_demo(&config)?;
        match format {
            "json" => serde_json::to_string_pretty(&report)
                .map_err(|e| ApiError::Serialization(e.to_string())),
            "text" => Ok(report.to_text()),
            other => Err(ApiError::ConfigError(format!(
                "Unknown output format: {} (must be 'text' or 'json')",
                other
            ))),
        }
    }

    fn handle_config(&self, check: bool) -> Result<String, ApiError> {
        if let Err(errors) = self.config.validate() {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            )));
        }
        if check {
            return Ok("Configuration is valid".to_string());
        }
        ConfigLoader::to_toml(&self.config).map_err(ApiError::from)
    }
}

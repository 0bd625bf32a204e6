//! Config loading facade: merges every source in precedence order.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::UnitaryConfig;
use config::{ConfigError, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads [`UnitaryConfig`] from defaults, config files and the environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the effective configuration for `workspace_root`.
    ///
    /// Precedence (lowest to highest): defaults, global file, `config/config.toml`,
    /// `config/{UNITARY_ENV}.toml`, `UNITARY__*` environment variables.
    pub fn load(workspace_root: &Path) -> Result<UnitaryConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root);
        let builder = environment::add_to_builder(builder);
        let config: UnitaryConfig = builder.build()?.try_deserialize()?;
        debug!(workspace = %workspace_root.display(), "configuration loaded");
        Ok(config)
    }

    /// Load a single TOML file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<UnitaryConfig, ConfigError> {
        merge_policy::builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()))
            .build()?
            .try_deserialize()
    }

    /// The built-in defaults.
    pub fn defaults() -> UnitaryConfig {
        UnitaryConfig::default()
    }

    /// Path of the global configuration file, if a home directory is known.
    pub fn xdg_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    /// Serialize the configuration back to TOML.
    pub fn to_toml(config: &UnitaryConfig) -> Result<String, ConfigError> {
        toml::to_string_pretty(config).map_err(|e| ConfigError::Message(e.to_string()))
    }
}

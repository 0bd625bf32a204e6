//! Workspace config files under `config/`.

use config::builder::DefaultState;
use config::{ConfigBuilder, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Workspace files in merge order: `config/config.toml`, then `config/{UNITARY_ENV}.toml` when
/// `UNITARY_ENV` is set.
pub fn config_files(workspace_root: &Path) -> Vec<PathBuf> {
    let dir = workspace_root.join("config");
    let mut files = vec![dir.join("config.toml")];
    if let Ok(env) = std::env::var("UNITARY_ENV") {
        if !env.is_empty() {
            files.push(dir.join(format!("{env}.toml")));
        }
    }
    files
}

/// Layer the workspace files that exist onto `builder`.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> ConfigBuilder<DefaultState> {
    config_files(workspace_root)
        .into_iter()
        .filter(|path| path.is_file())
        .fold(builder, |builder, path| {
            debug!(config_path = %path.display(), "adding workspace configuration");
            builder.add_source(File::from(path).required(false))
        })
}

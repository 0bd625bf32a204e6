//! CLI parse: clap types for unitary. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// unitary - unit-of-work flush coordination for message handlers
#[derive(Parser)]
#[command(name = "unitary")]
#[command(about = "Run messages through unit-of-work scopes and inspect configuration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes the file)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ledger scenario and print committed events and balances
    Demo {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
        /// Flush every unit on the calling thread
        #[arg(long)]
        sequential: bool,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Validate instead of printing
        #[arg(long)]
        check: bool,
    },
}

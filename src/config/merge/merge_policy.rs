//! Merge rules: defaults, override order, conflict handling.

use crate::logging::LoggingConfig;
use crate::pipeline::PipelineConfig;
use crate::uow::FlushSettings;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    let flush = FlushSettings::default();
    let pipeline = PipelineConfig::default();
    let logging = LoggingConfig::default();
    Config::builder()
        .set_default("flush.parallel", flush.parallel)?
        .set_default(
            "flush.max_background_flushes",
            flush.max_background_flushes as i64,
        )?
        .set_default("flush.max_rounds", flush.max_rounds as i64)?
        .set_default("pipeline.transactional", pipeline.transactional)?
        .set_default("pipeline.trace_messages", pipeline.trace_messages)?
        .set_default("logging.level", logging.level)?
        .set_default("logging.format", logging.format)?
        .set_default("logging.output", logging.output)
}

// ============================================================================
// LOGGING
// ============================================================================
// All log output goes to stderr; stdout is reserved for response documents.
// ============================================================================

use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{FunctionError, FunctionResult};

/// Map a configured level name to a filter; unknown names fall back to INFO.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Initialize the logging system based on configuration
pub fn init_logging(config: &LoggingConfig) -> FunctionResult<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter(&config.level).into())
        .from_env_lossy();

    match config.format.as_str() {
        "json" => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            );
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| FunctionError::Internal(format!("Failed to set logger: {}", e)))?;
        }
        "compact" => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_ansi(config.colors)
                    .with_target(true),
            );
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| FunctionError::Internal(format!("Failed to set logger: {}", e)))?;
        }
        _ => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_ansi(config.colors)
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            );
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| FunctionError::Internal(format!("Failed to set logger: {}", e)))?;
        }
    }

    info!(
        target: "rds_metrics::init",
        level = %config.level,
        format = %config.format,
        "Logging initialized"
    );

    Ok(())
}

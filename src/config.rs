// ============================================================================
// PROCESS CONFIGURATION
// ============================================================================
// Settings for the process hosting the function, as opposed to the per-request
// `Input`. Loaded from a TOML (or JSON) file, then overridden by environment
// variables such as `RDS_METRICS_SOURCE__ENDPOINT`.
// ============================================================================

use std::path::Path;

use figment::providers::{Env, Format, Json, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::metrics::Statistic;
use crate::{
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_METRICS, DEFAULT_PERIOD_SECS, DEFAULT_REGION,
    QUERY_GRANULARITY_SECS, RDS_INSTANCE_DIMENSION, RDS_NAMESPACE,
};

/// Prefix for environment overrides; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "RDS_METRICS_";

/// Longest lookback window accepted as a default (CloudWatch keeps 15 days of
/// one-minute data).
const MAX_PERIOD_SECS: u32 = 15 * 24 * 60 * 60;

// ----------------------------------------------------------------------------
// Root Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub query: QueryConfig,
}

impl FunctionConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Figment::new().merge(Json::file(path)),
            _ => Figment::new().merge(Toml::file(path)),
        };
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load from string (for testing)
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::invalid_value(
                "logging.level",
                format!("unknown level {:?}", self.logging.level),
            ));
        }

        if self.source.timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "source.timeout_secs",
                "timeout must be at least 1 second",
            ));
        }

        if let Some(endpoint) = &self.source.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::invalid_value(
                    "source.endpoint",
                    "endpoint must be an http(s) URL",
                ));
            }
        }

        if self.query.region.trim().is_empty() {
            return Err(ConfigError::invalid_value("query.region", "region must not be empty"));
        }

        if self.query.metrics.is_empty() || self.query.metrics.iter().any(|m| m.is_empty()) {
            return Err(ConfigError::invalid_value(
                "query.metrics",
                "default metric list must be non-empty and contain no empty names",
            ));
        }

        if self.query.period_secs == 0 || self.query.period_secs > MAX_PERIOD_SECS {
            return Err(ConfigError::invalid_value(
                "query.period_secs",
                format!("period must be between 1 and {} seconds", MAX_PERIOD_SECS),
            ));
        }

        // CloudWatch only accepts 1, 5, 10, 30 or multiples of 60 seconds.
        let granularity = self.query.granularity_secs;
        if !(matches!(granularity, 1 | 5 | 10 | 30) || (granularity > 0 && granularity % 60 == 0)) {
            return Err(ConfigError::invalid_value(
                "query.granularity_secs",
                "granularity must be 1, 5, 10, 30 or a multiple of 60",
            ));
        }

        if self.query.namespace.is_empty() || self.query.dimension.is_empty() {
            return Err(ConfigError::invalid_value(
                "query",
                "namespace and dimension must not be empty",
            ));
        }

        Ok(())
    }

    /// Create a default config file
    pub fn generate_default_config() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Metrics Source Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// GetMetricStatistics endpoint. Without one, only replayed samples work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ----------------------------------------------------------------------------
// Query Defaults
// ----------------------------------------------------------------------------

/// Values used when the request input leaves them out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,

    #[serde(default = "default_period_secs")]
    pub period_secs: u32,

    #[serde(default = "default_granularity_secs")]
    pub granularity_secs: u32,

    #[serde(default)]
    pub statistic: Statistic,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_dimension")]
    pub dimension: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            metrics: default_metrics(),
            period_secs: default_period_secs(),
            granularity_secs: default_granularity_secs(),
            statistic: Statistic::default(),
            namespace: default_namespace(),
            dimension: default_dimension(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "json".into()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_region() -> String {
    DEFAULT_REGION.into()
}

fn default_metrics() -> Vec<String> {
    DEFAULT_METRICS.iter().map(|m| m.to_string()).collect()
}

fn default_period_secs() -> u32 {
    DEFAULT_PERIOD_SECS
}

fn default_granularity_secs() -> u32 {
    QUERY_GRANULARITY_SECS
}

fn default_namespace() -> String {
    RDS_NAMESPACE.into()
}

fn default_dimension() -> String {
    RDS_INSTANCE_DIMENSION.into()
}

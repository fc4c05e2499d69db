//! # RDS Metrics Function
//!
//! A composition function that pulls CloudWatch metrics for an RDS instance,
//! reduces each metric's datapoints to the most recent sample, and writes the
//! resulting report into the status of the desired composite resource at a
//! caller-chosen path.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          RDS METRICS FUNCTION                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  REQUEST → INPUT/CREDS → SOURCE FETCH → REDUCER → STATUS RESOLVER           │
//! │          → PATH PARSER → TREE MUTATOR → DESIRED COMPOSITE + CONDITION        │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`path`]: dot/bracket field path parsing
//! - [`tree`]: nested mapping mutation over JSON trees
//! - [`resource`]: composite resource views and status resolution
//! - [`metrics`]: samples, reduction and the metrics report
//! - [`source`]: the metrics source trait and its HTTP/static implementations
//! - [`request`]: request/response/condition model
//! - [`function`]: the orchestrator that ties everything together
//! - [`config`], [`logging`], [`error`]: process configuration, log setup and
//!   the error types every stage reports through

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod function;
pub mod logging;
pub mod metrics;
pub mod path;
pub mod request;
pub mod resource;
pub mod source;
pub mod tree;

pub use config::FunctionConfig;
pub use error::{FunctionError, FunctionResult};
pub use function::MetricsFunction;
pub use metrics::{MetricResult, MetricSample, MetricsReport, Statistic};
pub use path::FieldPath;
pub use request::{Condition, ConditionReason, RunRequest, RunResponse};
pub use resource::Composite;
pub use source::{
    HttpConnector, HttpMetricsSource, MetricQuery, MetricsSource, SourceConnector,
    StaticMetricsSource,
};

// ============================================================================
// CONSTANTS & VERSION INFORMATION
// ============================================================================

/// Function version - follows semantic versioning
pub const FUNCTION_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FUNCTION_NAME: &str = "rds-metrics-function";
pub const FUNCTION_FULL_NAME: &str = "RDS Metrics Composition Function";

// ----------------------------------------------------------------------------
// Upstream Query Defaults
// ----------------------------------------------------------------------------

/// Region used when neither the input nor the config names one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Lookback window in seconds when the input omits `period`
pub const DEFAULT_PERIOD_SECS: u32 = 300;

/// Granularity of the upstream statistics query (seconds). Independent of `period`.
pub const QUERY_GRANULARITY_SECS: u32 = 60;

/// CloudWatch namespace for RDS instance metrics
pub const RDS_NAMESPACE: &str = "AWS/RDS";

/// Dimension that identifies a single RDS instance
pub const RDS_INSTANCE_DIMENSION: &str = "DBInstanceIdentifier";

/// Metrics fetched when the input does not list any
pub const DEFAULT_METRICS: [&str; 8] = [
    "CPUUtilization",
    "DatabaseConnections",
    "FreeableMemory",
    "FreeStorageSpace",
    "ReadIOPS",
    "WriteIOPS",
    "ReadLatency",
    "WriteLatency",
];

/// Default timeout for HTTP requests to the metrics endpoint (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

// ----------------------------------------------------------------------------
// Request & Response Conventions
// ----------------------------------------------------------------------------

/// Name of the credentials entry carrying the AWS keys
pub const CREDENTIALS_NAME: &str = "aws-creds";
pub const ACCESS_KEY_ID_FIELD: &str = "access-key-id";
pub const SECRET_ACCESS_KEY_FIELD: &str = "secret-access-key";

/// Prefix stripped from the target before path parsing
pub const STATUS_PREFIX: &str = "status.";

/// Condition type set on every invocation
pub const CONDITION_TYPE: &str = "FunctionSuccess";

/// Default time-to-live attached to responses (seconds)
pub const DEFAULT_RESPONSE_TTL_SECS: u64 = 60;

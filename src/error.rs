// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// Error types for every stage of an invocation. Each subsystem owns a small
// enum; the per-invocation ones fold into `FunctionError`, whose `reason()`
// decides which condition category the caller sees. `ConfigError` belongs to
// process startup and never reaches a condition.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

use crate::request::ConditionReason;

// ----------------------------------------------------------------------------
// Top-Level Function Error
// ----------------------------------------------------------------------------

/// The main error type for a function invocation.
#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("{0}")]
    Input(#[from] InputError),

    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("{0}")]
    Path(#[from] PathError),

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FunctionError {
    /// Condition reason reported to the caller for this error.
    pub fn reason(&self) -> ConditionReason {
        match self {
            FunctionError::Input(_) => ConditionReason::InvalidInput,
            FunctionError::Source(e) => e.reason(),
            // Path failures happen while writing the report into status.
            FunctionError::Path(_) => ConditionReason::SerializationError,
            FunctionError::Serialization { .. } => ConditionReason::SerializationError,
            FunctionError::Internal(_) => ConditionReason::InternalError,
        }
    }

    /// Short category label for logging.
    pub fn category(&self) -> &'static str {
        match self {
            FunctionError::Input(_) => "input",
            FunctionError::Source(_) => "source",
            FunctionError::Path(_) => "path",
            FunctionError::Serialization { .. } => "serialization",
            FunctionError::Internal(_) => "internal",
        }
    }

    /// Errors that also get a fatal result alongside the condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FunctionError::Input(
                InputError::MissingCredentials { .. } | InputError::MissingCredentialField { .. }
            )
        )
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        FunctionError::Serialization {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for FunctionError {
    fn from(e: serde_json::Error) -> Self {
        FunctionError::serialization(e.to_string())
    }
}

// ----------------------------------------------------------------------------
// Input Errors
// ----------------------------------------------------------------------------

/// Problems with the function input or the credentials attached to a request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("{field} is required")]
    MissingField { field: String },

    #[error("cannot decode function input: {message}")]
    Decode { message: String },

    #[error("failed to get {name} credentials")]
    MissingCredentials { name: String },

    #[error("{field} not found in credentials")]
    MissingCredentialField { field: String },
}

impl InputError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        InputError::MissingField {
            field: field.into(),
        }
    }

    pub fn missing_credential_field(field: impl Into<String>) -> Self {
        InputError::MissingCredentialField {
            field: field.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to process configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Metrics Source Errors
// ----------------------------------------------------------------------------

/// Errors from building or querying the upstream metrics source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Failed to create upstream client: {message}")]
    ClientConfig { message: String },

    #[error("Request for '{metric}' failed: {message}")]
    RequestFailed { metric: String, message: String },

    #[error("Upstream returned status {status} for '{metric}': {message}")]
    HttpStatus {
        metric: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response for '{metric}': {message}")]
    InvalidResponse { metric: String, message: String },

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("all {attempted} metric requests failed (last error: {last})")]
    AllFailed { attempted: usize, last: String },
}

impl SourceError {
    /// Client construction problems are configuration errors; everything
    /// else happened while fetching.
    pub fn reason(&self) -> ConditionReason {
        match self {
            SourceError::ClientConfig { .. } => ConditionReason::UpstreamConfigError,
            _ => ConditionReason::UpstreamFetchError,
        }
    }

    /// Whether a later invocation could plausibly succeed without changes.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SourceError::ClientConfig { .. } => false,
            SourceError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => true,
        }
    }

    /// The client itself is unusable: bad configuration or rejected
    /// credentials. Retrying another metric would fail the same way.
    pub fn is_client_failure(&self) -> bool {
        match self {
            SourceError::ClientConfig { .. } => true,
            SourceError::HttpStatus { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }

    pub fn client_config(message: impl Into<String>) -> Self {
        SourceError::ClientConfig {
            message: message.into(),
        }
    }

    pub fn request_failed(metric: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::RequestFailed {
            metric: metric.into(),
            message: message.into(),
        }
    }

    pub fn invalid_response(metric: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::InvalidResponse {
            metric: metric.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Path Errors
// ----------------------------------------------------------------------------

/// Errors from parsing a field path or writing through it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid key {input:?}: no path segments found")]
    InvalidPath { input: String },

    #[error("key {segment:?} exists but is not a map")]
    NotAMap { segment: String },
}

// ----------------------------------------------------------------------------
// Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for function operations
pub type FunctionResult<T> = Result<T, FunctionError>;

/// Result type for metrics source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for path parsing and tree mutation
pub type PathResult<T> = Result<T, PathError>;

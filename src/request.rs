// ============================================================================
// REQUEST, RESPONSE & CONDITIONS
// ============================================================================
// The data carried in and out of one function invocation. The transport that
// delivers these documents lives outside this crate; here they are plain
// serde types so they can be read from and written to JSON.
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::InputError;
use crate::metrics::Statistic;
use crate::resource::Composite;
use crate::{
    ACCESS_KEY_ID_FIELD, CONDITION_TYPE, CREDENTIALS_NAME, DEFAULT_RESPONSE_TTL_SECS,
    SECRET_ACCESS_KEY_FIELD,
};

// ----------------------------------------------------------------------------
// Function Input
// ----------------------------------------------------------------------------

/// User-supplied input for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// RDS instance identifier
    #[serde(default)]
    pub database_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Metric names; empty means the default set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,

    /// Lookback window in seconds; absent or zero means the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u32>,

    /// Where to write the report, e.g. `status.metricResults`
    #[serde(default)]
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistic: Option<Statistic>,
}

// ----------------------------------------------------------------------------
// Credentials
// ----------------------------------------------------------------------------

/// One named credentials entry attached to the request.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialData {
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Debug for CredentialData {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialData")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Static AWS key pair extracted from the request.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Debug for AwsCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Request
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(default)]
    pub tag: String,
}

/// Composite plus composed resources for one side of the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub composite: Composite,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Value>,
}

/// A single function invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub meta: RequestMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(default)]
    pub observed: State,

    #[serde(default)]
    pub desired: State,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, CredentialData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl RunRequest {
    /// Decode the function input. A missing input decodes to defaults.
    pub fn decode_input(&self) -> Result<Input, InputError> {
        match &self.input {
            None => Ok(Input::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| InputError::Decode {
                message: e.to_string(),
            }),
        }
    }

    /// Extract the AWS key pair from the `aws-creds` entry.
    pub fn aws_credentials(&self) -> Result<AwsCredentials, InputError> {
        let creds = self
            .credentials
            .get(CREDENTIALS_NAME)
            .ok_or_else(|| InputError::MissingCredentials {
                name: CREDENTIALS_NAME.to_string(),
            })?;

        let field = |name: &str| {
            creds
                .data
                .get(name)
                .cloned()
                .ok_or_else(|| InputError::missing_credential_field(name))
        };

        Ok(AwsCredentials {
            access_key_id: field(ACCESS_KEY_ID_FIELD)?,
            secret_access_key: field(SECRET_ACCESS_KEY_FIELD)?,
        })
    }
}

// ----------------------------------------------------------------------------
// Conditions & Results
// ----------------------------------------------------------------------------

/// Stable reason attached to the function's condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionReason {
    Success,
    InvalidInput,
    UpstreamConfigError,
    UpstreamFetchError,
    SerializationError,
    InternalError,
}

impl ConditionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::Success => "Success",
            ConditionReason::InvalidInput => "InvalidInput",
            ConditionReason::UpstreamConfigError => "UpstreamConfigError",
            ConditionReason::UpstreamFetchError => "UpstreamFetchError",
            ConditionReason::SerializationError => "SerializationError",
            ConditionReason::InternalError => "InternalError",
        }
    }
}

impl Display for ConditionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
}

/// Which objects a condition or result is surfaced on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Composite,
    CompositeAndClaim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub target: Target,
}

impl Condition {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            condition_type: CONDITION_TYPE.to_string(),
            status: ConditionStatus::True,
            reason: ConditionReason::Success,
            message: Some(message.into()),
            target: Target::CompositeAndClaim,
        }
    }

    pub fn failure(reason: ConditionReason, message: impl Into<String>) -> Self {
        Self {
            condition_type: CONDITION_TYPE.to_string(),
            status: ConditionStatus::False,
            reason,
            message: Some(message.into()),
            target: Target::CompositeAndClaim,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Warning,
    Fatal,
}

/// A free-form result message returned alongside conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub severity: Severity,
    pub message: String,
    pub target: Target,
}

// ----------------------------------------------------------------------------
// Response
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub tag: String,
    pub ttl_secs: u64,
}

/// The function's reply. Starts as a copy of the request's desired state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub meta: ResponseMeta,
    pub desired: State,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl RunResponse {
    /// Build a response for `req`, carrying over its desired state and tag.
    pub fn to(req: &RunRequest) -> Self {
        Self {
            meta: ResponseMeta {
                tag: req.meta.tag.clone(),
                ttl_secs: DEFAULT_RESPONSE_TTL_SECS,
            },
            desired: req.desired.clone(),
            results: Vec::new(),
            conditions: Vec::new(),
            context: None,
        }
    }

    /// Copy the pipeline context from the request, if there is one.
    pub fn preserve_context(&mut self, req: &RunRequest) {
        if let Some(context) = &req.context {
            self.context = Some(context.clone());
            info!(target: "rds_metrics::function", "Preserved existing context in response");
        }
    }

    pub fn set_condition(&mut self, condition: Condition) {
        self.conditions
            .retain(|c| c.condition_type != condition.condition_type);
        self.conditions.push(condition);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.results.push(ResultMessage {
            severity: Severity::Warning,
            message: message.into(),
            target: Target::CompositeAndClaim,
        });
    }

    pub fn fatal(&mut self, message: impl Into<String>) {
        self.results.push(ResultMessage {
            severity: Severity::Fatal,
            message: message.into(),
            target: Target::Composite,
        });
    }

    /// The function's own condition, if set.
    pub fn condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == CONDITION_TYPE)
    }

    pub fn is_fatal(&self) -> bool {
        self.results.iter().any(|r| r.severity == Severity::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> RunRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decode_input() {
        let req = request(json!({
            "input": {
                "apiVersion": "rds-metrics.fn.crossplane.io/v1beta1",
                "kind": "Input",
                "databaseName": "db-1",
                "metrics": ["CPUUtilization"],
                "period": 600,
                "target": "status.metricResults",
                "statistic": "SampleCount"
            }
        }));
        let input = req.decode_input().unwrap();
        assert_eq!(input.database_name, "db-1");
        assert_eq!(input.metrics, vec!["CPUUtilization"]);
        assert_eq!(input.period, Some(600));
        assert_eq!(input.statistic, Some(Statistic::SampleCount));
        assert_eq!(input.region, None);
    }

    #[test]
    fn test_decode_input_rejects_wrong_types() {
        let req = request(json!({"input": {"databaseName": 5}}));
        assert!(matches!(req.decode_input(), Err(InputError::Decode { .. })));
        assert_eq!(RunRequest::default().decode_input().unwrap(), Input::default());
    }

    #[test]
    fn test_aws_credentials() {
        let req = request(json!({
            "credentials": {
                "aws-creds": {"data": {"access-key-id": "AKID", "secret-access-key": "SECRET"}}
            }
        }));
        let creds = req.aws_credentials().unwrap();
        assert_eq!(creds.access_key_id, "AKID");
        assert_eq!(creds.secret_access_key, "SECRET");
        assert!(!format!("{:?}", creds).contains("SECRET"));
    }

    #[test]
    fn test_aws_credentials_missing() {
        assert_eq!(
            RunRequest::default().aws_credentials().unwrap_err(),
            InputError::MissingCredentials {
                name: "aws-creds".into()
            }
        );

        let req = request(json!({
            "credentials": {"aws-creds": {"data": {"access-key-id": "AKID"}}}
        }));
        assert_eq!(
            req.aws_credentials().unwrap_err(),
            InputError::missing_credential_field("secret-access-key")
        );
    }

    #[test]
    fn test_response_copies_desired_and_context() {
        let req = request(json!({
            "meta": {"tag": "abc"},
            "desired": {"composite": {"kind": "X"}, "resources": {"db": {"ready": true}}},
            "context": {"apiextensions.crossplane.io/environment": {"a": 1}}
        }));
        let mut rsp = RunResponse::to(&req);
        assert!(rsp.context.is_none());
        rsp.preserve_context(&req);

        assert_eq!(rsp.meta.tag, "abc");
        assert_eq!(rsp.desired, req.desired);
        assert_eq!(rsp.context, req.context);
    }

    #[test]
    fn test_set_condition_replaces_same_type() {
        let mut rsp = RunResponse::to(&RunRequest::default());
        rsp.set_condition(Condition::failure(ConditionReason::InternalError, "first"));
        rsp.set_condition(Condition::success("second"));

        assert_eq!(rsp.conditions.len(), 1);
        let condition = rsp.condition().unwrap();
        assert!(condition.is_true());
        assert_eq!(condition.reason, ConditionReason::Success);
    }

    #[test]
    fn test_condition_wire_shape() {
        let value = serde_json::to_value(Condition::failure(
            ConditionReason::InvalidInput,
            "DatabaseName is required",
        ))
        .unwrap();
        assert_eq!(
            value,
            json!({
                "type": "FunctionSuccess",
                "status": "False",
                "reason": "InvalidInput",
                "message": "DatabaseName is required",
                "target": "CompositeAndClaim"
            })
        );
    }
}

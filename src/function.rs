// ============================================================================
// FUNCTION ORCHESTRATOR
// ============================================================================
// Runs one invocation end to end:
//
//   input + credentials → upstream source → per-metric fetch & reduce →
//   report → status resolution → path write → desired composite + condition
//
// Every invocation produces a response carrying exactly one `FunctionSuccess`
// condition. Failures never escape as errors.
// ============================================================================

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueryConfig;
use crate::error::{FunctionError, FunctionResult, InputError, SourceError};
use crate::metrics::{MetricOutcome, MetricsReport, OmitReason};
use crate::path::FieldPath;
use crate::request::{Condition, ConditionReason, Input, RunRequest, RunResponse};
use crate::resource::{current_status, Composite};
use crate::source::{MetricQuery, MetricsSource, SourceConnector, UpstreamConfig};
use crate::tree::set_value;
use crate::STATUS_PREFIX;

// ----------------------------------------------------------------------------
// Resolved Invocation Parameters
// ----------------------------------------------------------------------------

/// Input after defaults have been applied.
#[derive(Debug, Clone, PartialEq)]
struct Invocation {
    database_name: String,
    region: String,
    metrics: Vec<String>,
    period_secs: u32,
    target: String,
}

impl Invocation {
    fn resolve(input: &Input, defaults: &QueryConfig) -> Result<Self, InputError> {
        if input.database_name.is_empty() {
            return Err(InputError::missing_field("DatabaseName"));
        }
        if input.target.is_empty() {
            return Err(InputError::missing_field("Target"));
        }

        let region = input
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| defaults.region.clone());

        let metrics = if input.metrics.is_empty() {
            defaults.metrics.clone()
        } else {
            input.metrics.clone()
        };

        let period_secs = match input.period {
            Some(period) if period > 0 => period,
            _ => defaults.period_secs,
        };

        Ok(Self {
            database_name: input.database_name.clone(),
            region,
            metrics,
            period_secs,
            target: input.target.clone(),
        })
    }

    /// Target with the leading `status.` removed; the report is always
    /// written relative to the status tree.
    fn status_relative_target(&self) -> &str {
        self.target
            .strip_prefix(STATUS_PREFIX)
            .unwrap_or(&self.target)
    }
}

// ----------------------------------------------------------------------------
// Metrics Function
// ----------------------------------------------------------------------------

/// Fetches RDS metrics and writes the report into composite status.
pub struct MetricsFunction {
    connector: Arc<dyn SourceConnector>,
    defaults: QueryConfig,
}

impl Debug for MetricsFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsFunction")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl MetricsFunction {
    pub fn new(connector: Arc<dyn SourceConnector>, defaults: QueryConfig) -> Self {
        Self {
            connector,
            defaults,
        }
    }

    /// Run one invocation. Always returns a response.
    pub async fn run_function(&self, req: &RunRequest, cancel: &CancellationToken) -> RunResponse {
        info!(target: "rds_metrics::function", tag = %req.meta.tag, "Running function");

        let mut rsp = RunResponse::to(req);
        rsp.preserve_context(req);

        let input = match req.decode_input() {
            Ok(input) => input,
            Err(e) => {
                error!(target: "rds_metrics::function", error = %e, "Failed to decode function input");
                rsp.set_condition(Condition::failure(
                    ConditionReason::InternalError,
                    "Something went wrong.",
                ));
                rsp.warning("something went wrong");
                rsp.fatal(format!("cannot get Function input: {}", e));
                return rsp;
            }
        };

        match self.execute(req, &input, cancel).await {
            Ok(composite) => {
                rsp.desired.composite = composite;
                info!(
                    target: "rds_metrics::function",
                    database = %input.database_name,
                    target_path = %input.target,
                    "Metrics written to status"
                );
                rsp.set_condition(Condition::success(format!(
                    "Successfully fetched metrics for RDS instance {}",
                    input.database_name
                )));
            }
            Err(e) => {
                warn!(
                    target: "rds_metrics::function",
                    category = e.category(),
                    reason = %e.reason(),
                    error = %e,
                    "Invocation failed"
                );
                if e.is_fatal() {
                    rsp.fatal(e.to_string());
                }
                rsp.set_condition(Condition::failure(e.reason(), failure_message(&e)));
            }
        }

        rsp
    }

    /// Everything after input decoding. Returns the desired composite to put
    /// in the response; on error the response keeps the request's copy.
    async fn execute(
        &self,
        req: &RunRequest,
        input: &Input,
        cancel: &CancellationToken,
    ) -> FunctionResult<Composite> {
        let credentials = req.aws_credentials()?;
        let invocation = Invocation::resolve(input, &self.defaults)?;

        let source = self.connector.connect(&UpstreamConfig {
            region: invocation.region.clone(),
            credentials,
        })?;

        let now = Utc::now();
        let queries = self.queries(&invocation, input, now);
        let outcomes = collect(source.as_ref(), queries, cancel).await?;

        let report = MetricsReport::from_outcomes(
            invocation.database_name.as_str(),
            invocation.region.as_str(),
            now,
            outcomes,
        );
        let value = report.to_value()?;

        let mut desired = req.desired.composite.clone();
        let mut status = current_status(&req.observed.composite, &mut desired);
        let path = FieldPath::parse(invocation.status_relative_target())?;
        set_value(&mut status, &path, value)?;
        desired.set_status(status);

        debug!(
            target: "rds_metrics::function",
            path = %path,
            metrics = report.metrics.len(),
            "Report written at status path"
        );
        Ok(desired)
    }

    fn queries(&self, invocation: &Invocation, input: &Input, now: DateTime<Utc>) -> Vec<MetricQuery> {
        let start = now - ChronoDuration::seconds(i64::from(invocation.period_secs));
        let statistic = input.statistic.unwrap_or(self.defaults.statistic);

        invocation
            .metrics
            .iter()
            .map(|metric| MetricQuery {
                database_name: invocation.database_name.clone(),
                metric_name: metric.clone(),
                namespace: self.defaults.namespace.clone(),
                dimension_name: self.defaults.dimension.clone(),
                start_time: start,
                end_time: now,
                granularity_secs: self.defaults.granularity_secs,
                statistic,
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Sequential Collection
// ----------------------------------------------------------------------------

/// Fetch and reduce every query in order.
///
/// A failed fetch omits that metric. Cancellation stops collection. The run
/// only fails when every fetch failed because the client itself was rejected.
async fn collect(
    source: &dyn MetricsSource,
    queries: Vec<MetricQuery>,
    cancel: &CancellationToken,
) -> Result<Vec<(String, MetricOutcome)>, SourceError> {
    let mut outcomes = Vec::with_capacity(queries.len());
    let mut last_error: Option<SourceError> = None;

    for query in queries {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        let outcome = match source.fetch(&query, cancel).await {
            Ok(samples) => MetricOutcome::from_samples(&samples),
            Err(SourceError::Cancelled) => {
                warn!(target: "rds_metrics::function", metric = %query.metric_name, "Fetch cancelled");
                return Err(SourceError::Cancelled);
            }
            Err(e) => {
                info!(
                    target: "rds_metrics::function",
                    source = source.name(),
                    metric = %query.metric_name,
                    error = %e,
                    recoverable = e.is_recoverable(),
                    "Failed to get metric, omitting it"
                );
                last_error = Some(e.clone());
                MetricOutcome::failed(e)
            }
        };

        if let MetricOutcome::Omitted(OmitReason::NoSamples) = &outcome {
            debug!(target: "rds_metrics::function", metric = %query.metric_name, "No datapoints in window");
        }
        outcomes.push((query.metric_name, outcome));
    }

    let all_rejected = !outcomes.is_empty()
        && outcomes.iter().all(|(_, outcome)| {
            matches!(outcome, MetricOutcome::Omitted(OmitReason::FetchFailed(e)) if e.is_client_failure())
        });
    if all_rejected {
        return Err(SourceError::AllFailed {
            attempted: outcomes.len(),
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        });
    }

    Ok(outcomes)
}

/// Condition message for a failed invocation.
pub fn failure_message(error: &FunctionError) -> String {
    match error {
        FunctionError::Source(SourceError::ClientConfig { message }) => {
            format!("Failed to create AWS config: {}", message)
        }
        FunctionError::Source(e) => format!("Failed to fetch RDS metrics: {}", e),
        FunctionError::Serialization { message } => {
            format!("Failed to serialize metrics: {}", message)
        }
        FunctionError::Path(e) => format!("Failed to put metrics result to status: {}", e),
        other => other.to_string(),
    }
}

// ============================================================================
// METRIC SAMPLES, REDUCTION & REPORT
// ============================================================================
// Each requested metric comes back as zero or more timestamped datapoints.
// The reducer keeps the most recent one; the report gathers one result per
// metric that actually produced data.
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FunctionError, FunctionResult, SourceError};

// ----------------------------------------------------------------------------
// Statistic Selection
// ----------------------------------------------------------------------------

/// Which upstream statistic becomes a sample's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Statistic {
    /// Mean over each granularity bucket
    #[default]
    Average,
    /// Number of raw datapoints in each granularity bucket
    SampleCount,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Average => "Average",
            Statistic::SampleCount => "SampleCount",
        }
    }
}

impl Display for Statistic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Samples & Results
// ----------------------------------------------------------------------------

/// A single datapoint reported by the metrics source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(value: f64, unit: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            unit: unit.into(),
            timestamp,
        }
    }
}

/// The value reported for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&MetricSample> for MetricResult {
    fn from(sample: &MetricSample) -> Self {
        Self {
            value: sample.value,
            unit: sample.unit.clone(),
            timestamp: sample.timestamp,
        }
    }
}

/// Reduce a metric's samples to the latest one.
///
/// Returns `None` for an empty slice. When several samples share the latest
/// timestamp the first of them wins.
pub fn reduce(samples: &[MetricSample]) -> Option<MetricResult> {
    let mut iter = samples.iter();
    let mut latest = iter.next()?;
    for sample in iter {
        if sample.timestamp > latest.timestamp {
            latest = sample;
        }
    }
    Some(MetricResult::from(latest))
}

// ----------------------------------------------------------------------------
// Per-Metric Outcome
// ----------------------------------------------------------------------------

/// What happened to one requested metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricOutcome {
    Collected(MetricResult),
    Omitted(OmitReason),
}

/// Why a metric is missing from the report.
#[derive(Debug, Clone, PartialEq)]
pub enum OmitReason {
    NoSamples,
    FetchFailed(SourceError),
}

impl MetricOutcome {
    /// Outcome of a successful fetch.
    pub fn from_samples(samples: &[MetricSample]) -> Self {
        match reduce(samples) {
            Some(result) => MetricOutcome::Collected(result),
            None => MetricOutcome::Omitted(OmitReason::NoSamples),
        }
    }

    pub fn failed(error: SourceError) -> Self {
        MetricOutcome::Omitted(OmitReason::FetchFailed(error))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, MetricOutcome::Omitted(OmitReason::FetchFailed(_)))
    }

    pub fn result(&self) -> Option<&MetricResult> {
        match self {
            MetricOutcome::Collected(result) => Some(result),
            MetricOutcome::Omitted(_) => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Metrics Report
// ----------------------------------------------------------------------------

/// The record written into the composite's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub database_name: String,
    pub region: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, MetricResult>,
}

impl MetricsReport {
    /// Assemble a report, keeping only metrics that produced a result.
    pub fn from_outcomes<I>(
        database_name: impl Into<String>,
        region: impl Into<String>,
        timestamp: DateTime<Utc>,
        outcomes: I,
    ) -> Self
    where
        I: IntoIterator<Item = (String, MetricOutcome)>,
    {
        let metrics = outcomes
            .into_iter()
            .filter_map(|(name, outcome)| match outcome {
                MetricOutcome::Collected(result) => Some((name, result)),
                MetricOutcome::Omitted(_) => None,
            })
            .collect();

        Self {
            database_name: database_name.into(),
            region: region.into(),
            timestamp,
            metrics,
        }
    }

    /// Convert into the JSON tree that gets written into status.
    pub fn to_value(&self) -> FunctionResult<Value> {
        let value = serde_json::to_value(self)?;
        if !value.is_object() {
            return Err(FunctionError::serialization(
                "metrics report did not serialize to an object",
            ));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn sample(secs: i64, value: f64) -> MetricSample {
        MetricSample::new(value, "Count", at(secs))
    }

    #[test]
    fn test_reduce_empty_is_absent() {
        assert_eq!(reduce(&[]), None);
    }

    #[test]
    fn test_reduce_picks_latest_regardless_of_order() {
        let orders = [
            vec![sample(1, 10.0), sample(3, 30.0), sample(2, 20.0)],
            vec![sample(3, 30.0), sample(2, 20.0), sample(1, 10.0)],
            vec![sample(2, 20.0), sample(1, 10.0), sample(3, 30.0)],
        ];
        for samples in orders {
            let result = reduce(&samples).unwrap();
            assert_eq!(result.timestamp, at(3));
            assert_eq!(result.value, 30.0);
        }
    }

    #[test]
    fn test_reduce_tie_keeps_first_seen() {
        let samples = vec![sample(1, 10.0), sample(5, 50.0), sample(5, 99.0)];
        assert_eq!(reduce(&samples).unwrap().value, 50.0);
    }

    #[test]
    fn test_reduce_carries_unit() {
        let samples = vec![MetricSample::new(42.0, "Percent", at(7))];
        assert_eq!(
            reduce(&samples),
            Some(MetricResult {
                value: 42.0,
                unit: "Percent".into(),
                timestamp: at(7),
            })
        );
    }

    #[test]
    fn test_outcomes() {
        assert_eq!(
            MetricOutcome::from_samples(&[]),
            MetricOutcome::Omitted(OmitReason::NoSamples)
        );
        assert!(!MetricOutcome::from_samples(&[]).is_failure());

        let failed = MetricOutcome::failed(SourceError::Cancelled);
        assert!(failed.is_failure());
        assert!(failed.result().is_none());

        let collected = MetricOutcome::from_samples(&[sample(1, 1.0)]);
        assert_eq!(collected.result().map(|r| r.value), Some(1.0));
    }

    #[test]
    fn test_report_skips_omitted_metrics() {
        let report = MetricsReport::from_outcomes(
            "db-1",
            "us-east-1",
            at(100),
            vec![
                ("CPUUtilization".to_string(), MetricOutcome::from_samples(&[sample(90, 12.5)])),
                ("ReadIOPS".to_string(), MetricOutcome::from_samples(&[])),
                (
                    "WriteIOPS".to_string(),
                    MetricOutcome::failed(SourceError::request_failed("WriteIOPS", "boom")),
                ),
            ],
        );

        assert_eq!(report.metrics.len(), 1);
        assert!(report.metrics.contains_key("CPUUtilization"));
    }

    #[test]
    fn test_report_wire_layout() {
        let report = MetricsReport::from_outcomes(
            "db-1",
            "eu-west-1",
            at(100),
            vec![(
                "CPUUtilization".to_string(),
                MetricOutcome::Collected(MetricResult {
                    value: 42.0,
                    unit: "Percent".into(),
                    timestamp: at(60),
                }),
            )],
        );

        assert_eq!(
            report.to_value().unwrap(),
            json!({
                "databaseName": "db-1",
                "region": "eu-west-1",
                "timestamp": "1970-01-01T00:01:40Z",
                "metrics": {
                    "CPUUtilization": {
                        "value": 42.0,
                        "unit": "Percent",
                        "timestamp": "1970-01-01T00:01:00Z"
                    }
                }
            })
        );
    }

    #[test]
    fn test_statistic_serde_names() {
        assert_eq!(serde_json::to_value(Statistic::SampleCount).unwrap(), json!("SampleCount"));
        let parsed: Statistic = serde_json::from_value(json!("Average")).unwrap();
        assert_eq!(parsed, Statistic::Average);
        assert_eq!(Statistic::default(), Statistic::Average);
    }
}

// ============================================================================
// METRICS SOURCES
// ============================================================================
// A metrics source answers one statistics query for one metric of one RDS
// instance. Sources are built per invocation by a `SourceConnector` from the
// region and credentials carried in the request.
//
// Two implementations live here:
// - `HttpMetricsSource`: posts a GetMetricStatistics-shaped request to an
//   HTTP endpoint (typically a local signing gateway in front of CloudWatch)
// - `StaticMetricsSource`: answers from samples held in memory; used to
//   replay recorded data from the CLI and in tests
// ============================================================================

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use reqwest::{Client as HttpClient, Url};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{SourceError, SourceResult};
use crate::metrics::{MetricSample, Statistic};
use crate::request::AwsCredentials;

/// Operation name sent in the `X-Amz-Target` header.
const GET_METRIC_STATISTICS_TARGET: &str = "GraniteServiceVersion20100801.GetMetricStatistics";

/// Longest error body echoed back in an `HttpStatus` error.
const MAX_ERROR_BODY_CHARS: usize = 256;

// ----------------------------------------------------------------------------
// Query & Upstream Description
// ----------------------------------------------------------------------------

/// One statistics query for a single metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub database_name: String,
    pub metric_name: String,
    pub namespace: String,
    pub dimension_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub granularity_secs: u32,
    pub statistic: Statistic,
}

impl MetricQuery {
    /// Length of the query window in seconds.
    pub fn window_secs(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }
}

/// Where and as whom to query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub region: String,
    pub credentials: AwsCredentials,
}

// ----------------------------------------------------------------------------
// Source Traits
// ----------------------------------------------------------------------------

/// A queryable source of metric datapoints.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Fetch every datapoint for `query`. Must return `SourceError::Cancelled`
    /// promptly once `cancel` fires.
    async fn fetch(
        &self,
        query: &MetricQuery,
        cancel: &CancellationToken,
    ) -> SourceResult<Vec<MetricSample>>;
}

/// Builds a source for one invocation's region and credentials.
pub trait SourceConnector: Send + Sync {
    fn connect(&self, upstream: &UpstreamConfig) -> SourceResult<Box<dyn MetricsSource>>;
}

// ----------------------------------------------------------------------------
// HTTP Source
// ----------------------------------------------------------------------------

/// Connector that produces [`HttpMetricsSource`]s against a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    endpoint: String,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

impl SourceConnector for HttpConnector {
    fn connect(&self, upstream: &UpstreamConfig) -> SourceResult<Box<dyn MetricsSource>> {
        Ok(Box::new(HttpMetricsSource::new(
            &self.endpoint,
            self.timeout,
            upstream,
        )?))
    }
}

/// Queries GetMetricStatistics over HTTP.
pub struct HttpMetricsSource {
    client: HttpClient,
    endpoint: Url,
    region: String,
    credentials: AwsCredentials,
}

impl Debug for HttpMetricsSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMetricsSource")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .finish()
    }
}

impl HttpMetricsSource {
    pub fn new(endpoint: &str, timeout: Duration, upstream: &UpstreamConfig) -> SourceResult<Self> {
        if upstream.region.trim().is_empty() {
            return Err(SourceError::client_config("region must not be empty"));
        }

        let endpoint = Url::parse(endpoint).map_err(|e| {
            SourceError::client_config(format!("invalid endpoint {:?}: {}", endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SourceError::client_config(format!(
                "unsupported endpoint scheme {:?}",
                endpoint.scheme()
            )));
        }

        let client = HttpClient::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| SourceError::client_config(e.to_string()))?;

        debug!(
            target: "rds_metrics::source::http",
            endpoint = %endpoint,
            region = %upstream.region,
            "HTTP metrics source ready"
        );

        Ok(Self {
            client,
            endpoint,
            region: upstream.region.clone(),
            credentials: upstream.credentials.clone(),
        })
    }

    fn request_body<'a>(&'a self, query: &'a MetricQuery) -> StatisticsRequest<'a> {
        StatisticsRequest {
            region: &self.region,
            namespace: &query.namespace,
            metric_name: &query.metric_name,
            dimensions: vec![Dimension {
                name: &query.dimension_name,
                value: &query.database_name,
            }],
            start_time: query.start_time,
            end_time: query.end_time,
            period: query.granularity_secs,
            statistics: vec![query.statistic.as_str()],
        }
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(
        &self,
        query: &MetricQuery,
        cancel: &CancellationToken,
    ) -> SourceResult<Vec<MetricSample>> {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        let metric = query.metric_name.as_str();

        let send = self
            .client
            .post(self.endpoint.clone())
            .header("X-Amz-Target", GET_METRIC_STATISTICS_TARGET)
            .basic_auth(
                &self.credentials.access_key_id,
                Some(&self.credentials.secret_access_key),
            )
            .json(&self.request_body(query))
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            result = send => result.map_err(|e| SourceError::request_failed(metric, e.to_string()))?,
        };

        let status = response.status();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            result = response.text() => result.map_err(|e| SourceError::request_failed(metric, e.to_string()))?,
        };

        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                metric: metric.to_string(),
                status: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: StatisticsResponse = serde_json::from_str(&body)
            .map_err(|e| SourceError::invalid_response(metric, e.to_string()))?;
        let samples = decode_datapoints(metric, query.statistic, parsed.datapoints)?;

        debug!(
            target: "rds_metrics::source::http",
            metric = %metric,
            datapoints = samples.len(),
            "Fetched datapoints"
        );
        Ok(samples)
    }
}

// ----------------------------------------------------------------------------
// Wire Format
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StatisticsRequest<'a> {
    region: &'a str,
    namespace: &'a str,
    metric_name: &'a str,
    dimensions: Vec<Dimension<'a>>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    period: u32,
    statistics: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Dimension<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatisticsResponse {
    #[serde(default)]
    datapoints: Vec<Datapoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Datapoint {
    timestamp: WireTimestamp,
    #[serde(default)]
    average: Option<f64>,
    #[serde(default)]
    sample_count: Option<f64>,
    #[serde(default)]
    unit: Option<String>,
}

/// CloudWatch's JSON protocol sends epoch seconds; gateways often send RFC 3339.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Epoch(f64),
    Text(String),
}

impl WireTimestamp {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Epoch(secs) => {
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9) as u32;
                Utc.timestamp_opt(whole as i64, nanos).single()
            }
            WireTimestamp::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Turn datapoints into samples, taking the value from the selected statistic.
/// Datapoints that lack that statistic are skipped.
fn decode_datapoints(
    metric: &str,
    statistic: Statistic,
    datapoints: Vec<Datapoint>,
) -> SourceResult<Vec<MetricSample>> {
    let mut samples = Vec::with_capacity(datapoints.len());
    for point in datapoints {
        let value = match statistic {
            Statistic::Average => point.average,
            Statistic::SampleCount => point.sample_count,
        };
        let Some(value) = value else {
            continue;
        };
        let timestamp = point.timestamp.to_utc().ok_or_else(|| {
            SourceError::invalid_response(metric, format!("bad timestamp {:?}", point.timestamp))
        })?;
        samples.push(MetricSample::new(
            value,
            point.unit.unwrap_or_default(),
            timestamp,
        ));
    }
    Ok(samples)
}

// ----------------------------------------------------------------------------
// Static Source
// ----------------------------------------------------------------------------

/// In-memory source keyed by metric name.
///
/// Returns the recorded samples for a metric whatever the query window.
/// Clones share the log of issued queries, so a clone handed to the function
/// can be inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct StaticMetricsSource {
    samples: HashMap<String, Vec<MetricSample>>,
    failures: HashMap<String, SourceError>,
    connect_error: Option<SourceError>,
    queries: Arc<Mutex<Vec<MetricQuery>>>,
    connections: Arc<Mutex<Vec<String>>>,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(mut self, metric: impl Into<String>, samples: Vec<MetricSample>) -> Self {
        self.samples.insert(metric.into(), samples);
        self
    }

    /// Make every fetch of `metric` fail with `error`.
    pub fn with_failure(mut self, metric: impl Into<String>, error: SourceError) -> Self {
        self.failures.insert(metric.into(), error);
        self
    }

    /// Make `connect` fail with `error`.
    pub fn with_connect_error(mut self, error: SourceError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Load samples from JSON of the form `{"MetricName": [{value, unit, timestamp}]}`.
    pub fn from_json(json: &str) -> SourceResult<Self> {
        let samples: HashMap<String, Vec<MetricSample>> = serde_json::from_str(json)
            .map_err(|e| SourceError::client_config(format!("invalid samples: {}", e)))?;
        Ok(Self {
            samples,
            ..Self::default()
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SourceResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SourceError::client_config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Queries issued so far, in order.
    pub fn queries(&self) -> Vec<MetricQuery> {
        self.queries.lock().clone()
    }

    /// Regions passed to `connect` so far.
    pub fn connected_regions(&self) -> Vec<String> {
        self.connections.lock().clone()
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(
        &self,
        query: &MetricQuery,
        cancel: &CancellationToken,
    ) -> SourceResult<Vec<MetricSample>> {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        self.queries.lock().push(query.clone());

        if let Some(error) = self.failures.get(&query.metric_name) {
            return Err(error.clone());
        }
        Ok(self
            .samples
            .get(&query.metric_name)
            .cloned()
            .unwrap_or_default())
    }
}

impl SourceConnector for StaticMetricsSource {
    fn connect(&self, upstream: &UpstreamConfig) -> SourceResult<Box<dyn MetricsSource>> {
        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }
        self.connections.lock().push(upstream.region.clone());
        info!(
            target: "rds_metrics::source::static",
            region = %upstream.region,
            metrics = self.samples.len(),
            "Using static metrics source"
        );
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn upstream(region: &str) -> UpstreamConfig {
        UpstreamConfig {
            region: region.into(),
            credentials: AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "SECRET".into(),
            },
        }
    }

    fn query(metric: &str, statistic: Statistic) -> MetricQuery {
        let end = Utc.timestamp_opt(1_700_000_300, 0).unwrap();
        MetricQuery {
            database_name: "db-1".into(),
            metric_name: metric.into(),
            namespace: "AWS/RDS".into(),
            dimension_name: "DBInstanceIdentifier".into(),
            start_time: end - chrono::Duration::seconds(300),
            end_time: end,
            granularity_secs: 60,
            statistic,
        }
    }

    /// Accept one connection, capture the raw request, answer with `status`/`body`.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (url, handle)
    }

    #[test]
    fn test_decode_average_and_skip_missing() {
        let response: StatisticsResponse = serde_json::from_str(
            r#"{"Datapoints": [
                {"Timestamp": 1700000000, "Average": 12.5, "Unit": "Percent"},
                {"Timestamp": "2023-11-14T22:14:20Z", "Average": 13.0, "Unit": "Percent"},
                {"Timestamp": 1700000120, "SampleCount": 5.0, "Unit": "Percent"}
            ]}"#,
        )
        .unwrap();

        let samples =
            decode_datapoints("CPUUtilization", Statistic::Average, response.datapoints).unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 12.5);
        assert_eq!(samples[0].timestamp, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert_eq!(samples[1].timestamp, Utc.timestamp_opt(1_700_000_060, 0).unwrap());
        assert_eq!(samples[1].unit, "Percent");
    }

    #[test]
    fn test_decode_sample_count() {
        let response: StatisticsResponse = serde_json::from_str(
            r#"{"Datapoints": [{"Timestamp": 1700000000, "Average": 1.0, "SampleCount": 60.0}]}"#,
        )
        .unwrap();
        let samples =
            decode_datapoints("ReadIOPS", Statistic::SampleCount, response.datapoints).unwrap();
        assert_eq!(samples[0].value, 60.0);
        assert_eq!(samples[0].unit, "");
    }

    #[test]
    fn test_decode_bad_timestamp() {
        let response: StatisticsResponse =
            serde_json::from_str(r#"{"Datapoints": [{"Timestamp": "yesterday", "Average": 1.0}]}"#)
                .unwrap();
        let err = decode_datapoints("ReadIOPS", Statistic::Average, response.datapoints)
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse { .. }));
    }

    #[test]
    fn test_connector_rejects_bad_endpoint_and_region() {
        let connector = HttpConnector::new("not a url", Duration::from_secs(1));
        assert!(matches!(
            connector.connect(&upstream("us-east-1")),
            Err(SourceError::ClientConfig { .. })
        ));

        let connector = HttpConnector::new("ftp://gateway", Duration::from_secs(1));
        assert!(connector.connect(&upstream("us-east-1")).is_err());

        let connector = HttpConnector::new("http://127.0.0.1:8080", Duration::from_secs(1));
        assert!(connector.connect(&upstream(" ")).is_err());
        assert!(connector.connect(&upstream("eu-west-1")).is_ok());
    }

    #[tokio::test]
    async fn test_http_fetch_posts_query() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"Label":"CPUUtilization","Datapoints":[{"Timestamp":1700000240,"Average":42.0,"Unit":"Percent"}]}"#,
        )
        .await;
        let source = HttpMetricsSource::new(&url, Duration::from_secs(5), &upstream("eu-west-1")).unwrap();

        let samples = source
            .fetch(&query("CPUUtilization", Statistic::Average), &CancellationToken::new())
            .await
            .unwrap();
        let request = server.await.unwrap();

        assert_eq!(samples, vec![MetricSample::new(
            42.0,
            "Percent",
            Utc.timestamp_opt(1_700_000_240, 0).unwrap()
        )]);
        assert!(request.starts_with("POST / HTTP/1.1"));
        let lower = request.to_ascii_lowercase();
        assert!(lower.contains("x-amz-target: graniteserviceversion20100801.getmetricstatistics"));
        assert!(lower.contains("authorization: basic "));
        assert!(request.contains(r#""MetricName":"CPUUtilization""#));
        assert!(request.contains(r#""Region":"eu-west-1""#));
        assert!(request.contains(r#""Statistics":["Average"]"#));
        assert!(request.contains(r#""Period":60"#));
        assert!(request.contains(r#"{"Name":"DBInstanceIdentifier","Value":"db-1"}"#));
    }

    #[tokio::test]
    async fn test_http_fetch_reports_status() {
        let (url, server) = serve_once("403 Forbidden", r#"{"message":"denied"}"#).await;
        let source = HttpMetricsSource::new(&url, Duration::from_secs(5), &upstream("us-east-1")).unwrap();

        let err = source
            .fetch(&query("ReadIOPS", Statistic::Average), &CancellationToken::new())
            .await
            .unwrap_err();
        server.await.unwrap();

        assert_eq!(
            err,
            SourceError::HttpStatus {
                metric: "ReadIOPS".into(),
                status: 403,
                message: r#"{"message":"denied"}"#.into(),
            }
        );
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_http_fetch_honours_cancellation() {
        let source = HttpMetricsSource::new(
            "http://127.0.0.1:9",
            Duration::from_secs(5),
            &upstream("us-east-1"),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = source
            .fetch(&query("ReadIOPS", Statistic::Average), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, SourceError::Cancelled);
    }

    #[tokio::test]
    async fn test_static_source_records_queries() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let source = StaticMetricsSource::new()
            .with_samples("CPUUtilization", vec![MetricSample::new(1.0, "Percent", at)])
            .with_failure("ReadIOPS", SourceError::request_failed("ReadIOPS", "throttled"));
        let connected = source.connect(&upstream("ap-south-1")).unwrap();
        let cancel = CancellationToken::new();

        let cpu = connected
            .fetch(&query("CPUUtilization", Statistic::Average), &cancel)
            .await
            .unwrap();
        let missing = connected
            .fetch(&query("FreeableMemory", Statistic::Average), &cancel)
            .await
            .unwrap();
        let failed = connected
            .fetch(&query("ReadIOPS", Statistic::Average), &cancel)
            .await;

        assert_eq!(cpu.len(), 1);
        assert!(missing.is_empty());
        assert!(failed.is_err());
        assert_eq!(source.connected_regions(), vec!["ap-south-1"]);
        let names: Vec<_> = source.queries().into_iter().map(|q| q.metric_name).collect();
        assert_eq!(names, vec!["CPUUtilization", "FreeableMemory", "ReadIOPS"]);
    }

    #[test]
    fn test_static_source_from_json() {
        let source = StaticMetricsSource::from_json(
            r#"{"FreeableMemory": [{"value": 1024.0, "unit": "Bytes", "timestamp": "2024-01-01T00:00:00Z"}]}"#,
        )
        .unwrap();
        assert_eq!(source.samples["FreeableMemory"][0].unit, "Bytes");
        assert!(StaticMetricsSource::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_static_source_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");
        std::fs::write(
            &path,
            r#"{"ReadIOPS": [{"value": 3.0, "timestamp": "2024-01-01T00:00:00Z"}]}"#,
        )
        .unwrap();

        let source = StaticMetricsSource::from_file(&path).unwrap();
        assert_eq!(source.samples["ReadIOPS"][0].value, 3.0);
        assert!(StaticMetricsSource::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_query_window() {
        assert_eq!(query("CPUUtilization", Statistic::Average).window_secs(), 300);
    }
}

//! Delivery of record payloads to the ingestion endpoints.
//!
//! One [`Transport`] instance is shared by the batching worker and the span
//! exporter. Every send is a JSON POST with a per-endpoint timeout, retried
//! with exponential backoff; exhausted retries surface as a
//! [`TransportError`] to the caller, never as a panic.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use healops::healops_debug;
use healops::logs::LogRecord;
use healops_http::HttpClient;
use http::{header::CONTENT_TYPE, Method, Request};
use serde::Serialize;
use url::Url;

use crate::error::TransportError;
use crate::retry::{retry_with_exponential_backoff, RetryPolicy};
use crate::span_export::SpanEnvelope;

/// Single-record ingestion path.
pub(crate) const LOGS_PATH: &str = "/ingest/logs";
/// Batch ingestion path.
pub(crate) const LOGS_BATCH_PATH: &str = "/ingest/logs/batch";
/// Span ingestion path. The credential travels in the body on this one.
pub(crate) const SPANS_PATH: &str = "/otel/errors";

/// Credential header for the log endpoints.
pub(crate) const API_KEY_HEADER: &str = "X-HealOps-Key";

const SINGLE_TIMEOUT: Duration = Duration::from_secs(3);
const BATCH_TIMEOUT: Duration = Duration::from_secs(5);
const SPAN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
struct BatchPayload<'a> {
    logs: &'a [LogRecord],
}

pub(crate) struct Transport {
    client: Arc<dyn HttpClient>,
    endpoint: Url,
    api_key: String,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl Transport {
    pub(crate) fn new(client: Arc<dyn HttpClient>, endpoint: Url, api_key: String) -> Self {
        Transport {
            client,
            endpoint,
            api_key,
        }
    }

    /// POST one record to `/ingest/logs`.
    pub(crate) async fn send_single(&self, record: &LogRecord) -> Result<(), TransportError> {
        let body = serde_json::to_vec(record)?;
        self.post(LOGS_PATH, body, SINGLE_TIMEOUT, true).await
    }

    /// POST a batch envelope `{"logs": [...]}` to `/ingest/logs/batch`.
    pub(crate) async fn send_batch(&self, records: &[LogRecord]) -> Result<(), TransportError> {
        let body = serde_json::to_vec(&BatchPayload { logs: records })?;
        self.post(LOGS_BATCH_PATH, body, BATCH_TIMEOUT, true).await
    }

    /// POST a span envelope to `/otel/errors`. The API key is embedded in the
    /// envelope body rather than sent as a header.
    pub(crate) async fn send_spans(&self, envelope: &SpanEnvelope) -> Result<(), TransportError> {
        let body = serde_json::to_vec(envelope)?;
        self.post(SPANS_PATH, body, SPAN_TIMEOUT, false).await
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    async fn post(
        &self,
        path: &'static str,
        body: Vec<u8>,
        timeout: Duration,
        key_header: bool,
    ) -> Result<(), TransportError> {
        let uri = self
            .endpoint
            .join(path)
            .map_err(|err| TransportError::Send {
                endpoint: path,
                message: err.to_string(),
            })?;

        retry_with_exponential_backoff(RetryPolicy::default(), path, || {
            self.attempt(path, uri.as_str(), body.clone(), timeout, key_header)
        })
        .await
    }

    async fn attempt(
        &self,
        path: &'static str,
        uri: &str,
        body: Vec<u8>,
        timeout: Duration,
        key_header: bool,
    ) -> Result<(), TransportError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if key_header {
            builder = builder.header(API_KEY_HEADER, self.api_key.as_str());
        }
        let request = builder.body(body).map_err(|err| TransportError::Send {
            endpoint: path,
            message: err.to_string(),
        })?;

        let response = match tokio::time::timeout(timeout, self.client.send(request)).await {
            Err(_) => {
                return Err(TransportError::Timeout {
                    endpoint: path,
                    timeout,
                })
            }
            Ok(Err(err)) => {
                return Err(TransportError::Send {
                    endpoint: path,
                    message: err.to_string(),
                })
            }
            Ok(Ok(response)) => response,
        };

        if response.status().is_success() {
            Ok(())
        } else {
            healops_debug!(name: "Transport.NonSuccessStatus", endpoint = path, status = response.status().as_u16());
            Err(TransportError::Status {
                endpoint: path,
                status: response.status().as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingClient;
    use healops::logs::Severity;

    fn transport(client: &Arc<RecordingClient>) -> Transport {
        Transport::new(
            client.clone() as Arc<dyn HttpClient>,
            Url::parse("https://ingest.example").unwrap(),
            "test-key".to_string(),
        )
    }

    #[tokio::test]
    async fn single_send_posts_json_with_key_header() {
        let client = Arc::new(RecordingClient::ok());
        let record = LogRecord::new("svc", Severity::Info, "hello");

        transport(&client).send_single(&record).await.unwrap();

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].uri, "https://ingest.example/ingest/logs");
        assert_eq!(
            requests[0].header("content-type").as_deref(),
            Some("application/json")
        );
        assert_eq!(requests[0].header("x-healops-key").as_deref(), Some("test-key"));
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["message"], "hello");
        assert_eq!(body["severity"], "INFO");
    }

    #[tokio::test]
    async fn batch_send_wraps_records_in_logs_envelope() {
        let client = Arc::new(RecordingClient::ok());
        let records = vec![
            LogRecord::new("svc", Severity::Info, "one"),
            LogRecord::new("svc", Severity::Warning, "two"),
        ];

        transport(&client).send_batch(&records).await.unwrap();

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].uri, "https://ingest.example/ingest/logs/batch");
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["logs"].as_array().unwrap().len(), 2);
        assert_eq!(body["logs"][1]["severity"], "WARNING");
    }

    #[tokio::test]
    async fn failing_endpoint_is_retried_three_times_total() {
        let client = Arc::new(RecordingClient::with_statuses(vec![500, 500, 500]));
        let record = LogRecord::new("svc", Severity::Info, "hello");

        let err = transport(&client).send_single(&record).await.unwrap_err();

        assert!(matches!(
            err,
            TransportError::Status {
                endpoint: LOGS_PATH,
                status: 500
            }
        ));
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn recovery_mid_retry_returns_ok() {
        let client = Arc::new(RecordingClient::with_statuses(vec![503, 200]));
        let record = LogRecord::new("svc", Severity::Info, "hello");

        transport(&client).send_single(&record).await.unwrap();
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test]
    async fn span_send_omits_key_header() {
        let client = Arc::new(RecordingClient::ok());
        let envelope = SpanEnvelope::new("test-key", "svc", Vec::new());

        transport(&client).send_spans(&envelope).await.unwrap();

        let requests = client.requests();
        assert_eq!(requests[0].uri, "https://ingest.example/otel/errors");
        assert_eq!(requests[0].header("x-healops-key"), None);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["apiKey"], "test-key");
        assert_eq!(body["serviceName"], "svc");
    }
}

//! Test doubles for exercising the pipeline without a network.
//!
//! [`RecordingClient`] stands in for the HTTP client and stores every
//! request it sees; [`InMemorySpanExporter`] collects exported spans. Both
//! are useful for assertions in unit tests and for debugging integrations.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use healops::trace::SpanData;
use healops_http::{HttpClient, HttpError};
use http::{Request, Response};

use crate::error::SdkResult;
use crate::span_export::SpanExporter;

/// A request captured by [`RecordingClient`].
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    /// Request method.
    pub method: String,
    /// Full request URI.
    pub uri: String,
    /// Header pairs, lowercased names.
    pub headers: Vec<(String, String)>,
    /// Raw request body.
    pub body: Vec<u8>,
}

impl CapturedRequest {
    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    /// Parse the body as JSON.
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// An [`HttpClient`] that records requests and replays scripted responses.
#[derive(Debug)]
pub struct RecordingClient {
    requests: Mutex<Vec<CapturedRequest>>,
    responses: Mutex<VecDeque<(u16, Vec<u8>)>>,
    default_status: u16,
    error: Option<String>,
}

impl RecordingClient {
    /// Answer every request with `200 OK` and an empty body.
    pub fn ok() -> Self {
        RecordingClient {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            default_status: 200,
            error: None,
        }
    }

    /// Answer requests with the given statuses in order, then `404`.
    pub fn with_statuses(statuses: Vec<u16>) -> Self {
        Self::with_responses(statuses.into_iter().map(|status| (status, Vec::new())).collect())
    }

    /// Answer requests with the given status/body pairs in order, then `404`.
    pub fn with_responses(responses: Vec<(u16, Vec<u8>)>) -> Self {
        RecordingClient {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into()),
            default_status: 404,
            error: None,
        }
    }

    /// Fail every request with a client-level error.
    pub fn erroring(message: impl Into<String>) -> Self {
        RecordingClient {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            default_status: 200,
            error: Some(message.into()),
        }
    }

    /// Every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.lock_requests().clone()
    }

    fn lock_requests(&self) -> MutexGuard<'_, Vec<CapturedRequest>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HttpClient for RecordingClient {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError> {
        let captured = CapturedRequest {
            method: request.method().to_string(),
            uri: request.uri().to_string(),
            headers: request
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_ascii_lowercase(),
                        value.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect(),
            body: request.into_body(),
        };
        self.lock_requests().push(captured);

        if let Some(message) = &self.error {
            return Err(message.clone().into());
        }

        let (status, body) = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or((self.default_status, Vec::new()));

        Ok(Response::builder()
            .status(status)
            .body(Bytes::from(body))?)
    }
}

/// A [`SpanExporter`] that stores exported spans in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemorySpanExporter {
    /// The spans exported so far.
    pub fn exported_spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SpanExporter for InMemorySpanExporter {
    async fn export(&self, batch: Vec<SpanData>) -> SdkResult {
        self.spans
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(batch);
        Ok(())
    }
}

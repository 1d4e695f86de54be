//! Capture of failed network calls.
//!
//! [`InstrumentedClient`] wraps any [`HttpClient`]: responses with status
//! `>= 400` and client-level failures produce an ERROR record, and the
//! original outcome is handed back to the caller untouched — errors are
//! re-raised so user-visible semantics around failed requests stay intact.
//! The SDK's own transport always uses the raw client, never the wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use healops::logs::{keys, Metadata, RecordType, Severity};
use healops_http::{HttpClient, HttpError};
use http::{Request, Response};
use serde_json::Value;

use crate::enrich::capture_synthetic_stack;
use crate::logger::LoggerHandle;

/// An [`HttpClient`] wrapper that reports failed calls to the log façade.
#[derive(Debug)]
pub struct InstrumentedClient {
    inner: Arc<dyn HttpClient>,
    logger: LoggerHandle,
}

impl InstrumentedClient {
    pub(crate) fn new(inner: Arc<dyn HttpClient>, logger: LoggerHandle) -> Self {
        InstrumentedClient { inner, logger }
    }

    fn base_metadata(kind: RecordType, url: &str, method: &str, stack: Option<String>) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(
            keys::TYPE.to_string(),
            Value::String(kind.as_str().to_string()),
        );
        metadata.insert(keys::URL.to_string(), Value::String(url.to_string()));
        metadata.insert(keys::METHOD.to_string(), Value::String(method.to_string()));
        if let Some(stack) = stack {
            // Wrapper frames are excised later during stack cleaning.
            metadata.insert(keys::STACK.to_string(), Value::String(stack));
        }
        metadata
    }
}

#[async_trait]
impl HttpClient for InstrumentedClient {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError> {
        let url = request.uri().to_string();
        let method = request.method().to_string();
        let stack = capture_synthetic_stack();

        match self.inner.send(request).await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status >= 400 {
                    let mut metadata =
                        Self::base_metadata(RecordType::HttpError, &url, &method, stack);
                    metadata.insert(keys::STATUS.to_string(), Value::from(status));
                    self.logger.log_with(
                        Severity::Error,
                        format!("HTTP {method} {url} failed with status {status}"),
                        metadata,
                    );
                }
                Ok(response)
            }
            Err(err) => {
                let message = err.to_string();
                let mut metadata =
                    Self::base_metadata(RecordType::NetworkError, &url, &method, stack);
                metadata.insert(
                    keys::ERROR_NAME.to_string(),
                    Value::String("NetworkError".to_string()),
                );
                metadata.insert(
                    keys::ERROR_MESSAGE.to_string(),
                    Value::String(message.clone()),
                );
                self.logger.log_with(
                    Severity::Error,
                    format!("Network request to {url} failed: {message}"),
                    metadata,
                );
                Err(err)
            }
        }
    }
}

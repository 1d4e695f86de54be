//! HTTP client abstraction for the HealOps SDK.
//!
//! The SDK talks to the ingestion endpoints (and fetches source maps) through
//! the [`HttpClient`] trait so that hosts can bring the HTTP stack of their
//! choice. A [`reqwest`] implementation ships behind the default `reqwest`
//! feature.

#![warn(unreachable_pub)]

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

/// Opaque error returned by [`HttpClient`] implementations.
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A minimal interface necessary to ship record payloads over HTTP.
///
/// Implementations are expected to perform the request and hand back the
/// full response; the SDK decides how to treat non-success statuses.
#[async_trait]
pub trait HttpClient: Debug + Send + Sync {
    /// Send the request and return the collected response.
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError>;
}

#[cfg(feature = "reqwest")]
#[async_trait]
impl HttpClient for reqwest::Client {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError> {
        let request = request.try_into()?;
        let mut response = self.execute(request).await?;
        let headers = std::mem::take(response.headers_mut());
        let status = response.status();
        let body = response.bytes().await?;

        let mut converted = Response::builder().status(status).body(body)?;
        *converted.headers_mut() = headers;
        Ok(converted)
    }
}

/// Extension trait mapping non-success statuses to errors.
pub trait ResponseExt: Sized {
    /// Return an error when the response status is not in the 2xx range.
    fn error_for_status(self) -> Result<Self, HttpError>;
}

impl<T> ResponseExt for Response<T> {
    fn error_for_status(self) -> Result<Self, HttpError> {
        if self.status().is_success() {
            Ok(self)
        } else {
            Err(format!("request failed with status {}", self.status()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_for_status_accepts_2xx() {
        let response = Response::builder().status(204).body(()).unwrap();
        assert!(response.error_for_status().is_ok());
    }

    #[test]
    fn error_for_status_rejects_4xx() {
        let response = Response::builder().status(404).body(()).unwrap();
        let err = response.error_for_status().unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[cfg(feature = "reqwest")]
    mod reqwest_client {
        use super::super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn round_trips_status_and_body() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/ingest/logs"))
                .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
                .mount(&server)
                .await;

            let request = Request::builder()
                .method(http::Method::POST)
                .uri(format!("{}/ingest/logs", server.uri()))
                .body(b"{}".to_vec())
                .unwrap();

            let response = reqwest::Client::new().send(request).await.unwrap();
            assert_eq!(response.status(), 200);
            assert_eq!(response.body().as_ref(), b"ok");
        }
    }
}

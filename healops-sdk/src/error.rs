//! Error types surfaced by SDK lifecycle operations.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
/// Errors that can occur during SDK operations flush() and destroy().
pub enum SdkError {
    /// Destroy has already been invoked.
    ///
    /// Destroy is idempotent and calling it twice has no effect on delivery,
    /// but this error suggests another part of the application tears the
    /// logger down earlier than intended.
    #[error("Destroy already invoked")]
    AlreadyShutdown,

    /// Operation timed out before completing.
    ///
    /// This does not necessarily indicate a delivery failure; in-flight
    /// requests run to completion in the background.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation failed due to an internal error.
    ///
    /// The message is intended for diagnostics only and is not part of the
    /// stable API.
    #[error("Operation failed: {0}")]
    InternalFailure(String),
}

/// A specialized `Result` type for lifecycle operations.
pub type SdkResult = Result<(), SdkError>;

/// Errors produced while validating logger configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The API key is missing or empty.
    #[error("apiKey must be a non-empty string")]
    MissingApiKey,

    /// The service name is missing or empty.
    #[error("serviceName must be a non-empty string")]
    MissingServiceName,

    /// The endpoint override could not be parsed as a URL.
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// No HTTP client is available (the `reqwest` feature is disabled and
    /// none was supplied).
    #[error("no HTTP client configured")]
    NoHttpClient,
}

/// Errors returned by the transport layer after retries are exhausted.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The endpoint answered with a non-2xx status.
    #[error("{endpoint} returned status {status}")]
    Status {
        /// Endpoint path that failed.
        endpoint: &'static str,
        /// HTTP status code of the final attempt.
        status: u16,
    },

    /// The request did not complete within its timeout.
    #[error("request to {endpoint} timed out after {timeout:?}")]
    Timeout {
        /// Endpoint path that failed.
        endpoint: &'static str,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The HTTP client failed before a response was available.
    #[error("request to {endpoint} failed: {message}")]
    Send {
        /// Endpoint path that failed.
        endpoint: &'static str,
        /// Stringified client error.
        message: String,
    },

    /// The payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),
}

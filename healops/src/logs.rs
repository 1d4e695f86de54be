//! Log record data model.
//!
//! A [`LogRecord`] is the unit shipped to the HealOps ingestion endpoints.
//! Severity is a fixed four-level scale; everything situational (caller
//! location, exception details, arbitrary caller-supplied context) travels
//! in the free-form [`Metadata`] map using the keys in [`keys`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form metadata attached to a log record.
///
/// Well-known entries use the key constants in [`keys`]; anything else is
/// passed through to the wire untouched.
pub type Metadata = serde_json::Map<String, Value>;

/// Severity of a log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Routine information.
    Info,
    /// Something surprising but recoverable.
    Warning,
    /// A failure that affected the current operation.
    Error,
    /// A failure that affected the whole process.
    Critical,
}

impl Severity {
    /// The uppercase wire representation of this severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Whether records of this severity carry an `exception` sub-record.
    pub fn is_exceptional(&self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin classification for captured records.
///
/// Stored under [`keys::TYPE`] in record metadata so the ingestion side can
/// distinguish interception paths from direct façade calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// A global error event the host did not handle.
    UnhandledError,
    /// An async failure nothing awaited.
    UnhandledPromiseRejection,
    /// An HTTP response with status >= 400 observed by the network wrapper.
    HttpError,
    /// A network-level failure (connect, timeout) observed by the wrapper.
    NetworkError,
    /// A process-level uncaught exception (panic).
    UncaughtException,
}

impl RecordType {
    /// The snake_case wire representation of this record type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::UnhandledError => "unhandled_error",
            RecordType::UnhandledPromiseRejection => "unhandled_promise_rejection",
            RecordType::HttpError => "http_error",
            RecordType::NetworkError => "network_error",
            RecordType::UncaughtException => "uncaught_exception",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exception details synthesized for ERROR and CRITICAL records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    /// Error class name, e.g. `"TypeError"`. Defaults to `"Error"`.
    #[serde(rename = "type")]
    pub exception_type: String,
    /// Human-readable error message.
    pub message: String,
    /// Stack trace in the originating runtime's text format, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

impl Exception {
    /// Build an exception sub-record from its parts.
    pub fn new(
        exception_type: impl Into<String>,
        message: impl Into<String>,
        stacktrace: Option<String>,
    ) -> Self {
        Exception {
            exception_type: exception_type.into(),
            message: message.into(),
            stacktrace,
        }
    }
}

/// A single log record in wire shape.
///
/// Serializes to exactly the JSON accepted by `POST /ingest/logs`:
/// `service_name`, `severity`, `message`, `source`, `timestamp` (RFC 3339
/// string), optional `release`/`environment`, and the nested `metadata` map.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    /// Logical service emitting the record.
    pub service_name: String,
    /// Record severity.
    pub severity: Severity,
    /// Log message body.
    pub message: String,
    /// Source tag, e.g. `"healops-sdk"`.
    pub source: String,
    /// Time the record was enqueued, UTC.
    pub timestamp: DateTime<Utc>,
    /// Release identifier attached to every record, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Deployment environment, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Free-form and well-known metadata.
    pub metadata: Metadata,
}

impl LogRecord {
    /// Create a record with the current time and empty metadata.
    pub fn new(
        service_name: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        LogRecord {
            service_name: service_name.into(),
            severity,
            message: message.into(),
            source: "healops-sdk".to_string(),
            timestamp: Utc::now(),
            release: None,
            environment: None,
            metadata: Metadata::new(),
        }
    }
}

/// Well-known metadata keys.
pub mod keys {
    /// Resolved source file path of the call site.
    pub const FILE_PATH: &str = "filePath";
    /// 1-based line of the call site.
    pub const LINE: &str = "line";
    /// 0-based column of the call site.
    pub const COLUMN: &str = "column";
    /// Function name of the call site, when the stack frame carried one.
    pub const FUNCTION_NAME: &str = "functionName";
    /// Cleaned stack trace (SDK and interceptor frames removed).
    pub const STACK: &str = "stack";
    /// Original error stack as supplied by the caller, if distinct.
    pub const ERROR_STACK: &str = "errorStack";
    /// Exception sub-record (`{type, message, stacktrace}`).
    pub const EXCEPTION: &str = "exception";
    /// Record type tag, see [`super::RecordType`].
    pub const TYPE: &str = "type";
    /// Error class name supplied by the caller.
    pub const ERROR_NAME: &str = "errorName";
    /// Error message supplied by the caller.
    pub const ERROR_MESSAGE: &str = "errorMessage";
    /// Request URL captured by the network wrapper.
    pub const URL: &str = "url";
    /// HTTP method captured by the network wrapper.
    pub const METHOD: &str = "method";
    /// HTTP status captured by the network wrapper.
    pub const STATUS: &str = "status";
}

//! Finished-span data model.
//!
//! [`SpanData`] is the exporter-facing snapshot of a finished span as handed
//! over by the host tracing runtime, analogous to the exporter input of any
//! OpenTelemetry SDK. The HealOps wire shape lives in the span exporter; this
//! module only carries the structural model.

use std::time::SystemTime;

use serde_json::Value;

/// Attribute map carried by spans, events and resources.
pub type AttributeMap = serde_json::Map<String, Value>;

/// Span status code, numeric on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusCode {
    /// Status left unset by the instrumentation.
    #[default]
    Unset,
    /// The operation completed successfully.
    Ok,
    /// The operation failed.
    Error,
}

impl StatusCode {
    /// Numeric wire representation (`0` unset, `1` ok, `2` error).
    pub fn as_u8(&self) -> u8 {
        match self {
            StatusCode::Unset => 0,
            StatusCode::Ok => 1,
            StatusCode::Error => 2,
        }
    }
}

/// Status of a finished span.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpanStatus {
    /// Status code.
    pub code: StatusCode,
    /// Optional status description, usually only present on errors.
    pub message: Option<String>,
}

impl SpanStatus {
    /// An error status with the given description.
    pub fn error(message: impl Into<String>) -> Self {
        SpanStatus {
            code: StatusCode::Error,
            message: Some(message.into()),
        }
    }

    /// An ok status with no description.
    pub fn ok() -> Self {
        SpanStatus {
            code: StatusCode::Ok,
            message: None,
        }
    }
}

/// A timestamped event recorded on a span.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanEvent {
    /// Event name; exception events use the name `"exception"`.
    pub name: String,
    /// Time the event was recorded.
    pub time: SystemTime,
    /// Event attributes.
    pub attributes: AttributeMap,
}

impl SpanEvent {
    /// Create an event with the given name and attributes.
    pub fn new(name: impl Into<String>, time: SystemTime, attributes: AttributeMap) -> Self {
        SpanEvent {
            name: name.into(),
            time,
            attributes,
        }
    }
}

/// All the information collected for a finished span.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Hex-encoded trace id.
    pub trace_id: String,
    /// Hex-encoded span id.
    pub span_id: String,
    /// Hex-encoded parent span id, absent for root spans.
    pub parent_span_id: Option<String>,
    /// Span name.
    pub name: String,
    /// Span start time.
    pub start_time: SystemTime,
    /// Span end time.
    pub end_time: SystemTime,
    /// Span attributes.
    pub attributes: AttributeMap,
    /// Events recorded while the span was live.
    pub events: Vec<SpanEvent>,
    /// Final status.
    pub status: SpanStatus,
    /// Attributes of the resource that produced this span.
    pub resource: AttributeMap,
}

impl SpanData {
    /// A minimal span for the given ids and name, starting and ending now.
    ///
    /// Intended for instrumentation glue and tests; real spans come from the
    /// host tracing runtime with their recorded times.
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let now = SystemTime::now();
        SpanData {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            name: name.into(),
            start_time: now,
            end_time: now,
            attributes: AttributeMap::new(),
            events: Vec::new(),
            status: SpanStatus::default(),
            resource: AttributeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_numeric() {
        assert_eq!(StatusCode::Unset.as_u8(), 0);
        assert_eq!(StatusCode::Ok.as_u8(), 1);
        assert_eq!(StatusCode::Error.as_u8(), 2);
    }

    #[test]
    fn error_status_carries_message() {
        let status = SpanStatus::error("connection reset");
        assert_eq!(status.code, StatusCode::Error);
        assert_eq!(status.message.as_deref(), Some("connection reset"));
    }
}

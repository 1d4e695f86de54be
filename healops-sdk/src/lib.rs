//! Client-side observability SDK for the HealOps platform.
//!
//! The SDK transparently captures application log output, uncaught
//! exceptions, failed network calls and distributed-tracing spans; enriches
//! each record with its originating source location (resolved through
//! build-time source maps when necessary); buffers records into size- and
//! time-bounded batches; and ships them to the ingestion endpoints over
//! HTTPS with bounded retries.
//!
//! ```ascii
//!   +-----+--------------+   +----------+   +---------+   +-----------+
//!   |     |              |   |          |   |         |   |           |
//!   | app | logger.info()+--->  enrich  +--->  batch  +--->  deliver  |
//!   +-----+--------------+   +----------+   +---------+   +-----------+
//! ```
//!
//! # Getting Started
//!
//! ```no_run
//! use healops_sdk::Logger;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let logger = Logger::builder("my-api-key", "checkout")
//!         .with_release("2024.06.1")
//!         .build()?;
//!
//!     logger.info("service started");
//!
//!     // drain buffered records before exit
//!     logger.destroy()?;
//!     Ok(())
//! }
//! ```
//!
//! Logging is fire-and-forget: every public entry point returns immediately
//! and no SDK failure is ever surfaced into the hosting application's
//! control flow. With the default capture flags the logger also intercepts
//! the global [`console`] sink, installs a panic hook, and runs the span
//! exporter; all three are unwound by [`Logger::destroy`].

#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod console;
pub mod testing;

mod batch;
mod config;
mod enrich;
mod error;
mod handlers;
mod http_capture;
mod logger;
mod retry;
mod sourcemap;
mod span_export;
mod stack;
mod transport;

pub use config::{
    Config, ConfigBuilder, HEALOPS_DEBUG, HEALOPS_DEBUG_SOURCEMAPS, HEALOPS_ENVIRONMENT,
    HEALOPS_RELEASE,
};
pub use error::{ConfigError, SdkError, SdkResult, TransportError};
pub use http_capture::InstrumentedClient;
pub use logger::{Logger, LoggerBuilder};
pub use sourcemap::{
    is_bundled_path, OriginalPosition, SourceMapConsumer, SourceMapError, SourceMapResolver,
};
pub use span_export::{
    BatchSpanProcessor, BatchSpanProcessorBuilder, HealOpsSpanExporter, SpanExporter,
};
pub use stack::{Frame, StackFilter};

// The data model lives in the `healops` crate; re-exported here so most
// hosts only depend on the SDK.
pub use healops::logs::{keys, Exception, LogRecord, Metadata, RecordType, Severity};
pub use healops::semconv;
pub use healops::trace::{AttributeMap, SpanData, SpanEvent, SpanStatus, StatusCode};

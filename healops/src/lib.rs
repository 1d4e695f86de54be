//! Data model for the HealOps observability SDK.
//!
//! This crate defines the types shared between the SDK pipeline
//! ([`healops-sdk`]), the transport layer ([`healops-http`]) and log
//! appenders: log records and their severity scale, finished span data as
//! handed over by a tracing runtime, and the semantic-convention attribute
//! keys attached during record enrichment. It carries no I/O of its own.
//!
//! [`healops-sdk`]: https://crates.io/crates/healops-sdk
//! [`healops-http`]: https://crates.io/crates/healops-http
//!
//! # Getting Started
//!
//! ```
//! use healops::logs::{LogRecord, Severity};
//!
//! let record = LogRecord::new("checkout", Severity::Info, "order placed");
//! assert_eq!(record.severity, Severity::Info);
//! ```

#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod logs;
pub mod semconv;
pub mod trace;

mod internal_logging;

//! Bridge `log` into HealOps.
//!
//! This library implements a log appender for the [`log`] crate backed by the
//! HealOps [`Logger`] façade: installed once at startup, it forwards every
//! record the host emits through the `log` macros into the capture pipeline,
//! alongside whatever the console interceptor picks up.
//!
//! # Getting Started
//!
//! ```no_run
//! use healops_appender_log::HealOpsLogBridge;
//! use healops_sdk::Logger;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let logger = Logger::builder("my-api-key", "checkout").build()?;
//!
//!     HealOpsLogBridge::install(&logger)?;
//!
//!     log::warn!("cache miss rate above threshold");
//!     Ok(())
//! }
//! ```
//!
//! # Mapping Log Records
//!
//! The message is the stringified [`log::Record::args`]. Levels map onto the
//! HealOps severity scale:
//!
//! | `log::Level` | Severity |
//! | ------------ | -------- |
//! | `Error`      | ERROR    |
//! | `Warn`       | WARNING  |
//! | `Info`       | INFO     |
//! | `Debug`      | INFO     |
//! | `Trace`      | INFO     |
//!
//! The record's target travels in metadata under `target`; source file and
//! line, when the host compiled them in, become the standard `filePath`/
//! `line` metadata so enrichment emits the `code.*` attributes for them.

#![warn(missing_docs, unreachable_pub)]

use healops_sdk::{keys, Logger, Metadata, Severity};
use log::{LevelFilter, Metadata as LogMetadata, Record, SetLoggerError};
use serde_json::Value;

/// A [`log::Log`] implementation forwarding into a HealOps [`Logger`].
#[derive(Clone, Debug)]
pub struct HealOpsLogBridge {
    logger: Logger,
}

impl HealOpsLogBridge {
    /// Create a bridge for the given logger.
    pub fn new(logger: &Logger) -> Self {
        HealOpsLogBridge {
            logger: logger.clone(),
        }
    }

    /// Install the bridge as the global `log` logger, capturing all levels.
    pub fn install(logger: &Logger) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(HealOpsLogBridge::new(logger)))?;
        log::set_max_level(LevelFilter::Trace);
        Ok(())
    }

    /// Map one `log` record into the capture pipeline.
    pub fn forward(&self, record: &Record<'_>) {
        let severity = match record.level() {
            log::Level::Error => Severity::Error,
            log::Level::Warn => Severity::Warning,
            log::Level::Info | log::Level::Debug | log::Level::Trace => Severity::Info,
        };

        let mut metadata = Metadata::new();
        metadata.insert(
            "target".to_string(),
            Value::String(record.target().to_string()),
        );
        if let Some(file) = record.file() {
            metadata.insert(keys::FILE_PATH.to_string(), Value::String(file.to_string()));
            if let Some(line) = record.line() {
                metadata.insert(keys::LINE.to_string(), Value::from(line));
            }
        }

        self.logger
            .log(severity, record.args().to_string(), metadata);
    }
}

impl log::Log for HealOpsLogBridge {
    fn enabled(&self, _metadata: &LogMetadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.forward(record);
    }

    fn flush(&self) {
        let _ = self.logger.flush();
    }
}

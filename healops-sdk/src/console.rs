//! The global console sink and its interceptor.
//!
//! Hosts route their developer-facing console output through the pluggable
//! process-global [`ConsoleSink`] — the five primitives [`log`], [`info`],
//! [`warn`], [`error`] and [`debug`] dispatch to whatever sink is currently
//! installed. The [`ConsoleInterceptor`] swaps in a wrapper that forwards to
//! the stored original (the user keeps seeing their output), coerces the
//! argument list to a single message string, and mirrors the call into the
//! log façade at the standard severity mapping.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use healops::logs::{keys, Metadata, Severity};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};

use crate::enrich::in_sdk_scope;
use crate::logger::LoggerHandle;

/// The five standard console channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleChannel {
    /// Plain output.
    Log,
    /// Informational output.
    Info,
    /// Warnings.
    Warn,
    /// Errors.
    Error,
    /// Debug output.
    Debug,
}

/// Error-shaped console argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetails {
    /// Error class name.
    pub name: String,
    /// Error message.
    pub message: String,
    /// Stack trace, when available.
    pub stack: Option<String>,
}

/// One argument of a console call.
#[derive(Clone, Debug)]
pub enum ConsoleArg {
    /// Plain text.
    Text(String),
    /// A structured value, JSON-rendered when coerced.
    Json(Value),
    /// An error value; on the `error` channel its details are attached to
    /// the captured record.
    Error(ErrorDetails),
}

impl ConsoleArg {
    /// A plain-text argument.
    pub fn text(text: impl Into<String>) -> Self {
        ConsoleArg::Text(text.into())
    }

    /// A structured argument. Values that fail to serialize fall back to
    /// their `Debug` rendering.
    pub fn serialize<T: Serialize + fmt::Debug>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => ConsoleArg::Json(value),
            Err(_) => ConsoleArg::Text(format!("{value:?}")),
        }
    }

    /// An error-shaped argument.
    pub fn error(
        name: impl Into<String>,
        message: impl Into<String>,
        stack: Option<String>,
    ) -> Self {
        ConsoleArg::Error(ErrorDetails {
            name: name.into(),
            message: message.into(),
            stack,
        })
    }

    fn render(&self) -> String {
        match self {
            ConsoleArg::Text(text) => text.clone(),
            ConsoleArg::Json(value) => value.to_string(),
            ConsoleArg::Error(details) => format!("{}: {}", details.name, details.message),
        }
    }
}

impl From<&str> for ConsoleArg {
    fn from(text: &str) -> Self {
        ConsoleArg::Text(text.to_string())
    }
}

impl From<String> for ConsoleArg {
    fn from(text: String) -> Self {
        ConsoleArg::Text(text)
    }
}

/// Coerce a variadic argument list to the single message string.
pub(crate) fn coerce_args(args: &[ConsoleArg]) -> String {
    args.iter()
        .map(ConsoleArg::render)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Receiver of console output.
pub trait ConsoleSink: Send + Sync + fmt::Debug {
    /// Write one console call.
    fn write(&self, channel: ConsoleChannel, args: &[ConsoleArg]);
}

/// The default sink: stdout for `log`/`info`/`debug`, stderr for
/// `warn`/`error`.
#[derive(Debug, Default)]
pub struct StdStreamsSink;

impl ConsoleSink for StdStreamsSink {
    fn write(&self, channel: ConsoleChannel, args: &[ConsoleArg]) {
        let message = coerce_args(args);
        match channel {
            ConsoleChannel::Warn | ConsoleChannel::Error => eprintln!("{message}"),
            _ => println!("{message}"),
        }
    }
}

static GLOBAL_CONSOLE: Lazy<RwLock<Arc<dyn ConsoleSink>>> =
    Lazy::new(|| RwLock::new(Arc::new(StdStreamsSink)));

/// The currently installed console sink.
pub fn console() -> Arc<dyn ConsoleSink> {
    GLOBAL_CONSOLE
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Replace the global console sink, returning the previous one.
pub fn set_console(sink: Arc<dyn ConsoleSink>) -> Arc<dyn ConsoleSink> {
    let mut global = GLOBAL_CONSOLE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    std::mem::replace(&mut *global, sink)
}

/// Write to the `log` channel of the current sink.
pub fn log(args: &[ConsoleArg]) {
    console().write(ConsoleChannel::Log, args);
}

/// Write to the `info` channel of the current sink.
pub fn info(args: &[ConsoleArg]) {
    console().write(ConsoleChannel::Info, args);
}

/// Write to the `warn` channel of the current sink.
pub fn warn(args: &[ConsoleArg]) {
    console().write(ConsoleChannel::Warn, args);
}

/// Write to the `error` channel of the current sink.
pub fn error(args: &[ConsoleArg]) {
    console().write(ConsoleChannel::Error, args);
}

/// Write to the `debug` channel of the current sink.
pub fn debug(args: &[ConsoleArg]) {
    console().write(ConsoleChannel::Debug, args);
}

/// Replaces the global console sink with a capturing wrapper.
///
/// `start`/`stop` are idempotent. Note that when two interceptors are
/// started in sequence, stopping the second restores the sink the second
/// saw, which is the first interceptor's wrapper; preventing that nesting is
/// the host's responsibility.
#[derive(Debug)]
pub struct ConsoleInterceptor {
    logger: LoggerHandle,
    original: Mutex<Option<Arc<dyn ConsoleSink>>>,
}

impl ConsoleInterceptor {
    pub(crate) fn new(logger: LoggerHandle) -> Self {
        ConsoleInterceptor {
            logger,
            original: Mutex::new(None),
        }
    }

    /// Install the capturing wrapper, storing the current sink.
    pub fn start(&self) {
        let mut original = self
            .original
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if original.is_some() {
            return;
        }
        let mut global = GLOBAL_CONSOLE
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = global.clone();
        *global = Arc::new(CaptureSink {
            inner: previous.clone(),
            logger: self.logger.clone(),
        });
        *original = Some(previous);
    }

    /// Restore the stored original sink.
    pub fn stop(&self) {
        if let Some(previous) = self
            .original
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            set_console(previous);
        }
    }
}

#[derive(Debug)]
struct CaptureSink {
    inner: Arc<dyn ConsoleSink>,
    logger: LoggerHandle,
}

impl ConsoleSink for CaptureSink {
    fn write(&self, channel: ConsoleChannel, args: &[ConsoleArg]) {
        self.inner.write(channel, args);

        // SDK internals write through the original only.
        if in_sdk_scope() {
            return;
        }

        let severity = match channel {
            ConsoleChannel::Log | ConsoleChannel::Info | ConsoleChannel::Debug => Severity::Info,
            ConsoleChannel::Warn => Severity::Warning,
            ConsoleChannel::Error => Severity::Error,
        };

        let mut metadata = Metadata::new();
        if channel == ConsoleChannel::Error {
            if let Some(ConsoleArg::Error(details)) = args
                .iter()
                .find(|arg| matches!(arg, ConsoleArg::Error(_)))
            {
                metadata.insert(
                    keys::ERROR_NAME.to_string(),
                    Value::String(details.name.clone()),
                );
                metadata.insert(
                    keys::ERROR_MESSAGE.to_string(),
                    Value::String(details.message.clone()),
                );
                if let Some(stack) = &details.stack {
                    metadata.insert(keys::ERROR_STACK.to_string(), Value::String(stack.clone()));
                    metadata.insert(keys::STACK.to_string(), Value::String(stack.clone()));
                }
                metadata.insert(
                    keys::EXCEPTION.to_string(),
                    json!({
                        "type": details.name,
                        "message": details.message,
                        "stacktrace": details.stack,
                    }),
                );
            }
        }

        self.logger.log_with(severity, coerce_args(args), metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The console registry is process-global; tests touching it take this
    // lock to keep each other honest.
    pub(crate) static CONSOLE_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[derive(Debug, Default)]
    struct ProbeSink {
        calls: Mutex<Vec<(ConsoleChannel, String)>>,
    }

    impl ConsoleSink for ProbeSink {
        fn write(&self, channel: ConsoleChannel, args: &[ConsoleArg]) {
            self.calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((channel, coerce_args(args)));
        }
    }

    #[test]
    fn coercion_joins_and_renders_arguments() {
        let message = coerce_args(&[
            ConsoleArg::text("user"),
            ConsoleArg::Json(json!({"id": 7})),
            ConsoleArg::error("TypeError", "x is not a function", None),
        ]);
        assert_eq!(message, "user {\"id\":7} TypeError: x is not a function");
    }

    #[test]
    fn unserializable_values_fall_back_to_debug() {
        #[derive(Debug)]
        struct Opaque;
        impl Serialize for Opaque {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("circular"))
            }
        }

        match ConsoleArg::serialize(&Opaque) {
            ConsoleArg::Text(text) => assert_eq!(text, "Opaque"),
            other => panic!("expected text fallback, got {other:?}"),
        }
    }

    #[test]
    fn primitives_dispatch_to_installed_sink() {
        let _lock = CONSOLE_TEST_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let probe = Arc::new(ProbeSink::default());
        let previous = set_console(probe.clone());

        log(&["a".into()]);
        warn(&["b".into()]);
        debug(&["c".into()]);

        set_console(previous);

        let calls = probe
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        assert_eq!(
            calls,
            vec![
                (ConsoleChannel::Log, "a".to_string()),
                (ConsoleChannel::Warn, "b".to_string()),
                (ConsoleChannel::Debug, "c".to_string()),
            ]
        );
    }
}

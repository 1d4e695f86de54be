//! Record enrichment: caller location, stack cleaning, exception synthesis.
//!
//! Every record produced by the façade or a global handler passes through
//! [`Enricher::enrich`] before it reaches the batch queue. Enrichment picks
//! the most trustworthy stack available, removes SDK and interceptor frames,
//! rewrites bundled positions through the source-map resolver under a
//! wall-clock budget, and attaches the OTel `code.*` attributes whenever the
//! origin is known.

use std::backtrace::Backtrace;
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use healops::logs::{keys, Exception, LogRecord, Metadata, Severity};
use healops::semconv;
use serde_json::Value;

use crate::config::Config;
use crate::sourcemap::{is_bundled_path, SourceMapResolver};
use crate::stack::StackFilter;

/// Wall-clock budget for rewriting bundled stack frames.
pub(crate) const DEFAULT_REWRITE_BUDGET: Duration = Duration::from_millis(1_000);

thread_local! {
    static SDK_SCOPE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as executing SDK internals until dropped.
///
/// Intercepted logging primitives and the caller-frame resolver consult this
/// flag to short-circuit recursive entry.
pub(crate) struct SdkScopeGuard {
    was_active: bool,
}

pub(crate) fn enter_sdk_scope() -> SdkScopeGuard {
    let was_active = SDK_SCOPE.get();
    SDK_SCOPE.set(true);
    SdkScopeGuard { was_active }
}

impl Drop for SdkScopeGuard {
    fn drop(&mut self) {
        SDK_SCOPE.set(self.was_active);
    }
}

pub(crate) fn in_sdk_scope() -> bool {
    SDK_SCOPE.get()
}

/// Capture a synthetic backtrace at the façade entry point.
///
/// Recursive entry (the capture itself triggering an intercepted primitive)
/// yields `None` instead of attempting another synthesis.
pub(crate) fn capture_synthetic_stack() -> Option<String> {
    if in_sdk_scope() {
        return None;
    }
    let _guard = enter_sdk_scope();
    Some(Backtrace::force_capture().to_string())
}

/// A record as captured by the façade, before enrichment.
#[derive(Debug)]
pub(crate) struct PendingRecord {
    pub(crate) severity: Severity,
    pub(crate) message: String,
    pub(crate) metadata: Metadata,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) synthetic_stack: Option<String>,
}

impl PendingRecord {
    pub(crate) fn capture(severity: Severity, message: String, metadata: Metadata) -> Self {
        PendingRecord {
            severity,
            message,
            metadata,
            timestamp: Utc::now(),
            synthetic_stack: capture_synthetic_stack(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Enricher {
    filter: StackFilter,
    resolver: Arc<SourceMapResolver>,
    rewrite_budget: Duration,
}

impl Enricher {
    pub(crate) fn new(filter: StackFilter, resolver: Arc<SourceMapResolver>) -> Self {
        Enricher {
            filter,
            resolver,
            rewrite_budget: DEFAULT_REWRITE_BUDGET,
        }
    }

    /// Turn a pending record into a deliverable [`LogRecord`].
    pub(crate) async fn enrich(&self, config: &Config, pending: PendingRecord) -> LogRecord {
        let _guard = enter_sdk_scope();
        let PendingRecord {
            severity,
            message,
            mut metadata,
            timestamp,
            synthetic_stack,
        } = pending;

        // Caller-supplied stacks dominate: they point at the real error site,
        // the synthetic capture only at the façade call.
        let caller_error_stack = string_field(&metadata, keys::ERROR_STACK);
        let caller_stack = string_field(&metadata, keys::STACK);
        let exception_stack = metadata
            .get(keys::EXCEPTION)
            .and_then(|exception| exception.get("stacktrace"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let caller_supplied_stack = caller_error_stack.is_some()
            || caller_stack.is_some()
            || exception_stack.is_some();
        let raw_stack = caller_error_stack
            .clone()
            .or(caller_stack)
            .or(exception_stack)
            .or_else(|| synthetic_stack.clone());

        let cleaned_stack = match raw_stack.as_deref() {
            Some(raw) => Some(self.clean_and_rewrite(raw).await),
            None => None,
        };

        let caller_frame = raw_stack
            .as_deref()
            .and_then(|raw| self.filter.parse_first_caller(raw));

        let (mut path, mut line, mut column, mut function) = self.locate(
            &metadata,
            raw_stack.as_deref(),
            cleaned_stack.as_deref(),
            synthetic_stack.as_deref(),
            caller_supplied_stack,
        );

        if line.is_none() {
            if let (Some(path), Some(frame)) = (path.as_deref(), caller_frame.as_ref()) {
                if frame.file_path == path {
                    line = Some(frame.line);
                    column = Some(frame.column);
                    if function.is_none() {
                        function.clone_from(&frame.function_name);
                    }
                }
            }
        }

        // The resolver is always consulted; the bundled path is only kept
        // when rewriting fails so traceability is never lost.
        if let Some(bundled) = path.clone().filter(|path| is_bundled_path(path)) {
            if let Some(position) = self
                .resolver
                .resolve_position(&bundled, line.unwrap_or(1), column.unwrap_or(0))
                .await
            {
                path = Some(position.source);
                line = Some(position.line);
                column = Some(position.column);
                if function.is_none() {
                    function = position.name;
                }
            }
        }

        if let Some(cleaned) = &cleaned_stack {
            if caller_supplied_stack
                && !metadata.contains_key(keys::ERROR_STACK)
                && raw_stack.as_deref() != Some(cleaned.as_str())
            {
                if let Some(raw) = &raw_stack {
                    metadata.insert(keys::ERROR_STACK.to_string(), Value::String(raw.clone()));
                }
            }
            metadata.insert(keys::STACK.to_string(), Value::String(cleaned.clone()));
        }

        if let Some(path) = &path {
            metadata.insert(keys::FILE_PATH.to_string(), Value::String(path.clone()));
            metadata.insert(
                semconv::CODE_FILE_PATH.to_string(),
                Value::String(path.clone()),
            );
            if let Some(line) = line {
                metadata.insert(keys::LINE.to_string(), Value::from(line));
                metadata.insert(semconv::CODE_LINE_NUMBER.to_string(), Value::from(line));
            }
            if let Some(column) = column {
                metadata.insert(keys::COLUMN.to_string(), Value::from(column));
                metadata.insert(semconv::CODE_COLUMN_NUMBER.to_string(), Value::from(column));
            }
            if let Some(function) = &function {
                metadata.insert(
                    keys::FUNCTION_NAME.to_string(),
                    Value::String(function.clone()),
                );
                metadata.insert(
                    semconv::CODE_FUNCTION_NAME.to_string(),
                    Value::String(function.clone()),
                );
            }
        }

        if severity.is_exceptional() {
            let exception = self.synthesize_exception(&metadata, &message, cleaned_stack.as_deref());
            if let Ok(value) = serde_json::to_value(&exception) {
                metadata.insert(keys::EXCEPTION.to_string(), value);
            }
        }

        LogRecord {
            service_name: config.service_name.clone(),
            severity,
            message,
            source: config.source.clone(),
            timestamp,
            release: config.release.clone(),
            environment: config.environment.clone(),
            metadata,
        }
    }

    /// Clean a raw stack and rewrite its bundled frames within the budget.
    ///
    /// The budget does not cancel in-flight fetches; a timed-out rewrite
    /// keeps running in the background to warm the caches for later records.
    async fn clean_and_rewrite(&self, raw: &str) -> String {
        let cleaned = self.filter.clean_stack(raw);
        if !SourceMapResolver::stack_has_bundled_frames(&cleaned) {
            return cleaned;
        }

        let resolver = self.resolver.clone();
        let stack = cleaned.clone();
        let rewrite = tokio::spawn(async move { resolver.rewrite_stack(&stack).await });
        match tokio::time::timeout(self.rewrite_budget, rewrite).await {
            Ok(Ok(rewritten)) => rewritten,
            _ => cleaned,
        }
    }

    /// The file-path priority chain of the enrichment contract.
    fn locate(
        &self,
        metadata: &Metadata,
        raw_stack: Option<&str>,
        cleaned_stack: Option<&str>,
        synthetic_stack: Option<&str>,
        caller_supplied_stack: bool,
    ) -> (Option<String>, Option<u32>, Option<u32>, Option<String>) {
        if let Some(path) = string_field(metadata, keys::FILE_PATH) {
            return (
                Some(path),
                u32_field(metadata, keys::LINE),
                u32_field(metadata, keys::COLUMN),
                string_field(metadata, keys::FUNCTION_NAME),
            );
        }

        // Extraction is more reliable on the raw form; the cleaned stack is
        // only a fallback.
        let extracted = raw_stack
            .and_then(|raw| self.filter.extract_first_meaningful_path(raw, true))
            .or_else(|| {
                cleaned_stack
                    .and_then(|cleaned| self.filter.extract_first_meaningful_path(cleaned, true))
            });
        if let Some(path) = extracted {
            return (Some(path), None, None, None);
        }

        // The synthetic frame is a last resort, and only when the record
        // carries no error stack of its own.
        if !caller_supplied_stack {
            if let Some(frame) =
                synthetic_stack.and_then(|stack| self.filter.parse_first_caller(stack))
            {
                return (
                    Some(frame.file_path),
                    Some(frame.line),
                    Some(frame.column),
                    frame.function_name,
                );
            }
        }

        (None, None, None, None)
    }

    fn synthesize_exception(
        &self,
        metadata: &Metadata,
        message: &str,
        cleaned_stack: Option<&str>,
    ) -> Exception {
        let existing = metadata.get(keys::EXCEPTION);
        let existing_str = |field: &str| {
            existing
                .and_then(|exception| exception.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let exception_type = string_field(metadata, keys::ERROR_NAME)
            .or_else(|| existing_str("type"))
            .unwrap_or_else(|| "Error".to_string());
        let exception_message = string_field(metadata, keys::ERROR_MESSAGE)
            .or_else(|| existing_str("message"))
            .unwrap_or_else(|| message.to_string());
        let stacktrace = existing_str("stacktrace")
            .or_else(|| string_field(metadata, keys::ERROR_STACK))
            .or_else(|| cleaned_stack.map(str::to_string));

        Exception::new(exception_type, exception_message, stacktrace)
    }
}

fn string_field(metadata: &Metadata, key: &str) -> Option<String> {
    metadata.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u32_field(metadata: &Metadata, key: &str) -> Option<u32> {
    metadata
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
}

//! The public log façade.
//!
//! A [`Logger`] is created once at host startup and lives for the process.
//! The four severity entry points are synchronous and fire-and-forget:
//! capturing, enrichment and delivery happen on the background worker, and no
//! failure on that path is ever surfaced into the calling code. Construction
//! wires up the console interceptor, the panic handler and the span exporter
//! according to the capture flags; [`Logger::destroy`] unwinds all of it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use healops::healops_debug;
use healops::logs::{keys, Metadata, RecordType, Severity};
use healops::trace::SpanData;
use healops_http::HttpClient;
use serde_json::Value;

use crate::batch::Batcher;
use crate::config::{Config, ConfigBuilder};
use crate::console::ConsoleInterceptor;
use crate::enrich::{Enricher, PendingRecord};
use crate::error::{ConfigError, SdkError, SdkResult};
use crate::handlers::{install_panic_hook, PanicHookGuard};
use crate::http_capture::InstrumentedClient;
use crate::sourcemap::SourceMapResolver;
use crate::span_export::{BatchSpanProcessor, HealOpsSpanExporter};
use crate::stack::StackFilter;
use crate::transport::Transport;

/// The HealOps logger façade. Cheap to clone; all clones share one pipeline.
#[derive(Clone, Debug)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

/// A weak reference to the pipeline, held by interceptors and handlers so
/// they never keep a destroyed logger alive.
#[derive(Clone, Debug)]
pub(crate) struct LoggerHandle {
    inner: Weak<LoggerInner>,
}

impl LoggerHandle {
    pub(crate) fn log_with(&self, severity: Severity, message: String, metadata: Metadata) {
        if let Some(inner) = self.inner.upgrade() {
            inner.log_with(severity, message, metadata);
        }
    }
}

struct LoggerInner {
    config: Config,
    batcher: Batcher,
    span_processor: Option<BatchSpanProcessor>,
    console_interceptor: Mutex<Option<ConsoleInterceptor>>,
    panic_guard: Mutex<Option<PanicHookGuard>>,
    destroyed: AtomicBool,
}

impl fmt::Debug for LoggerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("service_name", &self.config.service_name)
            .finish()
    }
}

impl LoggerInner {
    fn log_with(&self, severity: Severity, message: String, metadata: Metadata) {
        if self.destroyed.load(Ordering::Relaxed) {
            return;
        }
        self.batcher
            .enqueue(PendingRecord::capture(severity, message, metadata));
    }

    fn destroy(&self) -> SdkResult {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(SdkError::AlreadyShutdown);
        }

        // Deregistration comes first so nothing captured during the drain
        // re-enters the pipeline.
        if let Some(interceptor) = self
            .console_interceptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            interceptor.stop();
        }
        if let Some(guard) = self
            .panic_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            guard.uninstall();
        }
        if let Some(span_processor) = &self.span_processor {
            if let Err(err) = span_processor.shutdown() {
                healops_debug!(name: "Logger.SpanProcessorShutdownFailed", error = format!("{err}"));
            }
        }

        self.batcher.shutdown()
    }
}

impl Drop for LoggerInner {
    fn drop(&mut self) {
        // Last handle gone without an explicit destroy: drain best-effort.
        let _ = self.destroy();
    }
}

impl Logger {
    /// Start building a logger from the two required options.
    pub fn builder(api_key: impl Into<String>, service_name: impl Into<String>) -> LoggerBuilder {
        LoggerBuilder {
            config: Config::builder(api_key, service_name),
            client: None,
        }
    }

    /// Log at INFO severity.
    pub fn info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message, Metadata::new());
    }

    /// Log at INFO severity with caller-supplied metadata.
    pub fn info_with(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(Severity::Info, message, metadata);
    }

    /// Log at WARNING severity.
    pub fn warn(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message, Metadata::new());
    }

    /// Log at WARNING severity with caller-supplied metadata.
    pub fn warn_with(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(Severity::Warning, message, metadata);
    }

    /// Log at ERROR severity.
    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message, Metadata::new());
    }

    /// Log at ERROR severity with caller-supplied metadata.
    pub fn error_with(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(Severity::Error, message, metadata);
    }

    /// Log at CRITICAL severity.
    pub fn critical(&self, message: impl Into<String>) {
        self.log(Severity::Critical, message, Metadata::new());
    }

    /// Log at CRITICAL severity with caller-supplied metadata.
    pub fn critical_with(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(Severity::Critical, message, metadata);
    }

    /// Log at an explicit severity. Fire-and-forget: returns immediately and
    /// never fails into the caller.
    pub fn log(&self, severity: Severity, message: impl Into<String>, metadata: Metadata) {
        self.inner.log_with(severity, message.into(), metadata);
    }

    /// Report a failure the host supervises itself (an unawaited task, a
    /// request-handler error) under one of the standard capture types.
    ///
    /// Unhandled and uncaught kinds are recorded at CRITICAL, the network
    /// wrapper kinds at ERROR.
    pub fn report_error(&self, kind: RecordType, error: &(dyn std::error::Error + 'static)) {
        let severity = match kind {
            RecordType::HttpError | RecordType::NetworkError => Severity::Error,
            _ => Severity::Critical,
        };
        let message = error.to_string();
        let mut metadata = Metadata::new();
        metadata.insert(keys::TYPE.to_string(), Value::String(kind.as_str().to_string()));
        metadata.insert(keys::ERROR_NAME.to_string(), Value::String("Error".to_string()));
        metadata.insert(keys::ERROR_MESSAGE.to_string(), Value::String(message.clone()));
        self.log(severity, message, metadata);
    }

    /// Hand a finished span to the exporter. No-op when trace capture is
    /// disabled or the logger is destroyed.
    pub fn record_span(&self, span: SpanData) {
        if self.inner.destroyed.load(Ordering::Relaxed) {
            return;
        }
        if let Some(span_processor) = &self.inner.span_processor {
            span_processor.on_end(span);
        }
    }

    /// Wrap an HTTP client so that failed calls through it are captured.
    pub fn instrument_client(&self, inner: Arc<dyn HttpClient>) -> InstrumentedClient {
        InstrumentedClient::new(inner, self.handle())
    }

    /// Synchronously flush all buffered records.
    pub fn flush(&self) -> SdkResult {
        self.inner.batcher.force_flush()
    }

    /// Drain the queue best-effort, cancel the flush schedule, and restore
    /// every replaced global (console sink, panic hook). Idempotent; records
    /// submitted afterwards are dropped.
    pub fn destroy(&self) -> SdkResult {
        self.inner.destroy()
    }

    pub(crate) fn handle(&self) -> LoggerHandle {
        LoggerHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Builder wiring a [`Config`] and an optional custom HTTP client into a
/// running [`Logger`].
#[derive(Debug)]
pub struct LoggerBuilder {
    config: ConfigBuilder,
    client: Option<Arc<dyn HttpClient>>,
}

impl LoggerBuilder {
    /// Override the ingestion base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config = self.config.with_endpoint(endpoint);
        self
    }

    /// Set the record source tag.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.config = self.config.with_source(source);
        self
    }

    /// Attach a release identifier to every record.
    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.config = self.config.with_release(release);
        self
    }

    /// Attach a deployment environment to every record.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.config = self.config.with_environment(environment);
        self
    }

    /// Disable batching to send one record per request.
    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.config = self.config.with_batching(enabled);
        self
    }

    /// Number of records that triggers a flush.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config = self.config.with_batch_size(batch_size);
        self
    }

    /// Longest time a record waits before a flush, in milliseconds.
    pub fn with_batch_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config = self.config.with_batch_interval_ms(interval_ms);
        self
    }

    /// Intercept the global console sink.
    pub fn with_capture_console(mut self, enabled: bool) -> Self {
        self.config = self.config.with_capture_console(enabled);
        self
    }

    /// Install the process-level panic handler.
    pub fn with_capture_errors(mut self, enabled: bool) -> Self {
        self.config = self.config.with_capture_errors(enabled);
        self
    }

    /// Run the span exporter.
    pub fn with_capture_traces(mut self, enabled: bool) -> Self {
        self.config = self.config.with_capture_traces(enabled);
        self
    }

    /// Enable verbose diagnostic output.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.config = self.config.with_debug(debug);
        self
    }

    /// Additional interceptor-frame patterns for caller resolution.
    pub fn with_interceptor_frame_patterns(
        mut self,
        patterns: impl IntoIterator<Item = String>,
    ) -> Self {
        self.config = self.config.with_interceptor_frame_patterns(patterns);
        self
    }

    /// Bring a custom [`HttpClient`] instead of the built-in `reqwest` one.
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Validate the configuration and start the pipeline.
    pub fn build(self) -> Result<Logger, ConfigError> {
        let config = self.config.build()?;

        #[cfg(feature = "reqwest")]
        let client = self
            .client
            .unwrap_or_else(|| Arc::new(reqwest::Client::new()) as Arc<dyn HttpClient>);
        #[cfg(not(feature = "reqwest"))]
        let client = self.client.ok_or(ConfigError::NoHttpClient)?;

        let transport = Arc::new(Transport::new(
            client.clone(),
            config.endpoint.clone(),
            config.api_key.clone(),
        ));
        let resolver = Arc::new(SourceMapResolver::new(client));
        let filter = StackFilter::new(&config.interceptor_frame_patterns);
        let enricher = Enricher::new(filter, resolver);
        let batcher = Batcher::new(config.clone(), transport.clone(), enricher);

        let span_processor = config.capture_traces.then(|| {
            BatchSpanProcessor::builder(HealOpsSpanExporter::new(
                transport.clone(),
                config.service_name.clone(),
            ))
            .build()
        });

        let logger = Logger {
            inner: Arc::new(LoggerInner {
                batcher,
                span_processor,
                console_interceptor: Mutex::new(None),
                panic_guard: Mutex::new(None),
                destroyed: AtomicBool::new(false),
                config,
            }),
        };

        if logger.inner.config.capture_console {
            let interceptor = ConsoleInterceptor::new(logger.handle());
            interceptor.start();
            *logger
                .inner
                .console_interceptor
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(interceptor);
        }
        if logger.inner.config.capture_errors {
            *logger
                .inner
                .panic_guard
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) =
                Some(install_panic_hook(logger.handle()));
        }

        Ok(logger)
    }
}

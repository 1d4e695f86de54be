//! Export of finished trace spans.
//!
//! Spans arrive from the host tracing runtime as [`SpanData`] snapshots.
//! The exporter transforms them into the ingestion wire shape (camelCase
//! keys, epoch-millisecond times, numeric status codes) and enriches the
//! attribute map: exception event attributes are hoisted onto the span, and
//! error spans missing a stacktrace get one promoted from the usual
//! stack-carrying attributes. Delivery runs on its own cadence, independent
//! of the log batcher; one failed export never blocks the next.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use healops::semconv;
use healops::trace::{AttributeMap, SpanData, StatusCode};
use healops::{healops_debug, healops_error, healops_warn};
use serde::Serialize;
use serde_json::Value;

use crate::enrich::enter_sdk_scope;
use crate::error::{SdkError, SdkResult};
use crate::transport::Transport;

/// Default delay between two consecutive span exports.
pub(crate) const DEFAULT_SCHEDULE_DELAY: Duration = Duration::from_secs(5);
/// Default maximum number of spans per export.
pub(crate) const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;
/// Bound of the channel between span producers and the worker.
const MAX_QUEUE_SIZE: usize = 2_048;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives batches of finished spans for delivery.
///
/// The built-in implementation is [`HealOpsSpanExporter`]; tests plug in
/// [`crate::testing::InMemorySpanExporter`].
#[async_trait]
pub trait SpanExporter: Send + Sync + fmt::Debug {
    /// Deliver a batch of spans. The result is reported back to the caller
    /// that requested the export (flush/shutdown) and otherwise logged.
    async fn export(&self, batch: Vec<SpanData>) -> SdkResult;

    /// Called once when the processor shuts down.
    fn shutdown(&self) {}
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireStatus {
    code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    name: String,
    time: u64,
    attributes: AttributeMap,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireSpan {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    name: String,
    timestamp: u64,
    start_time: u64,
    end_time: u64,
    attributes: AttributeMap,
    events: Vec<WireEvent>,
    status: WireStatus,
    resource: AttributeMap,
}

/// The batch envelope posted to the span endpoint.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SpanEnvelope {
    api_key: String,
    service_name: String,
    spans: Vec<WireSpan>,
}

impl SpanEnvelope {
    pub(crate) fn new(
        api_key: impl Into<String>,
        service_name: impl Into<String>,
        spans: Vec<WireSpan>,
    ) -> Self {
        SpanEnvelope {
            api_key: api_key.into(),
            service_name: service_name.into(),
            spans,
        }
    }
}

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

const EXCEPTION_EVENT: &str = "exception";
const STACK_ATTRIBUTES: [&str; 3] = ["error.stack", "stack", "errorStack"];

/// Transform a finished span into its wire shape, hoisting exception
/// details into the span attributes.
fn transform_span(span: SpanData) -> WireSpan {
    let SpanData {
        trace_id,
        span_id,
        parent_span_id,
        name,
        start_time,
        end_time,
        mut attributes,
        events,
        status,
        resource,
    } = span;

    for event in &events {
        if event.name == EXCEPTION_EVENT {
            for key in [
                semconv::EXCEPTION_STACKTRACE,
                semconv::EXCEPTION_TYPE,
                semconv::EXCEPTION_MESSAGE,
            ] {
                if let Some(value) = event.attributes.get(key) {
                    attributes.insert(key.to_string(), value.clone());
                }
            }
        }
    }

    if status.code == StatusCode::Error {
        if !attributes.contains_key(semconv::EXCEPTION_STACKTRACE) {
            // Error spans always carry the three exception keys; with no
            // stack source anywhere the value is an empty string.
            let promoted = STACK_ATTRIBUTES
                .iter()
                .find_map(|key| attributes.get(*key).cloned())
                .unwrap_or_else(|| Value::String(String::new()));
            attributes.insert(semconv::EXCEPTION_STACKTRACE.to_string(), promoted);
        }
        if !attributes.contains_key(semconv::EXCEPTION_TYPE) {
            attributes.insert(
                semconv::EXCEPTION_TYPE.to_string(),
                Value::String("Error".to_string()),
            );
        }
        if !attributes.contains_key(semconv::EXCEPTION_MESSAGE) {
            let message = status.message.clone().unwrap_or_else(|| name.clone());
            attributes.insert(semconv::EXCEPTION_MESSAGE.to_string(), Value::String(message));
        }
    }

    let end_millis = epoch_millis(end_time);
    WireSpan {
        trace_id,
        span_id,
        parent_span_id,
        name,
        // The wire field is the span's end time, not the export time.
        timestamp: end_millis,
        start_time: epoch_millis(start_time),
        end_time: end_millis,
        attributes,
        events: events
            .into_iter()
            .map(|event| WireEvent {
                name: event.name,
                time: epoch_millis(event.time),
                attributes: event.attributes,
            })
            .collect(),
        status: WireStatus {
            code: status.code.as_u8(),
            message: status.message,
        },
        resource,
    }
}

/// Ships spans to the HealOps span endpoint.
#[derive(Debug)]
pub struct HealOpsSpanExporter {
    transport: Arc<Transport>,
    service_name: String,
}

impl HealOpsSpanExporter {
    pub(crate) fn new(transport: Arc<Transport>, service_name: String) -> Self {
        HealOpsSpanExporter {
            transport,
            service_name,
        }
    }
}

#[async_trait]
impl SpanExporter for HealOpsSpanExporter {
    async fn export(&self, batch: Vec<SpanData>) -> SdkResult {
        if batch.is_empty() {
            return Ok(());
        }
        let spans = batch.into_iter().map(transform_span).collect();
        let envelope = SpanEnvelope::new(self.transport.api_key(), &self.service_name, spans);
        self.transport
            .send_spans(&envelope)
            .await
            .map_err(|err| SdkError::InternalFailure(err.to_string()))
    }
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
enum SpanMessage {
    Span(SpanData),
    ForceFlush(mpsc::SyncSender<SdkResult>),
    Shutdown(mpsc::SyncSender<SdkResult>),
}

/// Buffers finished spans and exports them on a periodic cadence from a
/// dedicated worker thread.
#[derive(Debug)]
pub struct BatchSpanProcessor {
    message_sender: SyncSender<SpanMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    dropped_spans_count: AtomicUsize,
}

impl BatchSpanProcessor {
    /// Create a new batch processor builder.
    pub fn builder<E>(exporter: E) -> BatchSpanProcessorBuilder<E>
    where
        E: SpanExporter + 'static,
    {
        BatchSpanProcessorBuilder {
            exporter,
            schedule_delay: DEFAULT_SCHEDULE_DELAY,
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
        }
    }

    fn new<E>(exporter: E, schedule_delay: Duration, max_export_batch_size: usize) -> Self
    where
        E: SpanExporter + 'static,
    {
        let (message_sender, message_receiver) = mpsc::sync_channel(MAX_QUEUE_SIZE);

        let handle = thread::Builder::new()
            .name("healops.spans".to_string())
            .spawn(move || {
                worker_loop(
                    exporter,
                    message_receiver,
                    schedule_delay,
                    max_export_batch_size,
                )
            })
            .expect("span processor thread spawn failed");

        BatchSpanProcessor {
            message_sender,
            handle: Mutex::new(Some(handle)),
            is_shutdown: AtomicBool::new(false),
            dropped_spans_count: AtomicUsize::new(0),
        }
    }

    /// Hand over a finished span.
    pub fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return;
        }
        if self.message_sender.try_send(SpanMessage::Span(span)).is_err()
            && self.dropped_spans_count.fetch_add(1, Ordering::Relaxed) == 0
        {
            healops_warn!(
                name: "SpanProcessor.SpanDroppingStarted",
                message = "Spans are being dropped because the queue is full or the worker is gone."
            );
        }
    }

    /// Export everything buffered, waiting for the result.
    pub fn force_flush(&self) -> SdkResult {
        let (sender, receiver) = mpsc::sync_channel(1);
        match self.message_sender.try_send(SpanMessage::ForceFlush(sender)) {
            Ok(()) => receiver
                .recv_timeout(FLUSH_TIMEOUT)
                .map_err(|err| match err {
                    RecvTimeoutError::Timeout => SdkError::Timeout(FLUSH_TIMEOUT),
                    _ => SdkError::InternalFailure(format!("{err}")),
                })?,
            Err(mpsc::TrySendError::Full(_)) => Err(SdkError::InternalFailure(
                "span flush could not be scheduled because the control channel is full".into(),
            )),
            Err(mpsc::TrySendError::Disconnected(_)) => Err(SdkError::AlreadyShutdown),
        }
    }

    /// Drain the buffer and stop the worker thread.
    pub fn shutdown(&self) -> SdkResult {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(SdkError::AlreadyShutdown);
        }

        let dropped_spans = self.dropped_spans_count.load(Ordering::Relaxed);
        if dropped_spans > 0 {
            healops_warn!(
                name: "SpanProcessor.SpansDropped",
                dropped_spans_count = dropped_spans
            );
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        match self.message_sender.try_send(SpanMessage::Shutdown(sender)) {
            Ok(()) => {
                let result = receiver
                    .recv_timeout(SHUTDOWN_TIMEOUT)
                    .map_err(|err| match err {
                        RecvTimeoutError::Timeout => SdkError::Timeout(SHUTDOWN_TIMEOUT),
                        _ => SdkError::InternalFailure(format!("{err}")),
                    })?;
                if let Some(handle) = self
                    .handle
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take()
                {
                    let _ = handle.join();
                }
                result
            }
            Err(mpsc::TrySendError::Full(_)) => Err(SdkError::InternalFailure(
                "span shutdown could not be scheduled because the control channel is full".into(),
            )),
            Err(mpsc::TrySendError::Disconnected(_)) => Err(SdkError::AlreadyShutdown),
        }
    }
}

/// A builder for [`BatchSpanProcessor`] instances.
#[derive(Debug)]
pub struct BatchSpanProcessorBuilder<E> {
    exporter: E,
    schedule_delay: Duration,
    max_export_batch_size: usize,
}

impl<E> BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + 'static,
{
    /// Delay between two consecutive exports. Default 5 s.
    pub fn with_schedule_delay(mut self, delay: Duration) -> Self {
        self.schedule_delay = delay;
        self
    }

    /// Maximum number of spans per export. Default 512.
    pub fn with_max_export_batch_size(mut self, size: usize) -> Self {
        self.max_export_batch_size = size.max(1);
        self
    }

    /// Build the processor and start its worker thread.
    pub fn build(self) -> BatchSpanProcessor {
        BatchSpanProcessor::new(self.exporter, self.schedule_delay, self.max_export_batch_size)
    }
}

fn worker_loop<E>(
    exporter: E,
    message_receiver: mpsc::Receiver<SpanMessage>,
    schedule_delay: Duration,
    max_export_batch_size: usize,
) where
    E: SpanExporter,
{
    let _scope = enter_sdk_scope();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            healops_error!(name: "SpanProcessor.RuntimeBuildFailed", error = format!("{err}"));
            return;
        }
    };

    let mut buffer: Vec<SpanData> = Vec::new();
    let mut last_export_time = Instant::now();

    let export = |runtime: &tokio::runtime::Runtime,
                  buffer: &mut Vec<SpanData>,
                  last_export_time: &mut Instant|
     -> SdkResult {
        *last_export_time = Instant::now();
        if buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(buffer);
        let result = runtime.block_on(exporter.export(batch));
        if let Err(err) = &result {
            healops_debug!(name: "SpanProcessor.ExportFailed", error = format!("{err}"));
        }
        result
    };

    loop {
        let remaining_time = schedule_delay
            .checked_sub(last_export_time.elapsed())
            .unwrap_or(Duration::ZERO);

        match message_receiver.recv_timeout(remaining_time) {
            Ok(SpanMessage::Span(span)) => {
                buffer.push(span);
                if buffer.len() >= max_export_batch_size {
                    let _ = export(&runtime, &mut buffer, &mut last_export_time);
                }
            }
            Ok(SpanMessage::ForceFlush(sender)) => {
                let result = export(&runtime, &mut buffer, &mut last_export_time);
                let _ = sender.send(result);
            }
            Ok(SpanMessage::Shutdown(sender)) => {
                let result = export(&runtime, &mut buffer, &mut last_export_time);
                exporter.shutdown();
                let _ = sender.send(result);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                // A failed periodic export is logged and forgotten; the next
                // interval gets a fresh attempt.
                let _ = export(&runtime, &mut buffer, &mut last_export_time);
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = export(&runtime, &mut buffer, &mut last_export_time);
                exporter.shutdown();
                break;
            }
        }
    }
}

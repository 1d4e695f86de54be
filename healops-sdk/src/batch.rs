//! Size- and interval-triggered batching of log records.
//!
//! The batcher buffers enriched records and ships them to the batch endpoint
//! on whichever of two thresholds fires first: the configured batch size or
//! the flush interval. A **dedicated background thread** owns the buffer and
//! performs every export, which makes the flush single-flight by
//! construction and keeps the application's execution flow unblocked.
//!
//! ```ascii
//!   +-----+--------------+   +------------------+   +------------------+
//!   |     |              |   |                  |   |                  |
//!   | app | logger.info()+--->  Batcher (queue) +--->  Transport (C1)  |
//!   +-----+--------------+   +------------------+   +------------------+
//! ```
//!
//! When a batch POST fails after retries, every record of the snapshot is
//! resubmitted individually through the single-record endpoint and the
//! snapshot is dropped, so a systematically failing endpoint can never grow
//! the queue without bound.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use healops::logs::LogRecord;
use healops::{healops_debug, healops_error, healops_warn};

use crate::config::Config;
use crate::enrich::{enter_sdk_scope, Enricher, PendingRecord};
use crate::error::{SdkError, SdkResult};
use crate::transport::Transport;

/// Bound of the channel between the façade and the worker. A full channel
/// drops the incoming record rather than blocking the caller.
pub(crate) const MAX_QUEUE_SIZE: usize = 2_048;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages sent between application threads and the batcher's work thread.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
enum BatchMessage {
    /// A captured record awaiting enrichment and delivery.
    Record(PendingRecord),
    /// Flush the current buffer to the transport.
    ForceFlush(mpsc::SyncSender<SdkResult>),
    /// Drain the buffer and stop the worker thread.
    Shutdown(mpsc::SyncSender<SdkResult>),
}

#[derive(Debug)]
pub(crate) struct Batcher {
    message_sender: SyncSender<BatchMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    dropped_logs_count: AtomicUsize,
}

impl Batcher {
    pub(crate) fn new(config: Config, transport: Arc<Transport>, enricher: Enricher) -> Self {
        let (message_sender, message_receiver) = mpsc::sync_channel(MAX_QUEUE_SIZE);

        let handle = thread::Builder::new()
            .name("healops.batcher".to_string())
            .spawn(move || worker_loop(config, transport, enricher, message_receiver))
            .expect("batcher thread spawn failed");

        Batcher {
            message_sender,
            handle: Mutex::new(Some(handle)),
            is_shutdown: AtomicBool::new(false),
            dropped_logs_count: AtomicUsize::new(0),
        }
    }

    /// Hand a captured record to the worker. Fire-and-forget: a destroyed
    /// batcher or a full queue drops the record silently.
    pub(crate) fn enqueue(&self, pending: PendingRecord) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            healops_debug!(name: "Batcher.EnqueueAfterDestroy");
            return;
        }
        match self.message_sender.try_send(BatchMessage::Record(pending)) {
            Ok(()) => {}
            Err(mpsc::TrySendError::Full(_)) => {
                if self.dropped_logs_count.fetch_add(1, Ordering::Relaxed) == 0 {
                    healops_warn!(
                        name: "Batcher.RecordDroppingStarted",
                        message = "Batcher dropped a record because the queue is full. No further diagnostic will be emitted until destroy, which reports the total dropped count."
                    );
                }
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {
                healops_debug!(name: "Batcher.Enqueue.WorkerGone");
            }
        }
    }

    /// Synchronously flush the buffer, waiting up to five seconds.
    pub(crate) fn force_flush(&self) -> SdkResult {
        let (sender, receiver) = mpsc::sync_channel(1);
        match self.message_sender.try_send(BatchMessage::ForceFlush(sender)) {
            Ok(()) => receiver.recv_timeout(FLUSH_TIMEOUT).map_err(|err| {
                if err == RecvTimeoutError::Timeout {
                    SdkError::Timeout(FLUSH_TIMEOUT)
                } else {
                    SdkError::InternalFailure(format!("{err}"))
                }
            })?,
            Err(mpsc::TrySendError::Full(_)) => Err(SdkError::InternalFailure(
                "flush could not be scheduled because the control channel is full".into(),
            )),
            Err(mpsc::TrySendError::Disconnected(_)) => Err(SdkError::AlreadyShutdown),
        }
    }

    /// Drain the buffer best-effort and stop the worker thread.
    pub(crate) fn shutdown(&self) -> SdkResult {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(SdkError::AlreadyShutdown);
        }

        let dropped_logs = self.dropped_logs_count.load(Ordering::Relaxed);
        if dropped_logs > 0 {
            healops_warn!(
                name: "Batcher.RecordsDropped",
                dropped_logs_count = dropped_logs,
                max_queue_size = MAX_QUEUE_SIZE,
                message = "Records were dropped because the queue was full. The count is the total for the lifetime of this logger."
            );
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        match self.message_sender.try_send(BatchMessage::Shutdown(sender)) {
            Ok(()) => {
                let result = receiver.recv_timeout(SHUTDOWN_TIMEOUT).map_err(|err| match err {
                    RecvTimeoutError::Timeout => {
                        healops_error!(name: "Batcher.Shutdown.Timeout");
                        SdkError::Timeout(SHUTDOWN_TIMEOUT)
                    }
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
                "shutdown could not be scheduled because the control channel is full".into(),
            )),
            Err(mpsc::TrySendError::Disconnected(_)) => Err(SdkError::AlreadyShutdown),
        }
    }
}

fn worker_loop(
    config: Config,
    transport: Arc<Transport>,
    enricher: Enricher,
    message_receiver: mpsc::Receiver<BatchMessage>,
) {
    // The worker is SDK territory for its whole lifetime; anything it logs
    // through intercepted primitives must not be captured again.
    let _scope = enter_sdk_scope();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            healops_error!(name: "Batcher.RuntimeBuildFailed", error = format!("{err}"));
            return;
        }
    };

    healops_debug!(
        name: "Batcher.ThreadStarted",
        interval_in_millisecs = config.batch_interval.as_millis(),
        batch_size = config.batch_size
    );

    let mut buffer: Vec<LogRecord> = Vec::with_capacity(config.batch_size);
    let mut last_export_time = Instant::now();

    loop {
        let remaining_time = config
            .batch_interval
            .checked_sub(last_export_time.elapsed())
            .unwrap_or(Duration::ZERO);

        match message_receiver.recv_timeout(remaining_time) {
            Ok(BatchMessage::Record(pending)) => {
                let record = runtime.block_on(enricher.enrich(&config, pending));
                if config.enable_batching {
                    buffer.push(record);
                    if buffer.len() >= config.batch_size {
                        healops_debug!(name: "Batcher.ExportingDueToBatchSize");
                        export_batch(&runtime, &transport, &mut buffer, &mut last_export_time);
                    }
                } else if let Err(err) = runtime.block_on(transport.send_single(&record)) {
                    healops_debug!(name: "Batcher.SingleSendFailed", error = format!("{err}"));
                }
            }
            Ok(BatchMessage::ForceFlush(sender)) => {
                healops_debug!(name: "Batcher.ExportingDueToForceFlush");
                let result = export_batch(&runtime, &transport, &mut buffer, &mut last_export_time);
                let _ = sender.send(result);
            }
            Ok(BatchMessage::Shutdown(sender)) => {
                healops_debug!(name: "Batcher.ExportingDueToShutdown");
                let result = export_batch(&runtime, &transport, &mut buffer, &mut last_export_time);
                let _ = sender.send(result);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !buffer.is_empty() {
                    healops_debug!(name: "Batcher.ExportingDueToTimer");
                }
                export_batch(&runtime, &transport, &mut buffer, &mut last_export_time);
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Every façade handle is gone; drain what's left and exit.
                export_batch(&runtime, &transport, &mut buffer, &mut last_export_time);
                break;
            }
        }
    }

    healops_debug!(name: "Batcher.ThreadStopped");
}

/// Export the buffered snapshot. On batch failure, fall back to per-record
/// delivery; the snapshot is never requeued.
fn export_batch(
    runtime: &tokio::runtime::Runtime,
    transport: &Transport,
    buffer: &mut Vec<LogRecord>,
    last_export_time: &mut Instant,
) -> SdkResult {
    *last_export_time = Instant::now();

    if buffer.is_empty() {
        return Ok(());
    }

    let snapshot = std::mem::take(buffer);
    match runtime.block_on(transport.send_batch(&snapshot)) {
        Ok(()) => Ok(()),
        Err(err) => {
            healops_debug!(
                name: "Batcher.BatchEndpointUnavailable",
                record_count = snapshot.len(),
                error = format!("{err}")
            );
            for record in &snapshot {
                if let Err(err) = runtime.block_on(transport.send_single(record)) {
                    healops_debug!(name: "Batcher.FallbackSendFailed", error = format!("{err}"));
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::{SourceMapCaches, SourceMapResolver};
    use crate::stack::StackFilter;
    use crate::testing::RecordingClient;
    use crate::transport::{LOGS_BATCH_PATH, LOGS_PATH};
    use healops::logs::{Metadata, Severity};
    use url::Url;

    fn build(
        client: Arc<RecordingClient>,
        configure: impl FnOnce(crate::config::ConfigBuilder) -> crate::config::ConfigBuilder,
    ) -> Batcher {
        let config = configure(Config::builder("key", "svc").with_debug(false))
            .build()
            .unwrap();
        let transport = Arc::new(Transport::new(
            client.clone(),
            Url::parse("https://ingest.example").unwrap(),
            "key".to_string(),
        ));
        let resolver = Arc::new(SourceMapResolver::with_caches(
            client,
            Arc::new(SourceMapCaches::new(16)),
        ));
        Batcher::new(config, transport, Enricher::new(StackFilter::default(), resolver))
    }

    fn record(message: &str) -> PendingRecord {
        PendingRecord::capture(Severity::Info, message.to_string(), Metadata::new())
    }

    fn wait_for_requests(client: &RecordingClient, count: usize, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        while Instant::now() < deadline {
            if client.requests().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn uris(client: &RecordingClient) -> Vec<String> {
        client.requests().iter().map(|request| request.uri.clone()).collect()
    }

    #[test]
    fn size_threshold_triggers_batch_export() {
        let client = Arc::new(RecordingClient::ok());
        let batcher = build(client.clone(), |config| {
            config.with_batch_size(3).with_batch_interval_ms(60_000)
        });

        batcher.enqueue(record("one"));
        batcher.enqueue(record("two"));
        batcher.enqueue(record("three"));

        assert!(wait_for_requests(&client, 1, Duration::from_secs(5)));
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].uri.ends_with(LOGS_BATCH_PATH));
        let logs = requests[0].body_json()["logs"].as_array().unwrap().clone();
        assert_eq!(logs.len(), 3);
        let messages: Vec<_> = logs.iter().map(|log| log["message"].as_str().unwrap().to_string()).collect();
        assert_eq!(messages, ["one", "two", "three"]);

        batcher.shutdown().unwrap();
    }

    #[test]
    fn interval_elapsing_triggers_export() {
        let client = Arc::new(RecordingClient::ok());
        let batcher = build(client.clone(), |config| {
            config.with_batch_size(100).with_batch_interval_ms(100)
        });

        batcher.enqueue(record("only"));

        assert!(wait_for_requests(&client, 1, Duration::from_secs(5)));
        let requests = client.requests();
        assert!(requests[0].uri.ends_with(LOGS_BATCH_PATH));
        assert_eq!(requests[0].body_json()["logs"].as_array().unwrap().len(), 1);

        batcher.shutdown().unwrap();
    }

    #[test]
    fn failed_batch_falls_back_to_single_sends() {
        // Three failing batch attempts, then 2xx for the per-record sends.
        let client = Arc::new(RecordingClient::with_statuses(vec![500, 500, 500, 200, 200]));
        let batcher = build(client.clone(), |config| {
            config.with_batch_size(2).with_batch_interval_ms(60_000)
        });

        batcher.enqueue(record("one"));
        batcher.enqueue(record("two"));

        assert!(wait_for_requests(&client, 5, Duration::from_secs(10)));
        let uris = uris(&client);
        assert_eq!(uris.len(), 5);
        assert!(uris[..3].iter().all(|uri| uri.ends_with(LOGS_BATCH_PATH)));
        assert!(uris[3..].iter().all(|uri| uri.ends_with(LOGS_PATH)));

        batcher.shutdown().unwrap();
    }

    #[test]
    fn batching_disabled_sends_each_record_individually() {
        let client = Arc::new(RecordingClient::ok());
        let batcher = build(client.clone(), |config| config.with_batching(false));

        batcher.enqueue(record("one"));
        batcher.enqueue(record("two"));

        assert!(wait_for_requests(&client, 2, Duration::from_secs(5)));
        assert!(uris(&client).iter().all(|uri| uri.ends_with(LOGS_PATH)));

        batcher.shutdown().unwrap();
    }

    #[test]
    fn force_flush_exports_immediately() {
        let client = Arc::new(RecordingClient::ok());
        let batcher = build(client.clone(), |config| {
            config.with_batch_size(100).with_batch_interval_ms(60_000)
        });

        batcher.enqueue(record("pending"));
        batcher.force_flush().unwrap();

        assert_eq!(client.requests().len(), 1);
        batcher.shutdown().unwrap();
    }

    #[test]
    fn concurrent_flushes_produce_one_batch_post() {
        let client = Arc::new(RecordingClient::ok());
        let batcher = Arc::new(build(client.clone(), |config| {
            config.with_batch_size(100).with_batch_interval_ms(60_000)
        }));

        batcher.enqueue(record("one"));
        batcher.enqueue(record("two"));

        let first = {
            let batcher = batcher.clone();
            thread::spawn(move || batcher.force_flush())
        };
        let second = {
            let batcher = batcher.clone();
            thread::spawn(move || batcher.force_flush())
        };
        first.join().unwrap().unwrap();
        second.join().unwrap().unwrap();

        let batch_posts = uris(&client)
            .iter()
            .filter(|uri| uri.ends_with(LOGS_BATCH_PATH))
            .count();
        assert_eq!(batch_posts, 1);

        batcher.shutdown().unwrap();
    }

    #[test]
    fn shutdown_drains_and_rejects_further_records() {
        let client = Arc::new(RecordingClient::ok());
        let batcher = build(client.clone(), |config| {
            config.with_batch_size(100).with_batch_interval_ms(60_000)
        });

        batcher.enqueue(record("pending"));
        batcher.shutdown().unwrap();

        let after_shutdown = client.requests().len();
        assert_eq!(after_shutdown, 1);

        batcher.enqueue(record("late"));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(client.requests().len(), after_shutdown);
    }

    #[test]
    fn second_shutdown_reports_already_shutdown() {
        let client = Arc::new(RecordingClient::ok());
        let batcher = build(client, |config| config);

        batcher.shutdown().unwrap();
        assert!(matches!(batcher.shutdown(), Err(SdkError::AlreadyShutdown)));
    }
}

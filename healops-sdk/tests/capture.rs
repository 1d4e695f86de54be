// Interception-layer tests: console capture, the network-call wrapper, and
// the process-level panic handler.
#![allow(missing_docs)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use healops_sdk::console::{self, ConsoleArg, ConsoleChannel, ConsoleSink};
use healops_sdk::testing::RecordingClient;
use healops_sdk::{Logger, RecordType};
use healops_http::HttpClient;
use serde_json::Value;

// The console sink and the panic hook are process globals; tests touching
// them serialize here.
static CONSOLE_LOCK: Mutex<()> = Mutex::new(());
static PANIC_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Default)]
struct QuietSink;

impl ConsoleSink for QuietSink {
    fn write(&self, _channel: ConsoleChannel, _args: &[ConsoleArg]) {}
}

fn logger_with(client: Arc<RecordingClient>) -> healops_sdk::LoggerBuilder {
    Logger::builder("test-key", "svc")
        .with_http_client(client)
        .with_capture_console(false)
        .with_capture_errors(false)
        .with_capture_traces(false)
        .with_batch_size(100)
        .with_batch_interval_ms(10_000)
        .with_debug(false)
}

fn delivered(client: &RecordingClient) -> Vec<Value> {
    client
        .requests()
        .iter()
        .flat_map(|request| {
            request.body_json()["logs"]
                .as_array()
                .cloned()
                .unwrap_or_default()
        })
        .collect()
}

#[test]
fn console_error_with_an_error_value_becomes_an_error_record() {
    let _lock = CONSOLE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let previous = console::set_console(Arc::new(QuietSink));

    let client = Arc::new(RecordingClient::ok());
    let logger = logger_with(client.clone())
        .with_capture_console(true)
        .build()
        .unwrap();

    let stack = "Error: boom\n    at explode (https://app.example/src/bomb.ts:3:9)";
    console::error(&[ConsoleArg::error("Error", "boom", Some(stack.to_string()))]);
    logger.flush().unwrap();

    let logs = delivered(&client);
    assert_eq!(logs.len(), 1);
    let record = &logs[0];
    assert_eq!(record["severity"], "ERROR");
    assert!(record["message"].as_str().unwrap().contains("boom"));
    let exception = &record["metadata"]["exception"];
    assert_eq!(exception["type"], "Error");
    assert_eq!(exception["message"], "boom");
    assert!(!exception["stacktrace"].as_str().unwrap().is_empty());
    assert_eq!(record["metadata"]["filePath"], "https://app.example/src/bomb.ts");

    logger.destroy().unwrap();
    console::set_console(previous);
}

#[test]
fn console_channels_map_onto_the_severity_scale() {
    let _lock = CONSOLE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let previous = console::set_console(Arc::new(QuietSink));

    let client = Arc::new(RecordingClient::ok());
    let logger = logger_with(client.clone())
        .with_capture_console(true)
        .build()
        .unwrap();

    console::log(&["plain".into()]);
    console::info(&["informational".into()]);
    console::debug(&["debuggy".into()]);
    console::warn(&["careful".into()]);
    console::error(&["broken".into()]);
    logger.flush().unwrap();

    let severities: Vec<_> = delivered(&client)
        .iter()
        .map(|log| log["severity"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(severities, ["INFO", "INFO", "INFO", "WARNING", "ERROR"]);

    logger.destroy().unwrap();
    console::set_console(previous);
}

#[test]
fn intercepted_output_still_reaches_the_original_sink() {
    let _lock = CONSOLE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    #[derive(Debug, Default)]
    struct ProbeSink {
        lines: Mutex<Vec<String>>,
    }
    impl ConsoleSink for ProbeSink {
        fn write(&self, _channel: ConsoleChannel, args: &[ConsoleArg]) {
            let rendered = args
                .iter()
                .map(|arg| match arg {
                    ConsoleArg::Text(text) => text.clone(),
                    other => format!("{other:?}"),
                })
                .collect::<Vec<_>>()
                .join(" ");
            self.lines.lock().unwrap_or_else(|e| e.into_inner()).push(rendered);
        }
    }

    let probe = Arc::new(ProbeSink::default());
    let previous = console::set_console(probe.clone());

    let client = Arc::new(RecordingClient::ok());
    let logger = logger_with(client.clone())
        .with_capture_console(true)
        .build()
        .unwrap();

    console::log(&["hello developers".into()]);
    logger.destroy().unwrap();

    // After destroy the original sink is restored and capture stops.
    console::log(&["after destroy".into()]);
    let lines = probe.lines.lock().unwrap_or_else(|e| e.into_inner()).clone();
    assert_eq!(lines, ["hello developers", "after destroy"]);

    let captured = delivered(&client);
    assert_eq!(captured.len(), 1, "only the pre-destroy line was captured");

    console::set_console(previous);
}

#[tokio::test]
async fn http_error_responses_are_reported_and_passed_through() {
    let ingestion = Arc::new(RecordingClient::ok());
    let logger = logger_with(ingestion.clone()).build().unwrap();

    let upstream = Arc::new(RecordingClient::with_statuses(vec![503]));
    let instrumented = logger.instrument_client(upstream);

    let request = http::Request::builder()
        .method(http::Method::GET)
        .uri("https://example/x")
        .body(Vec::new())
        .unwrap();
    let response = instrumented.send(request).await.unwrap();
    assert_eq!(response.status().as_u16(), 503, "response passes through");

    logger.flush().unwrap();

    let logs = delivered(&ingestion);
    assert_eq!(logs.len(), 1);
    let record = &logs[0];
    assert_eq!(record["severity"], "ERROR");
    let metadata = &record["metadata"];
    assert_eq!(metadata["type"], "http_error");
    assert_eq!(metadata["status"], 503);
    assert_eq!(metadata["url"], "https://example/x");
    assert_eq!(metadata["method"], "GET");
    let stack = metadata["stack"].as_str().unwrap();
    assert!(!stack.is_empty());
    assert!(!stack.contains("window.fetch"));

    logger.destroy().unwrap();
}

#[tokio::test]
async fn network_failures_are_reported_and_rethrown() {
    let ingestion = Arc::new(RecordingClient::ok());
    let logger = logger_with(ingestion.clone()).build().unwrap();

    let upstream = Arc::new(RecordingClient::erroring("connection refused"));
    let instrumented = logger.instrument_client(upstream);

    let request = http::Request::builder()
        .method(http::Method::POST)
        .uri("https://example/submit")
        .body(Vec::new())
        .unwrap();
    let err = instrumented.send(request).await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));

    logger.flush().unwrap();

    let logs = delivered(&ingestion);
    assert_eq!(logs.len(), 1);
    let metadata = &logs[0]["metadata"];
    assert_eq!(metadata["type"], "network_error");
    assert_eq!(metadata["url"], "https://example/submit");
    assert_eq!(metadata["errorMessage"], "connection refused");

    logger.destroy().unwrap();
}

#[test]
fn panics_are_captured_as_critical_uncaught_exceptions() {
    let _lock = PANIC_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // Silence the default hook's output for the intentional panics below.
    std::panic::set_hook(Box::new(|_| {}));

    let client = Arc::new(RecordingClient::ok());
    let logger = logger_with(client.clone())
        .with_capture_errors(true)
        .build()
        .unwrap();

    let result = std::thread::spawn(|| panic!("kaboom")).join();
    assert!(result.is_err());
    logger.flush().unwrap();

    let logs = delivered(&client);
    assert_eq!(logs.len(), 1);
    let record = &logs[0];
    assert_eq!(record["severity"], "CRITICAL");
    assert!(record["message"].as_str().unwrap().contains("kaboom"));
    let metadata = &record["metadata"];
    assert_eq!(metadata["type"], "uncaught_exception");
    assert!(metadata["filePath"].as_str().unwrap().ends_with("capture.rs"));
    assert_eq!(metadata["exception"]["message"], "kaboom");

    // Destroy deactivates the hook: no record, and the chained previous
    // hook keeps running untouched.
    logger.destroy().unwrap();
    let before = client.requests().len();
    let _ = std::thread::spawn(|| panic!("ignored")).join();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(client.requests().len(), before);

    let _ = std::panic::take_hook();
}

#[test]
fn report_error_maps_kinds_onto_severities() {
    let client = Arc::new(RecordingClient::ok());
    let logger = logger_with(client.clone()).build().unwrap();

    let failure = std::io::Error::new(std::io::ErrorKind::TimedOut, "await never completed");
    logger.report_error(RecordType::UnhandledPromiseRejection, &failure);
    logger.report_error(RecordType::HttpError, &failure);
    logger.flush().unwrap();

    let logs = delivered(&client);
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["severity"], "CRITICAL");
    assert_eq!(logs[0]["metadata"]["type"], "unhandled_promise_rejection");
    assert_eq!(logs[1]["severity"], "ERROR");
    assert_eq!(logs[1]["metadata"]["type"], "http_error");

    logger.destroy().unwrap();
}

//! Process-level capture of uncaught exceptions.
//!
//! The panic hook chains to whatever hook was installed before it, so the
//! user-visible panic output is unchanged. Uninstalling flips a flag instead
//! of re-registering: the previous hook keeps running exactly as before and
//! the process ends up with no net-new panic behavior.

use std::backtrace::Backtrace;
use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use healops::logs::{keys, Metadata, RecordType, Severity};
use serde_json::Value;

use crate::enrich::in_sdk_scope;
use crate::logger::LoggerHandle;

/// Deactivates the capture hook on uninstall (or drop of the owning logger).
#[derive(Debug)]
pub(crate) struct PanicHookGuard {
    enabled: Arc<AtomicBool>,
}

impl PanicHookGuard {
    pub(crate) fn uninstall(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

/// Install a panic hook that records every panic as a CRITICAL
/// `uncaught_exception` before delegating to the previously installed hook.
pub(crate) fn install_panic_hook(logger: LoggerHandle) -> PanicHookGuard {
    let enabled = Arc::new(AtomicBool::new(true));
    let active = enabled.clone();
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        // Panics raised while the SDK itself is on the stack must not loop
        // back into the pipeline.
        if active.load(Ordering::Relaxed) && !in_sdk_scope() {
            let message = panic_message(info);
            let mut metadata = Metadata::new();
            metadata.insert(
                keys::TYPE.to_string(),
                Value::String(RecordType::UncaughtException.as_str().to_string()),
            );
            metadata.insert(
                keys::ERROR_NAME.to_string(),
                Value::String("panic".to_string()),
            );
            metadata.insert(
                keys::ERROR_MESSAGE.to_string(),
                Value::String(message.clone()),
            );
            metadata.insert(
                keys::STACK.to_string(),
                Value::String(Backtrace::force_capture().to_string()),
            );
            if let Some(location) = info.location() {
                metadata.insert(
                    keys::FILE_PATH.to_string(),
                    Value::String(location.file().to_string()),
                );
                metadata.insert(keys::LINE.to_string(), Value::from(location.line()));
                metadata.insert(keys::COLUMN.to_string(), Value::from(location.column()));
            }
            logger.log_with(Severity::Critical, message, metadata);
        }

        previous(info);
    }));

    PanicHookGuard { enabled }
}

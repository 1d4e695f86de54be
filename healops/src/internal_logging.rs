//! Diagnostic macros for the SDK's own plumbing.
//!
//! SDK internals must never report through the log façade or the
//! intercepted console (that would feed the pipeline back into itself), so
//! they emit through `tracing` instead, where a host subscriber can pick
//! them up while debugging the SDK. All four severity macros funnel into
//! [`healops_diag!`]; with the `internal-logs` feature disabled the
//! invocations compile away.

/// Dispatch macro behind the `healops_*!` diagnostic family.
///
/// Takes the `tracing` level as its first argument, then an event name and
/// any number of `key = value` fields.
#[doc(hidden)]
#[macro_export]
macro_rules! healops_diag {
    ($level:ident, name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        tracing::$level!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value,)* "");
        #[cfg(not(feature = "internal-logs"))]
        {
            _ = ($name $(, $value)*);
        }
    }};
}

/// Emit an informational SDK diagnostic.
///
/// # Example:
/// ```rust
/// use healops::healops_info;
/// healops_info!(name: "sdk_start", version = "1.0.0");
/// ```
#[macro_export]
macro_rules! healops_info {
    ($($tail:tt)*) => {
        $crate::healops_diag!(info, $($tail)*)
    };
}

/// Emit an SDK warning diagnostic.
///
/// # Example:
/// ```rust
/// use healops::healops_warn;
/// healops_warn!(name: "transport_retry", status = 503);
/// ```
#[macro_export]
macro_rules! healops_warn {
    ($($tail:tt)*) => {
        $crate::healops_diag!(warn, $($tail)*)
    };
}

/// Emit a debug-level SDK diagnostic.
///
/// # Example:
/// ```rust
/// use healops::healops_debug;
/// healops_debug!(name: "batcher_flush", batch_size = 50);
/// ```
#[macro_export]
macro_rules! healops_debug {
    ($($tail:tt)*) => {
        $crate::healops_diag!(debug, $($tail)*)
    };
}

/// Emit an SDK error diagnostic.
///
/// # Example:
/// ```rust
/// use healops::healops_error;
/// healops_error!(name: "export_failure", error_code = 500);
/// ```
#[macro_export]
macro_rules! healops_error {
    ($($tail:tt)*) => {
        $crate::healops_diag!(error, $($tail)*)
    };
}

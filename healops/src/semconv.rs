//! Semantic-convention attribute keys attached during enrichment.
//!
//! These follow the OpenTelemetry semantic conventions for code and
//! exception attributes so that HealOps records line up with records
//! produced by OTel-instrumented services.

/// The source code file path of the call site.
///
/// Examples: `pages/Home.tsx`, `src/server.rs`
pub const CODE_FILE_PATH: &str = "code.file.path";

/// The 1-based line number of the call site.
///
/// Examples: `42`
pub const CODE_LINE_NUMBER: &str = "code.line.number";

/// The 0-based column number of the call site.
///
/// Examples: `16`
pub const CODE_COLUMN_NUMBER: &str = "code.column.number";

/// The method or function name of the call site.
///
/// Examples: `loadOrders`, `handle_request`
pub const CODE_FUNCTION_NAME: &str = "code.function.name";

/// The type of the exception.
///
/// Examples: `TypeError`, `java.net.ConnectException`
pub const EXCEPTION_TYPE: &str = "exception.type";

/// The exception message.
///
/// Examples: `Division by zero`
pub const EXCEPTION_MESSAGE: &str = "exception.message";

/// A stacktrace as a string in the natural representation of the runtime.
pub const EXCEPTION_STACKTRACE: &str = "exception.stacktrace";

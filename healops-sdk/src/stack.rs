//! Stack-trace parsing and SDK-frame filtering.
//!
//! Runtime stack strings arrive in three dialects: V8 `at fn (file:L:C)`,
//! V8 `at file:L:C`, and SpiderMonkey `fn@file:L:C`. Frames are matched
//! tolerantly; a line that fits no dialect (error-message preamble, truncated
//! frame) is skipped, never an error. Rust backtrace location lines
//! (`at /path/file.rs:L:C`) parse under the bare V8 form, which is what makes
//! synthetic backtraces captured by the façade resolvable.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::sourcemap::is_bundled_path;

/// A single resolved stack frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// File path or URL the frame points at.
    pub file_path: String,
    /// 1-based line number.
    pub line: u32,
    /// 0-based column number.
    pub column: u32,
    /// Function name, when the dialect carries one.
    pub function_name: Option<String>,
}

static V8_NAMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*at\s+(.+?)\s+\((.+?):(\d+):(\d+)\)\s*$").expect("valid frame regex")
});
static V8_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*at\s+(.+?):(\d+):(\d+)\s*$").expect("valid frame regex"));
static SPIDERMONKEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(.*?)@(.+?):(\d+):(\d+)\s*$").expect("valid frame regex"));

/// Frames produced by the SDK itself. Fixed; matched against the whole
/// frame line so both function names and pathnames are covered.
const SDK_FRAME_PATTERNS: &[&str] = &[
    r"HealOpsLogger",
    r"healops[-_]opentelemetry",
    r"ConsoleInterceptor",
    r"getCallerInfo",
    r"sendLog",
    r"initHealOpsLogger",
    r"at\s+(?:Object\.)?(?:info|warn|error|critical)\s+\(",
    r"^\s*(?:info|warn|error|critical)@",
    r"healops[-_]sdk",
    r"healops::",
];

/// The SDK's wrapped network primitive and common third-party logging
/// interceptors. Extendable through configuration.
const INTERCEPTOR_FRAME_PATTERNS: &[&str] = &[
    r"window\.fetch",
    r"InstrumentedClient",
    r"node_modules/@sentry/",
    r"node_modules/@datadog/",
    r"node_modules/datadog-",
    r"node_modules/logrocket",
];

/// Deny-list matcher for SDK and interceptor frames.
#[derive(Clone, Debug)]
pub struct StackFilter {
    deny: Vec<Regex>,
}

impl Default for StackFilter {
    fn default() -> Self {
        StackFilter::new(&[])
    }
}

impl StackFilter {
    /// Build a filter from the built-in deny-list plus extra interceptor
    /// patterns. Invalid extra patterns are dropped silently.
    pub fn new(extra_interceptor_patterns: &[String]) -> Self {
        let deny = SDK_FRAME_PATTERNS
            .iter()
            .chain(INTERCEPTOR_FRAME_PATTERNS)
            .map(|pattern| Regex::new(pattern).expect("valid deny-list regex"))
            .chain(
                extra_interceptor_patterns
                    .iter()
                    .filter_map(|pattern| Regex::new(pattern).ok()),
            )
            .collect();
        StackFilter { deny }
    }

    /// Whether the frame line matches the deny-list.
    pub fn is_denied(&self, line: &str) -> bool {
        self.deny.iter().any(|regex| regex.is_match(line))
    }

    /// Parse the first frame that survives the deny-list, top-down.
    pub fn parse_first_caller(&self, stack: &str) -> Option<Frame> {
        stack
            .lines()
            .filter(|line| !self.is_denied(line))
            .find_map(parse_frame)
    }

    /// Extract the first meaningful file path from a stack.
    ///
    /// Prefers the first surviving frame whose path is not a build artefact;
    /// when every surviving frame is bundled, returns the first bundled path
    /// iff `allow_bundled`.
    pub fn extract_first_meaningful_path(&self, stack: &str, allow_bundled: bool) -> Option<String> {
        let mut first_bundled = None;
        for frame in stack
            .lines()
            .filter(|line| !self.is_denied(line))
            .filter_map(parse_frame)
        {
            if is_bundled_path(&frame.file_path) {
                first_bundled.get_or_insert(frame.file_path);
            } else {
                return Some(frame.file_path);
            }
        }
        if allow_bundled {
            first_bundled
        } else {
            None
        }
    }

    /// Remove deny-listed frames, preserving preamble and unknown lines.
    pub fn clean_stack(&self, stack: &str) -> String {
        stack
            .lines()
            .filter(|line| !(is_frame_line(line) && self.is_denied(line)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Whether the line matches any known frame dialect.
pub(crate) fn is_frame_line(line: &str) -> bool {
    V8_NAMED.is_match(line) || V8_BARE.is_match(line) || SPIDERMONKEY.is_match(line)
}

/// Parse one frame line in any of the three dialects.
///
/// Malformed frames (line 0, numeric overflow) yield `None`.
pub(crate) fn parse_frame(line: &str) -> Option<Frame> {
    if let Some(captures) = V8_NAMED.captures(line) {
        return build_frame(
            captures.get(2)?.as_str(),
            captures.get(3)?.as_str(),
            captures.get(4)?.as_str(),
            Some(captures.get(1)?.as_str()),
        );
    }
    if let Some(captures) = V8_BARE.captures(line) {
        return build_frame(
            captures.get(1)?.as_str(),
            captures.get(2)?.as_str(),
            captures.get(3)?.as_str(),
            None,
        );
    }
    if let Some(captures) = SPIDERMONKEY.captures(line) {
        let name = captures.get(1)?.as_str().trim();
        return build_frame(
            captures.get(2)?.as_str(),
            captures.get(3)?.as_str(),
            captures.get(4)?.as_str(),
            (!name.is_empty()).then_some(name),
        );
    }
    None
}

fn build_frame(path: &str, line: &str, column: &str, name: Option<&str>) -> Option<Frame> {
    let line = line.parse::<u32>().ok()?;
    let column = column.parse::<u32>().ok()?;
    if line < 1 {
        return None;
    }
    Some(Frame {
        file_path: path.trim().to_string(),
        line,
        column,
        function_name: name.map(|name| name.trim().to_string()),
    })
}

//! Source-map resolution of bundled file paths.
//!
//! Build artefacts (minified chunks, Next.js static bundles) carry no useful
//! location on their own; the resolver fetches their source maps lazily at
//! runtime and rewrites positions back to original sources. Everything here
//! is best-effort and fail-soft: a resolution that cannot complete returns
//! the input path so traceability is never lost.
//!
//! Two process-global FIFO-bounded caches hold the discovery and parse
//! results, negative entries included, so a missing map is fetched at most
//! once per process.

mod consumer;

pub use consumer::{OriginalPosition, SourceMapConsumer, SourceMapError};

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::Engine;
use healops_http::HttpClient;
use http::{Method, Request};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::config::{truthy_env, HEALOPS_DEBUG_SOURCEMAPS};
use crate::stack::parse_frame;

/// Default bound for both source-map caches.
pub(crate) const DEFAULT_CACHE_SIZE: usize = 1_000;

const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

const DATA_URL_PREFIX: &str = "data:application/json;base64,";

static CHUNK_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"chunk-[a-f0-9]+\.js").expect("valid chunk regex"));

/// Whether the path denotes a build artefact rather than an original source.
pub fn is_bundled_path(path: &str) -> bool {
    path.contains("/_next/static/chunks/")
        || path.contains("/_next/static/")
        || path.contains(".min.js")
        || CHUNK_FILE.is_match(path)
}

/// Strip bundler prefixes from a mapped source path.
///
/// `webpack://` and a following `./` carry no information for the reader.
pub(crate) fn clean_source_path(source: &str) -> String {
    match source.strip_prefix("webpack://") {
        Some(rest) => rest.trim_start_matches("./").to_string(),
        None => source.to_string(),
    }
}

fn sourcemap_trace(message: fmt::Arguments<'_>) {
    // Diagnostics go straight to stderr: this code runs under intercepted
    // logging primitives and must not feed back into them.
    static ENABLED: Lazy<bool> = Lazy::new(|| truthy_env(HEALOPS_DEBUG_SOURCEMAPS));
    if *ENABLED {
        eprintln!("[healops sourcemap] {message}");
    }
}

/// A bounded map that evicts its oldest entry once full.
#[derive(Debug)]
pub(crate) struct FifoCache<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    max_size: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> FifoCache<K, V> {
    pub(crate) fn new(max_size: usize) -> Self {
        FifoCache {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, key: K, value: V) {
        if !self.entries.contains_key(&key) {
            if self.order.len() >= self.max_size {
                if let Some(oldest) = self.order.pop_front() {
                    // Parsed consumers may hold native resources in some
                    // bindings; dropping the value here releases them.
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, value);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The two process-wide source-map caches.
///
/// `map_urls` remembers where each JS file's map lives (`None` = the file
/// has no map, never ask again). `consumers` holds parsed maps keyed by map
/// URL (`None` = fetching or parsing failed, never retry).
#[derive(Debug)]
pub(crate) struct SourceMapCaches {
    map_urls: Mutex<FifoCache<String, Option<String>>>,
    consumers: Mutex<FifoCache<String, Option<Arc<SourceMapConsumer>>>>,
}

impl SourceMapCaches {
    pub(crate) fn new(max_size: usize) -> Self {
        SourceMapCaches {
            map_urls: Mutex::new(FifoCache::new(max_size)),
            consumers: Mutex::new(FifoCache::new(max_size)),
        }
    }

    /// The process-global caches. Source maps describe the immutable build
    /// artefact, so every logger instance shares them.
    pub(crate) fn global() -> Arc<SourceMapCaches> {
        static GLOBAL: Lazy<Arc<SourceMapCaches>> =
            Lazy::new(|| Arc::new(SourceMapCaches::new(DEFAULT_CACHE_SIZE)));
        GLOBAL.clone()
    }

    fn map_urls(&self) -> MutexGuard<'_, FifoCache<String, Option<String>>> {
        self.map_urls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn consumers(&self) -> MutexGuard<'_, FifoCache<String, Option<Arc<SourceMapConsumer>>>> {
        self.consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Lazily fetching resolver of bundled positions. Cheap to clone.
#[derive(Clone)]
pub struct SourceMapResolver {
    client: Arc<dyn HttpClient>,
    caches: Arc<SourceMapCaches>,
}

impl fmt::Debug for SourceMapResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceMapResolver").finish()
    }
}

impl SourceMapResolver {
    /// Create a resolver backed by the process-global caches.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        SourceMapResolver {
            client,
            caches: SourceMapCaches::global(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_caches(client: Arc<dyn HttpClient>, caches: Arc<SourceMapCaches>) -> Self {
        SourceMapResolver { client, caches }
    }

    /// Map a bundled position back to its original source position.
    ///
    /// Returns `None` for non-bundled paths and on any resolution failure.
    pub async fn resolve_position(
        &self,
        path: &str,
        line: u32,
        column: u32,
    ) -> Option<OriginalPosition> {
        if !is_bundled_path(path) {
            return None;
        }
        let consumer = self.consumer_for(path).await?;
        let mut position = consumer.original_position_for(line, column)?;
        position.source = clean_source_path(&position.source);
        Some(position)
    }

    /// Resolve a path to its original source path.
    ///
    /// Non-bundled paths pass through unchanged. For bundled paths the
    /// original source is returned when resolution succeeds; otherwise the
    /// bundled path itself iff `return_bundled_on_fail`.
    pub async fn resolve_file_path(
        &self,
        path: &str,
        line: Option<u32>,
        column: Option<u32>,
        return_bundled_on_fail: bool,
    ) -> Option<String> {
        if !is_bundled_path(path) {
            return Some(path.to_string());
        }
        match self
            .resolve_position(path, line.unwrap_or(1), column.unwrap_or(0))
            .await
        {
            Some(position) => Some(position.source),
            None if return_bundled_on_fail => Some(path.to_string()),
            None => None,
        }
    }

    /// Rewrite every bundled frame of a stack to its original position.
    /// Frames that are not bundled, or fail to resolve, are preserved
    /// verbatim.
    pub async fn rewrite_stack(&self, stack: &str) -> String {
        let mut rewritten = Vec::new();
        for line in stack.lines() {
            let mut out = line.to_string();
            if let Some(frame) = parse_frame(line) {
                if is_bundled_path(&frame.file_path) {
                    if let Some(position) = self
                        .resolve_position(&frame.file_path, frame.line, frame.column)
                        .await
                    {
                        let from = format!("{}:{}:{}", frame.file_path, frame.line, frame.column);
                        let to = format!("{}:{}:{}", position.source, position.line, position.column);
                        out = line.replace(&from, &to);
                    }
                }
            }
            rewritten.push(out);
        }
        rewritten.join("\n")
    }

    /// Whether any line of the stack points into a build artefact.
    pub(crate) fn stack_has_bundled_frames(stack: &str) -> bool {
        stack
            .lines()
            .filter_map(parse_frame)
            .any(|frame| is_bundled_path(&frame.file_path))
    }

    async fn consumer_for(&self, js_url: &str) -> Option<Arc<SourceMapConsumer>> {
        let cached = self.caches.map_urls().get(&js_url.to_string());
        let map_url = match cached {
            Some(Some(map_url)) => map_url,
            Some(None) => return None,
            None => {
                let discovered = self.discover_map_url(js_url).await;
                self.caches
                    .map_urls()
                    .insert(js_url.to_string(), discovered.clone());
                match discovered {
                    Some(map_url) => map_url,
                    None => return None,
                }
            }
        };

        if let Some(entry) = self.caches.consumers().get(&map_url) {
            return entry;
        }

        let consumer = self.fetch_consumer(&map_url).await;
        if consumer.is_none() {
            // A dead map URL also poisons the JS entry, preventing repeated
            // 404 storms for every record out of the same chunk.
            self.caches.map_urls().insert(js_url.to_string(), None);
        }
        self.caches
            .consumers()
            .insert(map_url.clone(), consumer.clone());
        consumer
    }

    /// Fetch the JS file and extract its `sourceMappingURL` reference.
    async fn discover_map_url(&self, js_url: &str) -> Option<String> {
        let body = self.fetch(js_url).await?;
        let text = String::from_utf8_lossy(&body);
        let reference = extract_source_mapping_url(&text)?;

        if reference.starts_with(DATA_URL_PREFIX) {
            return Some(reference.to_string());
        }

        let base = Url::parse(js_url).ok()?;
        let resolved = base.join(reference).ok()?;
        Some(resolved.to_string())
    }

    async fn fetch_consumer(&self, map_url: &str) -> Option<Arc<SourceMapConsumer>> {
        let bytes = if let Some(encoded) = map_url.strip_prefix(DATA_URL_PREFIX) {
            base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .ok()?
        } else {
            self.fetch(map_url).await?
        };

        match SourceMapConsumer::parse(&bytes) {
            Ok(consumer) => Some(Arc::new(consumer)),
            Err(err) => {
                sourcemap_trace(format_args!("failed to parse {map_url}: {err}"));
                None
            }
        }
    }

    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(url)
            .body(Vec::new())
            .ok()?;

        match tokio::time::timeout(FETCH_TIMEOUT, self.client.send(request)).await {
            Err(_) => {
                sourcemap_trace(format_args!("fetch of {url} timed out"));
                None
            }
            Ok(Err(err)) => {
                sourcemap_trace(format_args!("fetch of {url} failed: {err}"));
                None
            }
            Ok(Ok(response)) if !response.status().is_success() => {
                sourcemap_trace(format_args!(
                    "fetch of {url} returned status {}",
                    response.status()
                ));
                None
            }
            Ok(Ok(response)) => Some(response.into_body().to_vec()),
        }
    }
}

/// Find the trailing `sourceMappingURL` comment in a JS file.
fn extract_source_mapping_url(text: &str) -> Option<&str> {
    text.lines().rev().find_map(|line| {
        let line = line.trim();
        line.strip_prefix("//# sourceMappingURL=")
            .or_else(|| line.strip_prefix("//@ sourceMappingURL="))
            .map(str::trim)
            .filter(|reference| !reference.is_empty())
    })
}

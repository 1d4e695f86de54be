//! Logger configuration.
//!
//! All knobs come with validated bounds; out-of-range values are clamped
//! rather than rejected so a bad dashboard setting can never keep the SDK
//! from starting. Unset `release`/`environment` fall back to the
//! `HEALOPS_RELEASE`/`HEALOPS_ENVIRONMENT` environment variables, and
//! `HEALOPS_DEBUG` force-enables diagnostic output in server contexts.

use std::env;
use std::time::Duration;

use healops::healops_warn;
use url::Url;

use crate::error::ConfigError;

/// Enables verbose SDK diagnostics when set to a truthy value.
pub const HEALOPS_DEBUG: &str = "HEALOPS_DEBUG";
/// Enables source-map resolver tracing when set to a truthy value.
pub const HEALOPS_DEBUG_SOURCEMAPS: &str = "HEALOPS_DEBUG_SOURCEMAPS";
/// Release identifier adopted when the config leaves `release` unset.
pub const HEALOPS_RELEASE: &str = "HEALOPS_RELEASE";
/// Environment name adopted when the config leaves `environment` unset.
pub const HEALOPS_ENVIRONMENT: &str = "HEALOPS_ENVIRONMENT";

/// Default ingestion endpoint.
pub(crate) const DEFAULT_ENDPOINT: &str = "https://ingest.healops.io";
/// Default record source tag.
pub(crate) const DEFAULT_SOURCE: &str = "healops-sdk";

pub(crate) const DEFAULT_BATCH_SIZE: usize = 50;
pub(crate) const MIN_BATCH_SIZE: usize = 1;
pub(crate) const MAX_BATCH_SIZE: usize = 1_000;

pub(crate) const DEFAULT_BATCH_INTERVAL_MS: u64 = 1_000;
pub(crate) const MIN_BATCH_INTERVAL_MS: u64 = 100;
pub(crate) const MAX_BATCH_INTERVAL_MS: u64 = 60_000;

pub(crate) fn truthy_env(name: &str) -> bool {
    env::var(name)
        .map(|value| {
            let value = value.trim();
            !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

/// Validated logger configuration. Build one with [`Config::builder`].
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) api_key: String,
    pub(crate) service_name: String,
    pub(crate) endpoint: Url,
    pub(crate) source: String,
    pub(crate) release: Option<String>,
    pub(crate) environment: Option<String>,
    pub(crate) enable_batching: bool,
    pub(crate) batch_size: usize,
    pub(crate) batch_interval: Duration,
    pub(crate) capture_console: bool,
    pub(crate) capture_errors: bool,
    pub(crate) capture_traces: bool,
    pub(crate) debug: bool,
    pub(crate) interceptor_frame_patterns: Vec<String>,
}

impl Config {
    /// Start building a configuration from the two required options.
    pub fn builder(api_key: impl Into<String>, service_name: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(api_key, service_name)
    }

    /// The configured service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Whether verbose diagnostics are enabled.
    pub fn debug(&self) -> bool {
        self.debug
    }
}

/// A builder for [`Config`] instances.
///
/// Values out of bounds are clamped in [`build`](ConfigBuilder::build);
/// unset `release`/`environment`/`debug` are initialized from the
/// environment variables documented on this module.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    api_key: String,
    service_name: String,
    endpoint: Option<String>,
    source: String,
    release: Option<String>,
    environment: Option<String>,
    enable_batching: bool,
    batch_size: usize,
    batch_interval_ms: u64,
    capture_console: bool,
    capture_errors: bool,
    capture_traces: bool,
    debug: Option<bool>,
    interceptor_frame_patterns: Vec<String>,
}

impl ConfigBuilder {
    fn new(api_key: impl Into<String>, service_name: impl Into<String>) -> Self {
        ConfigBuilder {
            api_key: api_key.into(),
            service_name: service_name.into(),
            endpoint: None,
            source: DEFAULT_SOURCE.to_string(),
            release: None,
            environment: None,
            enable_batching: true,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_interval_ms: DEFAULT_BATCH_INTERVAL_MS,
            capture_console: true,
            capture_errors: true,
            capture_traces: true,
            debug: None,
            interceptor_frame_patterns: Vec::new(),
        }
    }

    /// Override the ingestion base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the record source tag. Default `"healops-sdk"`.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Attach a release identifier to every record.
    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    /// Attach a deployment environment to every record.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Disable batching to send one record per request. Default enabled.
    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.enable_batching = enabled;
        self
    }

    /// Number of records that triggers a flush. Clamped to `[1, 1000]`,
    /// default 50.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Longest time a record waits before a flush, in milliseconds. Clamped
    /// to `[100, 60000]`, default 1000.
    pub fn with_batch_interval_ms(mut self, interval_ms: u64) -> Self {
        self.batch_interval_ms = interval_ms;
        self
    }

    /// Intercept the global console sink. Default true.
    pub fn with_capture_console(mut self, enabled: bool) -> Self {
        self.capture_console = enabled;
        self
    }

    /// Install the process-level panic handler. Default true.
    pub fn with_capture_errors(mut self, enabled: bool) -> Self {
        self.capture_errors = enabled;
        self
    }

    /// Run the span exporter. Default true.
    pub fn with_capture_traces(mut self, enabled: bool) -> Self {
        self.capture_traces = enabled;
        self
    }

    /// Enable verbose diagnostic output. Defaults to the `HEALOPS_DEBUG`
    /// environment variable.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Additional regex patterns identifying third-party interceptor frames
    /// to skip during caller resolution, on top of the built-in set.
    pub fn with_interceptor_frame_patterns(
        mut self,
        patterns: impl IntoIterator<Item = String>,
    ) -> Self {
        self.interceptor_frame_patterns.extend(patterns);
        self
    }

    /// Validate the required options, clamp the bounded ones, and apply the
    /// environment-variable overlay.
    pub fn build(self) -> Result<Config, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::MissingServiceName);
        }

        let endpoint = Url::parse(self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT))?;

        let batch_size = self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        if batch_size != self.batch_size {
            healops_warn!(name: "Config.BatchSizeClamped", requested = self.batch_size, clamped = batch_size);
        }
        let batch_interval_ms = self
            .batch_interval_ms
            .clamp(MIN_BATCH_INTERVAL_MS, MAX_BATCH_INTERVAL_MS);
        if batch_interval_ms != self.batch_interval_ms {
            healops_warn!(name: "Config.BatchIntervalClamped", requested = self.batch_interval_ms, clamped = batch_interval_ms);
        }

        Ok(Config {
            api_key: self.api_key,
            service_name: self.service_name,
            endpoint,
            source: self.source,
            release: self.release.or_else(|| env::var(HEALOPS_RELEASE).ok()),
            environment: self
                .environment
                .or_else(|| env::var(HEALOPS_ENVIRONMENT).ok()),
            enable_batching: self.enable_batching,
            batch_size,
            batch_interval: Duration::from_millis(batch_interval_ms),
            capture_console: self.capture_console,
            capture_errors: self.capture_errors,
            capture_traces: self.capture_traces,
            debug: self.debug.unwrap_or_else(|| truthy_env(HEALOPS_DEBUG)),
            interceptor_frame_patterns: self.interceptor_frame_patterns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_options_are_validated() {
        assert!(matches!(
            Config::builder("", "svc").build(),
            Err(ConfigError::MissingApiKey)
        ));
        assert!(matches!(
            Config::builder("key", " ").build(),
            Err(ConfigError::MissingServiceName)
        ));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = temp_env::with_vars_unset(
            [HEALOPS_DEBUG, HEALOPS_RELEASE, HEALOPS_ENVIRONMENT],
            || Config::builder("key", "svc").build().unwrap(),
        );

        assert_eq!(config.endpoint.as_str(), "https://ingest.healops.io/");
        assert_eq!(config.source, DEFAULT_SOURCE);
        assert!(config.enable_batching);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_interval, Duration::from_millis(1_000));
        assert!(config.capture_console);
        assert!(config.capture_errors);
        assert!(config.capture_traces);
        assert!(!config.debug);
        assert_eq!(config.release, None);
        assert_eq!(config.environment, None);
    }

    #[test]
    fn batch_bounds_are_clamped() {
        let config = Config::builder("key", "svc")
            .with_batch_size(0)
            .with_batch_interval_ms(10)
            .build()
            .unwrap();
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.batch_interval, Duration::from_millis(100));

        let config = Config::builder("key", "svc")
            .with_batch_size(5_000)
            .with_batch_interval_ms(600_000)
            .build()
            .unwrap();
        assert_eq!(config.batch_size, 1_000);
        assert_eq!(config.batch_interval, Duration::from_millis(60_000));
    }

    #[test]
    fn env_overlay_fills_unset_options() {
        let config = temp_env::with_vars(
            [
                (HEALOPS_DEBUG, Some("1")),
                (HEALOPS_RELEASE, Some("2024.06.1")),
                (HEALOPS_ENVIRONMENT, Some("staging")),
            ],
            || Config::builder("key", "svc").build().unwrap(),
        );

        assert!(config.debug);
        assert_eq!(config.release.as_deref(), Some("2024.06.1"));
        assert_eq!(config.environment.as_deref(), Some("staging"));
    }

    #[test]
    fn explicit_options_override_env() {
        let config = temp_env::with_vars(
            [
                (HEALOPS_DEBUG, Some("1")),
                (HEALOPS_RELEASE, Some("from-env")),
            ],
            || {
                Config::builder("key", "svc")
                    .with_debug(false)
                    .with_release("from-code")
                    .build()
                    .unwrap()
            },
        );

        assert!(!config.debug);
        assert_eq!(config.release.as_deref(), Some("from-code"));
    }

    #[test]
    fn falsy_debug_values_are_ignored() {
        temp_env::with_var(HEALOPS_DEBUG, Some("false"), || {
            assert!(!truthy_env(HEALOPS_DEBUG));
        });
        temp_env::with_var(HEALOPS_DEBUG, Some("0"), || {
            assert!(!truthy_env(HEALOPS_DEBUG));
        });
        temp_env::with_var(HEALOPS_DEBUG, Some("yes"), || {
            assert!(truthy_env(HEALOPS_DEBUG));
        });
    }
}

//! Pipeline configuration.
//!
//! [`PipelineOptions`] names the pieces a [`Pipeline`](crate::pipeline::Pipeline)
//! is assembled from. Anything left unset falls back to a default when the
//! pipeline is built.

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::BufferPool;
use crate::observability::{LogLevel, Logger, TracingLogger};
use crate::policies::{LoggingPolicy, RetryPolicy, RetrySettings};
use crate::transport::Transport;

/// Environment variable holding the application id sent in `User-Agent`.
pub const ENV_APPLICATION_ID: &str = "CLOUD_PIPELINE_APPLICATION_ID";
/// Environment variable holding the default maximum number of retries.
pub const ENV_MAX_RETRIES: &str = "CLOUD_PIPELINE_MAX_RETRIES";
/// Environment variable holding the minimum log level of the default logger.
pub const ENV_LOG_LEVEL: &str = "CLOUD_PIPELINE_LOG_LEVEL";
/// Environment variable holding the slow request threshold in milliseconds.
pub const ENV_SLOW_REQUEST_MS: &str = "CLOUD_PIPELINE_SLOW_REQUEST_MS";

/// Options for building a pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Pool for request and response buffers.
    pub pool: Option<BufferPool>,
    /// Logger used by the default logging policy.
    pub logger: Option<Arc<dyn Logger>>,
    /// Terminal transport.
    pub transport: Option<Arc<dyn Transport>>,
    /// Logging policy, replacing the default one.
    pub logging_policy: Option<LoggingPolicy>,
    /// Retry policy, replacing the default one.
    pub retry_policy: Option<RetryPolicy>,
    /// Application id prepended to the `User-Agent`.
    pub application_id: Option<String>,
    /// Slow request threshold of the default logging policy.
    pub slow_request_threshold: Option<Duration>,
    /// Whether the telemetry policy stamps `x-client-request-id`.
    pub client_request_id: bool,
}

impl PipelineOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads options from `CLOUD_PIPELINE_*` environment variables.
    ///
    /// Unset variables are skipped; unparsable ones are skipped with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads options through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(id) = lookup(ENV_APPLICATION_ID).filter(|id| !id.trim().is_empty()) {
            options.application_id = Some(id.trim().to_string());
        }

        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            match value.trim().parse::<u32>() {
                Ok(retries) => {
                    options.retry_policy =
                        Some(RetryPolicy::new(RetrySettings::default().max_retries(retries)));
                }
                Err(_) => tracing::warn!(variable = ENV_MAX_RETRIES, value = %value, "Ignoring invalid value"),
            }
        }

        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            match value.parse::<LogLevel>() {
                Ok(level) => options.logger = Some(Arc::new(TracingLogger::new(level))),
                Err(_) => tracing::warn!(variable = ENV_LOG_LEVEL, value = %value, "Ignoring invalid value"),
            }
        }

        if let Some(value) = lookup(ENV_SLOW_REQUEST_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) => options.slow_request_threshold = Some(Duration::from_millis(ms)),
                Err(_) => tracing::warn!(variable = ENV_SLOW_REQUEST_MS, value = %value, "Ignoring invalid value"),
            }
        }

        options
    }

    /// Sets the buffer pool.
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Sets the logger.
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Sets the transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the logging policy.
    pub fn with_logging_policy(mut self, policy: LoggingPolicy) -> Self {
        self.logging_policy = Some(policy);
        self
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the application id.
    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = Some(id.into());
        self
    }

    /// Sets the slow request threshold.
    pub fn with_slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.slow_request_threshold = Some(threshold);
        self
    }

    /// Enables `x-client-request-id` stamping.
    pub fn with_client_request_id(mut self) -> Self {
        self.client_request_id = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_empty_environment() {
        let options = PipelineOptions::from_lookup(lookup(&[]));
        assert!(options.application_id.is_none());
        assert!(options.retry_policy.is_none());
        assert!(options.logger.is_none());
        assert!(options.slow_request_threshold.is_none());
    }

    #[test]
    fn test_values_are_read() {
        let options = PipelineOptions::from_lookup(lookup(&[
            (ENV_APPLICATION_ID, "inventory-app"),
            (ENV_MAX_RETRIES, "5"),
            (ENV_LOG_LEVEL, "warn"),
            (ENV_SLOW_REQUEST_MS, "250"),
        ]));

        assert_eq!(options.application_id.as_deref(), Some("inventory-app"));
        assert_eq!(options.retry_policy.unwrap().settings().max_retries, 5);
        let logger = options.logger.unwrap();
        assert!(!logger.is_enabled(LogLevel::Info));
        assert!(logger.is_enabled(LogLevel::Warn));
        assert_eq!(options.slow_request_threshold, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let options = PipelineOptions::from_lookup(lookup(&[
            (ENV_APPLICATION_ID, "  "),
            (ENV_MAX_RETRIES, "many"),
            (ENV_LOG_LEVEL, "chatty"),
            (ENV_SLOW_REQUEST_MS, "-1"),
        ]));

        assert!(options.application_id.is_none());
        assert!(options.retry_policy.is_none());
        assert!(options.logger.is_none());
        assert!(options.slow_request_threshold.is_none());
    }

    #[test]
    fn test_builder_setters() {
        let options = PipelineOptions::new()
            .with_application_id("app")
            .with_client_request_id()
            .with_slow_request_threshold(Duration::from_millis(5));
        assert_eq!(options.application_id.as_deref(), Some("app"));
        assert!(options.client_request_id);
    }
}

//! Request/response logging.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Next, Policy};
use crate::context::CallContext;
use crate::errors::PipelineResult;
use crate::observability::{redact_url, LogLevel, Logger, TracingLogger};

/// Requests slower than this are reported as warnings unless configured otherwise.
pub const DEFAULT_SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(3);

/// Logs a summary of each request and its response.
///
/// At info level every request is logged as `Request: {method} {url}` and
/// every response as `Response: {status}`. Failure statuses (400-599) that
/// are not excluded produce an error entry, and calls exceeding the slow
/// request threshold produce a warning. Errors from the inner chain are
/// logged and returned unchanged.
#[derive(Debug, Clone)]
pub struct LoggingPolicy {
    logger: Arc<dyn Logger>,
    excluded_statuses: Vec<u16>,
    slow_request_threshold: Duration,
}

impl LoggingPolicy {
    /// Creates a policy writing to `logger`.
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            excluded_statuses: Vec::new(),
            slow_request_threshold: DEFAULT_SLOW_REQUEST_THRESHOLD,
        }
    }

    /// Suppresses error entries for `statuses` (e.g. an expected 404).
    pub fn exclude_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.excluded_statuses.extend(statuses);
        self
    }

    /// Sets the duration above which a call is logged as slow.
    pub fn slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.slow_request_threshold = threshold;
        self
    }

    /// Returns the logger.
    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    fn is_reported_failure(&self, status: u16) -> bool {
        (400..=599).contains(&status) && !self.excluded_statuses.contains(&status)
    }
}

impl Default for LoggingPolicy {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogger::default()))
    }
}

#[async_trait]
impl Policy for LoggingPolicy {
    async fn process(&self, context: &mut CallContext, next: Next<'_>) -> PipelineResult<()> {
        let info = self.logger.is_enabled(LogLevel::Info);
        if info {
            self.logger.log(
                LogLevel::Info,
                &format!(
                    "Request: {} {}",
                    context.method(),
                    redact_url(context.url().as_str())
                ),
            );
        }

        let started = Instant::now();
        let result = next.run(context).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(()) => {
                if let Some(status) = context.status() {
                    if info {
                        self.logger
                            .log(LogLevel::Info, &format!("Response: {}", status));
                    }
                    if self.is_reported_failure(status) {
                        self.logger.error(&format!(
                            "Request failed: {} {} returned {}",
                            context.method(),
                            redact_url(context.url().as_str()),
                            status
                        ));
                    }
                }
            }
            Err(error) if error.is_cancelled() => {
                self.logger.warn(&format!(
                    "Request cancelled: {} {}",
                    context.method(),
                    redact_url(context.url().as_str())
                ));
            }
            Err(error) => {
                self.logger.error(&format!(
                    "Request failed: {} {}: {}",
                    context.method(),
                    redact_url(context.url().as_str()),
                    error
                ));
            }
        }

        if elapsed > self.slow_request_threshold {
            self.logger.warn(&format!(
                "Slow request: {} {} took {} ms",
                context.method(),
                redact_url(context.url().as_str()),
                elapsed.as_millis()
            ));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::errors::PipelineError;
    use crate::mocks::CapturingLogger;
    use crate::transport::{MockTransport, Transport};
    use crate::wire::Url;
    use http::Method;
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    async fn run(
        policy: LoggingPolicy,
        transport: &MockTransport,
        url: &str,
        token: CancellationToken,
    ) -> PipelineResult<()> {
        let pool = BufferPool::default();
        let mut context = transport
            .create_context(&pool, Method::GET, Url::parse(url).unwrap(), token)
            .unwrap();
        let policies: Vec<Arc<dyn Policy>> = vec![Arc::new(policy)];
        Next::new(&policies, transport).run(&mut context).await
    }

    #[tokio::test]
    async fn test_request_and_response_are_logged() {
        let logger = Arc::new(CapturingLogger::new(LogLevel::Info));
        let transport = MockTransport::with_statuses([200]).unwrap();
        run(
            LoggingPolicy::new(logger.clone()),
            &transport,
            "http://contoso.a.io/",
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            logger.messages(),
            vec!["Request: GET http://contoso.a.io/", "Response: 200"]
        );
    }

    #[tokio::test]
    async fn test_failure_status_adds_error_entry() {
        let logger = Arc::new(CapturingLogger::new(LogLevel::Info));
        let transport = MockTransport::with_statuses([503]).unwrap();
        run(
            LoggingPolicy::new(logger.clone()),
            &transport,
            "http://contoso.a.io/",
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let errors = logger.messages_at(LogLevel::Error);
        assert_eq!(errors, vec!["Request failed: GET http://contoso.a.io/ returned 503"]);
    }

    #[tokio::test]
    async fn test_excluded_status_is_not_an_error() {
        let logger = Arc::new(CapturingLogger::new(LogLevel::Info));
        let transport = MockTransport::with_statuses([404]).unwrap();
        run(
            LoggingPolicy::new(logger.clone()).exclude_statuses([404]),
            &transport,
            "http://contoso.a.io/",
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(logger.messages_at(LogLevel::Error).is_empty());
    }

    #[tokio::test]
    async fn test_nothing_is_logged_below_level() {
        let logger = Arc::new(CapturingLogger::new(LogLevel::Error));
        let transport = MockTransport::with_statuses([200]).unwrap();
        run(
            LoggingPolicy::new(logger.clone()),
            &transport,
            "http://contoso.a.io/",
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(logger.entries().is_empty());
    }

    #[tokio::test]
    async fn test_credentials_are_redacted() {
        let logger = Arc::new(CapturingLogger::new(LogLevel::Info));
        let transport = MockTransport::with_statuses([200]).unwrap();
        run(
            LoggingPolicy::new(logger.clone()),
            &transport,
            "https://acct.file.io/share/f?sv=1&sig=s3cret",
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let messages = logger.messages();
        assert_eq!(messages[0], "Request: GET https://acct.file.io/share/f?sv=1&sig=REDACTED");
    }

    #[tokio::test]
    async fn test_slow_request_warning() {
        let logger = Arc::new(CapturingLogger::new(LogLevel::Info));
        let transport = MockTransport::with_statuses([200])
            .unwrap()
            .with_delay(Duration::from_millis(20));
        run(
            LoggingPolicy::new(logger.clone()).slow_request_threshold(Duration::from_millis(1)),
            &transport,
            "http://contoso.a.io/",
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let warnings = logger.messages_at(LogLevel::Warn);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Slow request: GET http://contoso.a.io/ took "));
    }

    #[tokio::test]
    async fn test_errors_are_propagated() {
        let logger = Arc::new(CapturingLogger::new(LogLevel::Info));
        let transport = MockTransport::with_statuses([200]).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = run(
            LoggingPolicy::new(logger.clone()),
            &transport,
            "http://contoso.a.io/",
            token,
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(logger.messages_at(LogLevel::Warn).len(), 1);
    }
}

//! Status-driven retry with exponential backoff.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{Next, Policy};
use crate::context::CallContext;
use crate::errors::{PipelineError, PipelineResult};
use crate::transport::cancellable;
use crate::wire::names;

/// Predicate over a response status code.
pub type StatusPredicate = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// Retry settings.
///
/// A policy holds default settings; inserting a `RetrySettings` into
/// [`CallContext::options_mut`] overrides them for one call.
#[derive(Clone)]
pub struct RetrySettings {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for computed delays.
    pub max_delay: Duration,
    /// Delay multiplier for exponential backoff.
    pub multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
    /// Whether an integer-seconds `Retry-After` header replaces the computed delay.
    pub honor_retry_after: bool,
    /// Whether retryable transport errors (connection, timeout) are retried.
    /// Cancellation is never retried.
    pub retry_on_transport_errors: bool,
    is_success: StatusPredicate,
    should_retry: StatusPredicate,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
            honor_retry_after: true,
            retry_on_transport_errors: false,
            is_success: Arc::new(|status| (200..400).contains(&status)),
            should_retry: Arc::new(|status| matches!(status, 408 | 429 | 500 | 502 | 503 | 504)),
        }
    }
}

impl RetrySettings {
    /// Creates default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the predicate deciding that a status ends the call successfully.
    pub fn success_when(mut self, predicate: impl Fn(u16) -> bool + Send + Sync + 'static) -> Self {
        self.is_success = Arc::new(predicate);
        self
    }

    /// Sets the predicate deciding that a failed status is worth retrying.
    pub fn retry_when(mut self, predicate: impl Fn(u16) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Sets the initial delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets whether to use jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Retries immediately, ignoring `Retry-After`.
    pub fn no_delay(mut self) -> Self {
        self.initial_delay = Duration::ZERO;
        self.max_delay = Duration::ZERO;
        self.jitter = false;
        self.honor_retry_after = false;
        self
    }

    /// Sets whether retryable transport errors are retried.
    pub fn retry_on_transport_errors(mut self, enabled: bool) -> Self {
        self.retry_on_transport_errors = enabled;
        self
    }

    /// Sets whether `Retry-After` is honoured.
    pub fn honor_retry_after(mut self, enabled: bool) -> Self {
        self.honor_retry_after = enabled;
        self
    }

    /// Creates settings that never retry.
    pub fn no_retries() -> Self {
        Self::default().max_retries(0)
    }

    /// Returns true if `status` completes the call.
    pub fn is_success(&self, status: u16) -> bool {
        (self.is_success)(status)
    }

    /// Returns true if a call that ended with `status` should be retried.
    pub fn should_retry(&self, status: u16) -> bool {
        (self.should_retry)(status)
    }

    /// Returns the delay before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(retry_after) = retry_after.filter(|_| self.honor_retry_after) {
            return retry_after;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let max_ms = self.max_delay.as_millis() as f64;
        let delay_ms =
            (self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent)).min(max_ms);

        // 0-25% random variation, still bounded by the maximum.
        let delay_ms = if self.jitter {
            (delay_ms * (1.0 + rand::random::<f64>() * 0.25)).min(max_ms)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

impl fmt::Debug for RetrySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySettings")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("honor_retry_after", &self.honor_retry_after)
            .field("retry_on_transport_errors", &self.retry_on_transport_errors)
            .finish_non_exhaustive()
    }
}

/// Re-runs the rest of the chain until the status is a success or the
/// retries are exhausted. Exhaustion surfaces the last response as is.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    /// Creates a policy with default `settings`.
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    /// Returns the default settings.
    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }
}

fn retry_after(context: &CallContext) -> Option<Duration> {
    let value = context.response_header(names::RETRY_AFTER)?;
    let seconds: u64 = std::str::from_utf8(value).ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(seconds))
}

#[async_trait]
impl Policy for RetryPolicy {
    async fn process(&self, context: &mut CallContext, next: Next<'_>) -> PipelineResult<()> {
        let settings = context
            .options()
            .get::<RetrySettings>()
            .cloned()
            .unwrap_or_else(|| self.settings.clone());
        // Every attempt starts from the headers present before the first one.
        let mark = context.request_header_mark();
        let mut retries = 0u32;

        loop {
            context.rewind_request_headers(mark);
            let outcome = next.run(context).await;
            let exhausted = retries >= settings.max_retries;

            let hint = match outcome {
                Ok(()) => {
                    let Some(status) = context.status() else {
                        return Ok(());
                    };
                    if settings.is_success(status) || !settings.should_retry(status) || exhausted {
                        return Ok(());
                    }
                    tracing::info!(status, attempt = retries + 1, "Retrying request");
                    retry_after(context)
                }
                Err(error) => {
                    if error.is_cancelled()
                        || !settings.retry_on_transport_errors
                        || !error.is_retryable()
                        || exhausted
                    {
                        return Err(error);
                    }
                    tracing::info!(error = %error, attempt = retries + 1, "Retrying request");
                    None
                }
            };

            let delay = settings.delay_for(retries, hint);
            retries += 1;

            if delay.is_zero() {
                if context.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
            } else {
                cancellable(context.cancellation(), async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            }
        }
    }
}

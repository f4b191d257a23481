//! Logging and tracing setup.

mod logging;

pub use self::logging::{ConsoleLogger, LogLevel, Logger, NoopLogger, TracingLogger};

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::{PipelineError, PipelineResult};

static CREDENTIAL_PARAMS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)([?&](?:sig|signature|key|token|secret|code)=)[^&#]*").ok()
});

/// Replaces the values of credential-like query parameters in `url`.
pub fn redact_url(url: &str) -> Cow<'_, str> {
    match CREDENTIAL_PARAMS.as_ref() {
        Some(pattern) => pattern.replace_all(url, "${1}REDACTED"),
        None => Cow::Borrowed(url),
    }
}

/// Installs a global `tracing` subscriber.
///
/// `filter` uses `EnvFilter` syntax (e.g. `"cloud_pipeline=debug"`). Fails if
/// the filter is invalid or a subscriber is already installed.
pub fn init_tracing(filter: &str, json: bool) -> PipelineResult<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| PipelineError::configuration(format!("invalid tracing filter: {}", e)))?;

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };
    result.map_err(|e| PipelineError::configuration(format!("cannot install subscriber: {}", e)))
}

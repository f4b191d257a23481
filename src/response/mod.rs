//! Typed responses.
//!
//! A [`Response`] owns the processed [`CallContext`] and a parser that turns
//! it into a value. The parser runs on first access and its result is cached.
//! Dropping the response releases every pooled buffer of the call.

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use std::fmt;

use crate::context::CallContext;
use crate::errors::{PipelineError, PipelineResult};
use crate::wire::HeaderLines;

type Parser<T> = Box<dyn Fn(&CallContext) -> PipelineResult<T> + Send + Sync>;

/// A processed call plus its lazily parsed value.
pub struct Response<T> {
    context: CallContext,
    parser: Parser<T>,
    value: OnceCell<PipelineResult<T>>,
}

impl<T> Response<T> {
    /// Wraps a processed context.
    pub fn new<F>(context: CallContext, parser: F) -> Self
    where
        F: Fn(&CallContext) -> PipelineResult<T> + Send + Sync + 'static,
    {
        Self {
            context,
            parser: Box::new(parser),
            value: OnceCell::new(),
        }
    }

    /// Returns the status code, or 0 if no response was received.
    pub fn status(&self) -> u16 {
        self.context.status().unwrap_or(0)
    }

    /// Returns the first value of header `name`.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.context.response_header(name)
    }

    /// Returns the first value of header `name` as text.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Iterates over the response headers.
    pub fn headers(&self) -> HeaderLines<'_> {
        self.context.response_headers()
    }

    /// Returns the raw response content.
    pub fn content(&self) -> &[u8] {
        self.context.response_content()
    }

    /// Returns the underlying context.
    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// Parses the response on first call and returns the cached outcome.
    pub fn result(&self) -> Result<&T, &PipelineError> {
        self.value
            .get_or_init(|| (self.parser)(&self.context))
            .as_ref()
    }

    /// Returns the parsed value, if parsing succeeded.
    pub fn value(&self) -> Option<&T> {
        self.result().ok()
    }

    /// Consumes the response, returning the parsed value and releasing the
    /// call's buffers.
    pub fn into_result(self) -> PipelineResult<T> {
        let Self {
            context,
            parser,
            value,
        } = self;
        match value.into_inner() {
            Some(result) => result,
            None => parser(&context),
        }
    }

    /// Consumes the response, returning the context.
    pub fn into_context(self) -> CallContext {
        self.context
    }

    /// Fails with [`PipelineError::RequestFailed`] unless the status is one
    /// of `accepted`.
    pub fn ensure_status(self, accepted: &[u16]) -> PipelineResult<Self> {
        let status = self.status();
        if accepted.contains(&status) {
            return Ok(self);
        }

        let headers = self
            .headers()
            .map(|(name, value)| {
                (
                    String::from_utf8_lossy(name).into_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                )
            })
            .collect();
        let content = self.content();
        let body = (!content.is_empty()).then(|| String::from_utf8_lossy(content).into_owned());

        Err(PipelineError::RequestFailed {
            status,
            headers,
            body,
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status())
            .field("value", &self.value.get())
            .finish_non_exhaustive()
    }
}

/// Parser deserializing the response content as JSON.
pub fn json<T: DeserializeOwned>(context: &CallContext) -> PipelineResult<T> {
    Ok(serde_json::from_slice(context.response_content())?)
}

/// Parser returning the response content as UTF-8 text.
pub fn text(context: &CallContext) -> PipelineResult<String> {
    String::from_utf8(context.response_content().to_vec())
        .map_err(|e| PipelineError::encoding(format!("response is not UTF-8: {}", e)))
}

/// Parser that ignores the content.
pub fn empty(_context: &CallContext) -> PipelineResult<()> {
    Ok(())
}

//! Deterministic transport for exercising policy chains without network I/O.

use async_trait::async_trait;
use bytes::{BufMut, Bytes};
use http::Method;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{cancellable, Transport, TransportId};
use crate::buffer::BufferPool;
use crate::context::{CallContext, ResponseData, TransportState};
use crate::errors::{PipelineError, PipelineResult};
use crate::wire::{parse_response_head, ParseStatus, Url};

/// One canned response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// A response with only a status code.
    Status(u16),
    /// A complete raw HTTP/1.1 response, parsed like a network response.
    Raw(Bytes),
}

impl MockResponse {
    /// Creates a status-only response.
    pub fn status(status: u16) -> Self {
        Self::Status(status)
    }

    /// Creates a response from raw HTTP/1.1 bytes.
    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Self::Raw(bytes.into())
    }

    /// Creates a JSON response with the given status.
    pub fn json<T: Serialize>(status: u16, value: &T) -> PipelineResult<Self> {
        let body = serde_json::to_vec(value)?;
        let mut raw = format!(
            "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            status,
            body.len()
        )
        .into_bytes();
        raw.extend_from_slice(&body);
        Ok(Self::Raw(raw.into()))
    }
}

impl From<u16> for MockResponse {
    fn from(status: u16) -> Self {
        Self::Status(status)
    }
}

/// A request observed by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Request URL.
    pub url: String,
    /// Request headers in order.
    pub headers: Vec<(String, String)>,
    /// Request content.
    pub content: Option<Bytes>,
}

impl RecordedRequest {
    /// Returns the first value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport answering from a fixed sequence of responses, cycling back to
/// the first once the sequence is exhausted.
#[derive(Debug)]
pub struct MockTransport {
    id: TransportId,
    responses: Vec<MockResponse>,
    next: AtomicUsize,
    delay: Option<Duration>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    /// Creates a transport cycling through `responses`.
    pub fn new<I>(responses: I) -> PipelineResult<Self>
    where
        I: IntoIterator,
        I::Item: Into<MockResponse>,
    {
        let responses: Vec<MockResponse> = responses.into_iter().map(Into::into).collect();
        if responses.is_empty() {
            return Err(PipelineError::argument(
                "mock transport needs at least one response",
            ));
        }

        Ok(Self {
            id: TransportId::new(),
            responses,
            next: AtomicUsize::new(0),
            delay: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Creates a transport cycling through status-only responses.
    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> PipelineResult<Self> {
        Self::new(statuses)
    }

    /// Waits `delay` before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the id stamped on contexts created by this transport.
    pub fn id(&self) -> TransportId {
        self.id
    }

    /// Returns how many requests have been processed.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the recorded requests.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Returns the most recent request.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().last().cloned()
    }

    /// Forgets recorded requests and restarts the sequence.
    pub fn reset(&self) {
        self.requests.lock().clear();
        self.next.store(0, Ordering::SeqCst);
    }

    fn record(&self, context: &CallContext) {
        let headers = context
            .request_headers()
            .map(|(name, value)| {
                (
                    String::from_utf8_lossy(name).into_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                )
            })
            .collect();

        self.requests.lock().push(RecordedRequest {
            method: context.method().clone(),
            url: context.url().to_string(),
            headers,
            content: context.content().cloned(),
        });
    }
}

fn raw_response(context: &CallContext, raw: &[u8]) -> PipelineResult<ResponseData> {
    let head = match parse_response_head(raw)? {
        ParseStatus::Done(head) => head,
        ParseStatus::NeedMoreData => {
            return Err(PipelineError::protocol("incomplete mock response head"))
        }
    };

    let available = raw.len() - head.content_start;
    let length = head.content_length.unwrap_or(available).min(available);

    let mut buffer = context.rent_buffer();
    buffer.put_slice(raw);
    Ok(ResponseData::new(
        head.status,
        buffer,
        head.headers,
        head.content_start..head.content_start + length,
    ))
}

#[async_trait]
impl Transport for MockTransport {
    fn create_context(
        &self,
        pool: &BufferPool,
        method: Method,
        url: Url,
        cancellation: CancellationToken,
    ) -> PipelineResult<CallContext> {
        Ok(CallContext::new(
            self.id,
            TransportState::Mock,
            method,
            url,
            pool,
            cancellation,
        ))
    }

    async fn process(&self, context: &mut CallContext) -> PipelineResult<()> {
        self.id.check(context)?;
        if context.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.record(context);

        if let Some(delay) = self.delay {
            cancellable(context.cancellation(), async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
        }

        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.responses.len();
        let response = match &self.responses[index] {
            MockResponse::Status(status) => ResponseData::status_only(*status, context.rent_buffer()),
            MockResponse::Raw(raw) => raw_response(context, raw)?,
        };
        context.set_response(response);
        Ok(())
    }
}

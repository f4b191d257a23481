//! Per-request call state.
//!
//! A [`CallContext`] is created by a transport, filled in by the caller,
//! threaded through the policy chain, and populated with the response by the
//! transport. Dropping it returns every pooled buffer it holds.

use bytes::{BufMut, Bytes, BytesMut};
use http::{Extensions, Method};
use std::fmt;
use std::ops::Range;
use tokio_util::sync::CancellationToken;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::errors::PipelineResult;
use crate::transport::TransportId;
use crate::wire::{names, Header, HeaderLines, Url};

/// Transport-specific state carried by a context.
#[derive(Debug)]
pub(crate) enum TransportState {
    /// Request template built by the HTTP client transport.
    Http(crate::transport::HttpTemplate),
    /// Raw socket transport; all state lives in the request buffer.
    Socket,
    /// Mock transport.
    Mock,
    /// A transport implemented outside this crate.
    Custom,
}

/// Mutable state of one request/response exchange.
pub struct CallContext {
    transport: TransportId,
    state: TransportState,
    method: Method,
    url: Url,
    request_headers: PooledBuffer,
    content: Option<Bytes>,
    response: Option<ResponseData>,
    options: Extensions,
    cancellation: CancellationToken,
    pool: BufferPool,
}

impl CallContext {
    pub(crate) fn new(
        transport: TransportId,
        state: TransportState,
        method: Method,
        url: Url,
        pool: &BufferPool,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            transport,
            state,
            method,
            url,
            request_headers: pool.rent(),
            content: None,
            response: None,
            options: Extensions::new(),
            cancellation,
            pool: pool.clone(),
        }
    }

    /// Creates a context for a transport implemented outside this crate.
    ///
    /// The transport passes its own id so it can recognize its contexts.
    pub fn for_transport(
        transport: TransportId,
        method: Method,
        url: Url,
        pool: &BufferPool,
        cancellation: CancellationToken,
    ) -> Self {
        Self::new(transport, TransportState::Custom, method, url, pool, cancellation)
    }

    /// Returns the id of the transport that created this context.
    pub fn transport_id(&self) -> TransportId {
        self.transport
    }

    pub(crate) fn state(&self) -> &TransportState {
        &self.state
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Appends a header to the outgoing request.
    pub fn add_header(&mut self, header: &Header) {
        header.write_to(&mut self.request_headers);
    }

    /// Encodes and appends a header to the outgoing request.
    pub fn add_header_str(&mut self, name: &str, value: &str) -> PipelineResult<()> {
        let header = Header::new(name, value)?;
        self.add_header(&header);
        Ok(())
    }

    /// Returns a mark for the headers added so far. Passing it to
    /// [`rewind_request_headers`](Self::rewind_request_headers) drops every
    /// header added after it.
    pub fn request_header_mark(&self) -> usize {
        self.request_headers.len()
    }

    /// Drops the headers added after `mark`.
    pub fn rewind_request_headers(&mut self, mark: usize) {
        self.request_headers.truncate(mark);
    }

    /// Returns the request header block (`Name: Value\r\n` lines).
    pub fn request_header_bytes(&self) -> &[u8] {
        &self.request_headers
    }

    /// Iterates over the request headers.
    pub fn request_headers(&self) -> HeaderLines<'_> {
        HeaderLines::new(&self.request_headers)
    }

    /// Sets the request content.
    pub fn set_content(&mut self, content: impl Into<Bytes>) {
        self.content = Some(content.into());
    }

    /// Returns the request content.
    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    /// Per-call options read by policies, keyed by type.
    ///
    /// Inserting a [`RetrySettings`](crate::policies::RetrySettings) here
    /// overrides the retry policy's defaults for this call only.
    pub fn options(&self) -> &Extensions {
        &self.options
    }

    /// Mutable access to the per-call options.
    pub fn options_mut(&mut self) -> &mut Extensions {
        &mut self.options
    }

    /// Returns the cancellation token of this call.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true if the call has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns the response status, once the transport has processed the call.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(ResponseData::status)
    }

    /// Returns the response, once the transport has processed the call.
    pub fn response(&self) -> Option<&ResponseData> {
        self.response.as_ref()
    }

    /// Iterates over the response headers; empty before processing.
    pub fn response_headers(&self) -> HeaderLines<'_> {
        match &self.response {
            Some(response) => response.headers(),
            None => HeaderLines::new(&[]),
        }
    }

    /// Returns the first response header value named `name`.
    pub fn response_header(&self, name: &str) -> Option<&[u8]> {
        self.response_headers().get(name)
    }

    /// Returns the response content; empty before processing.
    pub fn response_content(&self) -> &[u8] {
        match &self.response {
            Some(response) => response.content(),
            None => &[],
        }
    }

    /// Rents a buffer from the pool that owns this context's buffers.
    pub fn rent_buffer(&self) -> PooledBuffer {
        self.pool.rent()
    }

    /// Stores the response, releasing the buffer of any earlier attempt.
    pub fn set_response(&mut self, response: ResponseData) {
        self.response = Some(response);
    }

    /// Serializes the HTTP/1.1 request: request line, `Host`, caller headers,
    /// `Content-Length` when needed, and the blank line. Content is not included.
    pub(crate) fn encode_request_head(&self, out: &mut BytesMut) {
        out.put_slice(self.method.as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.url.path());
        out.put_slice(b" HTTP/1.1\r\n");

        let headers = self.request_headers();
        if !headers.clone().contains(names::HOST) {
            out.put_slice(names::HOST.as_bytes());
            out.put_slice(b": ");
            out.put_slice(self.url.host());
            out.put_slice(b"\r\n");
        }
        out.put_slice(&self.request_headers);

        let content_len = self.content.as_ref().map_or(0, Bytes::len);
        let needs_length = content_len > 0
            || self.method == Method::POST
            || self.method == Method::PUT
            || self.method == Method::PATCH;
        if needs_length && !headers.contains(names::CONTENT_LENGTH) {
            Header::content_length(content_len).write_to(out);
        }
        out.put_slice(b"\r\n");
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("transport", &self.transport)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("status", &self.status())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A received response: status plus header and content ranges over one pooled buffer.
pub struct ResponseData {
    status: u16,
    buffer: PooledBuffer,
    headers: Range<usize>,
    content: Range<usize>,
}

impl ResponseData {
    /// Wraps a response buffer. Out-of-bounds ranges are clamped to the buffer.
    pub fn new(status: u16, buffer: PooledBuffer, headers: Range<usize>, content: Range<usize>) -> Self {
        let len = buffer.len();
        let clamp = |r: Range<usize>| r.start.min(len)..r.end.min(len).max(r.start.min(len));
        Self {
            status,
            headers: clamp(headers),
            content: clamp(content),
            buffer,
        }
    }

    /// Creates a response with a status and no headers or content.
    pub fn status_only(status: u16, buffer: PooledBuffer) -> Self {
        Self::new(status, buffer, 0..0, 0..0)
    }

    /// Returns the status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Iterates over the response headers.
    pub fn headers(&self) -> HeaderLines<'_> {
        HeaderLines::new(&self.buffer[self.headers.clone()])
    }

    /// Returns the raw header block.
    pub fn header_bytes(&self) -> &[u8] {
        &self.buffer[self.headers.clone()]
    }

    /// Returns the first value of header `name`.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers().get(name)
    }

    /// Returns the response content.
    pub fn content(&self) -> &[u8] {
        &self.buffer[self.content.clone()]
    }
}

impl fmt::Debug for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseData")
            .field("status", &self.status)
            .field("header_bytes", &self.headers.len())
            .field("content_bytes", &self.content.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::CONTENT_TYPE_JSON;

    fn context(method: Method, url: &str, pool: &BufferPool) -> CallContext {
        CallContext::new(
            TransportId::from_raw(7),
            TransportState::Mock,
            method,
            Url::parse(url).unwrap(),
            pool,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_request_head_encoding() {
        let pool = BufferPool::default();
        let mut ctx = context(Method::GET, "https://contoso.a.io/kv/color?label=x", &pool);
        ctx.add_header(&CONTENT_TYPE_JSON);

        let mut out = BytesMut::new();
        ctx.encode_request_head(&mut out);
        assert_eq!(
            &out[..],
            b"GET /kv/color?label=x HTTP/1.1\r\nHost: contoso.a.io\r\nContent-Type: application/json\r\n\r\n"
        );
    }

    #[test]
    fn test_request_head_adds_content_length() {
        let pool = BufferPool::default();
        let mut ctx = context(Method::PUT, "http://localhost:8080/secrets/a", &pool);
        ctx.set_content(&b"{\"value\":\"v\"}"[..]);

        let mut out = BytesMut::new();
        ctx.encode_request_head(&mut out);
        let text = String::from_utf8(out.to_vec()).unwrap();
        assert!(text.starts_with("PUT /secrets/a HTTP/1.1\r\nHost: localhost:8080\r\n"));
        assert!(text.ends_with("Content-Length: 13\r\n\r\n"));
    }

    #[test]
    fn test_caller_supplied_framing_headers_win() {
        let pool = BufferPool::default();
        let mut ctx = context(Method::POST, "http://localhost/", &pool);
        ctx.add_header_str("Host", "override.example").unwrap();
        ctx.add_header(&crate::wire::CONTENT_LENGTH_ZERO);

        let mut out = BytesMut::new();
        ctx.encode_request_head(&mut out);
        let text = String::from_utf8(out.to_vec()).unwrap();
        assert_eq!(text.matches("Host:").count(), 1);
        assert_eq!(text.matches("Content-Length:").count(), 1);
        assert!(text.contains("Host: override.example"));
    }

    #[test]
    fn test_response_accessors() {
        let pool = BufferPool::default();
        let mut ctx = context(Method::GET, "http://localhost/", &pool);
        assert_eq!(ctx.status(), None);
        assert!(ctx.response_content().is_empty());

        let mut buf = ctx.rent_buffer();
        buf.put_slice(b"ETag: \"1\"\r\nhello");
        ctx.set_response(ResponseData::new(200, buf, 0..11, 11..16));

        assert_eq!(ctx.status(), Some(200));
        assert_eq!(ctx.response_header("etag"), Some(&b"\"1\""[..]));
        assert_eq!(ctx.response_content(), b"hello");
    }

    #[test]
    fn test_drop_releases_buffers() {
        let pool = BufferPool::default();
        let mut ctx = context(Method::GET, "http://localhost/", &pool);
        let buf = ctx.rent_buffer();
        ctx.set_response(ResponseData::status_only(500, buf));
        assert_eq!(pool.rented(), 2);

        let buf = ctx.rent_buffer();
        ctx.set_response(ResponseData::status_only(200, buf));
        assert_eq!(pool.rented(), 2);

        drop(ctx);
        assert_eq!(pool.rented(), 0);
    }

    #[test]
    fn test_ranges_are_clamped() {
        let pool = BufferPool::default();
        let mut buf = pool.rent();
        buf.put_slice(b"abc");
        let response = ResponseData::new(200, buf, 0..0, 1..10);
        assert_eq!(response.content(), b"bc");
    }
}

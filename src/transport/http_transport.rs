//! Transport over a shared, pooled `reqwest` client.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use http::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Client, ClientBuilder};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{cancellable, Transport, TransportId};
use crate::buffer::BufferPool;
use crate::context::{CallContext, ResponseData, TransportState};
use crate::errors::{PipelineError, PipelineResult};
use crate::wire::{Protocol, Url};

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Whole-request timeout; `None` leaves timing to the call's cancellation token.
    pub timeout: Option<Duration>,
    /// Idle connections kept per host by the client.
    pub pool_max_idle_per_host: usize,
    /// TCP keepalive interval.
    pub tcp_keepalive: Option<Duration>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            pool_max_idle_per_host: 10,
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

/// Request template built once per context; each attempt builds a fresh
/// request from it, since a sent request cannot be reused.
#[derive(Debug)]
pub(crate) struct HttpTemplate {
    url: url::Url,
}

/// Transport that delegates I/O to a `reqwest` client.
pub struct HttpTransport {
    id: TransportId,
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with its own client.
    pub fn new(config: HttpTransportConfig) -> PipelineResult<Self> {
        let mut builder = ClientBuilder::new()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_keepalive(config.tcp_keepalive);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| PipelineError::configuration(e.to_string()))?;

        Ok(Self::with_client(client))
    }

    /// Creates a transport sharing an existing client.
    pub fn with_client(client: Client) -> Self {
        Self {
            id: TransportId::new(),
            client,
        }
    }

    /// Returns the id stamped on contexts created by this transport.
    pub fn id(&self) -> TransportId {
        self.id
    }

    fn build_request(
        context: &CallContext,
        template: &HttpTemplate,
    ) -> PipelineResult<reqwest::Request> {
        let mut request = reqwest::Request::new(context.method().clone(), template.url.clone());

        let headers = request.headers_mut();
        for (name, value) in context.request_headers() {
            let name = HeaderName::from_bytes(name)
                .map_err(|e| PipelineError::encoding(format!("invalid header name: {}", e)))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|e| PipelineError::encoding(format!("invalid header value: {}", e)))?;
            headers.append(name, value);
        }

        if let Some(content) = context.content() {
            *request.body_mut() = Some(Body::from(content.clone()));
        }

        Ok(request)
    }
}

/// Writes response headers as `Name: Value\r\n` lines, joining repeated
/// headers into one comma-separated value.
pub(crate) fn write_joined_headers(headers: &HeaderMap, out: &mut BytesMut) {
    for name in headers.keys() {
        out.put_slice(name.as_str().as_bytes());
        out.put_slice(b": ");
        for (i, value) in headers.get_all(name).iter().enumerate() {
            if i > 0 {
                out.put_u8(b',');
            }
            out.put_slice(value.as_bytes());
        }
        out.put_slice(b"\r\n");
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn create_context(
        &self,
        pool: &BufferPool,
        method: Method,
        url: Url,
        cancellation: CancellationToken,
    ) -> PipelineResult<CallContext> {
        if url.protocol() == Protocol::Other {
            return Err(PipelineError::invalid_url(
                url.as_str(),
                "only http and https are supported",
            ));
        }
        let parsed = url::Url::parse(url.as_str())
            .map_err(|e| PipelineError::invalid_url(url.as_str(), e.to_string()))?;

        Ok(CallContext::new(
            self.id,
            TransportState::Http(HttpTemplate { url: parsed }),
            method,
            url,
            pool,
            cancellation,
        ))
    }

    #[instrument(skip(self, context), fields(method = %context.method(), url = %context.url()))]
    async fn process(&self, context: &mut CallContext) -> PipelineResult<()> {
        self.id.check(context)?;
        let request = match context.state() {
            TransportState::Http(template) => Self::build_request(context, template)?,
            _ => {
                return Err(PipelineError::configuration(
                    "context was not prepared for the HTTP transport",
                ))
            }
        };

        let token = context.cancellation().clone();
        let response = cancellable(&token, async {
            self.client.execute(request).await.map_err(PipelineError::from)
        })
        .await?;

        let status = response.status().as_u16();
        let mut buffer = context.rent_buffer();
        write_joined_headers(response.headers(), &mut buffer);
        let headers_end = buffer.len();

        let body = cancellable(&token, async {
            response.bytes().await.map_err(PipelineError::from)
        })
        .await?;
        buffer.put_slice(&body);
        let content_end = buffer.len();

        tracing::debug!(status, content_length = body.len(), "Received response");
        context.set_response(ResponseData::new(
            status,
            buffer,
            0..headers_end,
            headers_end..content_end,
        ));
        Ok(())
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").field("id", &self.id).finish()
    }
}

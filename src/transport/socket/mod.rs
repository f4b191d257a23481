//! HTTP/1.1 over pooled raw TCP or TLS connections.
//!
//! The request head is encoded straight into a pooled buffer. The response
//! is read into another pooled buffer and the head parser runs after every
//! read until it reports a complete head; the content is then read up to its
//! declared length so the connection can carry the next exchange.

mod connection;
mod pool;

pub use self::connection::ConnectionKey;
pub(crate) use self::connection::Connection;
pub use self::pool::ConnectionPool;

use async_trait::async_trait;
use bytes::BufMut;
use http::Method;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[cfg(feature = "rustls-tls")]
use std::sync::Arc;

use self::connection::ConnectSettings;
use super::{cancellable, Transport, TransportId};
use crate::buffer::BufferPool;
use crate::context::{CallContext, ResponseData, TransportState};
use crate::errors::{PipelineError, PipelineResult};
use crate::wire::{parse_response_head, ParseStatus, ResponseHead, Url};

const READ_CHUNK: usize = 4096;
/// Largest response content the transport will buffer.
const MAX_CONTENT_LENGTH: usize = 256 * 1024 * 1024;

/// Configuration for [`SocketTransport`].
#[derive(Debug, Clone)]
pub struct SocketTransportConfig {
    /// Maximum open connections per endpoint.
    pub max_connections_per_host: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Duration,
    /// Limit for establishing the TCP connection.
    pub connect_timeout: Option<Duration>,
    /// TLS client configuration, including certificate validation.
    /// Defaults to the `webpki-roots` trust store with hostname checks.
    #[cfg(feature = "rustls-tls")]
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl Default for SocketTransportConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 16,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Some(Duration::from_secs(30)),
            #[cfg(feature = "rustls-tls")]
            tls: None,
        }
    }
}

/// Transport writing HTTP/1.1 directly to pooled connections.
pub struct SocketTransport {
    id: TransportId,
    pool: ConnectionPool,
}

impl SocketTransport {
    /// Creates a transport with its own connection pool.
    pub fn new(config: SocketTransportConfig) -> PipelineResult<Self> {
        if config.max_connections_per_host == 0 {
            return Err(PipelineError::configuration(
                "max_connections_per_host must be at least 1",
            ));
        }

        let settings = ConnectSettings {
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
            #[cfg(feature = "rustls-tls")]
            tls: tokio_rustls::TlsConnector::from(config.tls.unwrap_or_else(default_tls_config)),
        };

        Ok(Self {
            id: TransportId::new(),
            pool: ConnectionPool::new(settings, config.max_connections_per_host),
        })
    }

    /// Returns the id stamped on contexts created by this transport.
    pub fn id(&self) -> TransportId {
        self.id
    }

    /// Returns the connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

#[cfg(feature = "rustls-tls")]
fn default_tls_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Runs one request/response exchange on `connection`.
async fn exchange(
    connection: &mut Connection,
    context: &CallContext,
    request: &[u8],
) -> PipelineResult<ResponseData> {
    connection.begin();
    connection.write_all(request).await?;

    let mut buffer = context.rent_buffer();
    let head = loop {
        buffer.reserve(READ_CHUNK);
        if connection.read_buf(&mut buffer).await? == 0 {
            return Err(PipelineError::ConnectionClosed);
        }
        if let ParseStatus::Done(head) = parse_response_head(&buffer)? {
            break head;
        }
    };

    let delimited = body_length(&head, context.method())?;
    let content_end = match delimited {
        Some(length) => {
            let end = head
                .content_start
                .checked_add(length)
                .ok_or_else(|| PipelineError::protocol("Content-Length too large"))?;
            while buffer.len() < end {
                let missing = end - buffer.len();
                buffer.reserve(missing.min(64 * READ_CHUNK));
                if connection.read_buf(&mut buffer).await? == 0 {
                    return Err(PipelineError::ConnectionClosed);
                }
            }
            end
        }
        None => {
            loop {
                buffer.reserve(READ_CHUNK);
                if connection.read_buf(&mut buffer).await? == 0 {
                    break;
                }
            }
            buffer.len()
        }
    };

    let trailing = buffer.len() - content_end;
    if trailing > 0 {
        tracing::debug!(trailing, "Unexpected bytes after response, closing connection");
    }
    connection.finish(head.keep_alive && delimited.is_some() && trailing == 0);

    Ok(ResponseData::new(
        head.status,
        buffer,
        head.headers,
        head.content_start..content_end,
    ))
}

/// Returns the content length, or `None` if the content runs until the
/// server closes the connection.
fn body_length(head: &ResponseHead, method: &Method) -> PipelineResult<Option<usize>> {
    if head.is_bodiless() || *method == Method::HEAD {
        return Ok(Some(0));
    }
    if head.chunked {
        return Err(PipelineError::protocol(
            "chunked transfer encoding is not supported",
        ));
    }
    match head.content_length {
        Some(length) if length > MAX_CONTENT_LENGTH => {
            Err(PipelineError::protocol("Content-Length too large"))
        }
        Some(length) => Ok(Some(length)),
        None if !head.keep_alive => Ok(None),
        None => Err(PipelineError::protocol("response has no Content-Length")),
    }
}

/// A reused connection that failed before any response byte arrived was
/// most likely closed by the server while idle.
fn is_stale(connection: &Connection, error: &PipelineError) -> bool {
    connection.is_reused()
        && connection.received() == 0
        && matches!(
            error,
            PipelineError::ConnectionClosed | PipelineError::Connection { .. }
        )
}

#[async_trait]
impl Transport for SocketTransport {
    fn create_context(
        &self,
        pool: &BufferPool,
        method: Method,
        url: Url,
        cancellation: CancellationToken,
    ) -> PipelineResult<CallContext> {
        ConnectionKey::for_url(&url)?;
        Ok(CallContext::new(
            self.id,
            TransportState::Socket,
            method,
            url,
            pool,
            cancellation,
        ))
    }

    #[instrument(skip(self, context), fields(method = %context.method(), url = %context.url()))]
    async fn process(&self, context: &mut CallContext) -> PipelineResult<()> {
        self.id.check(context)?;
        let key = ConnectionKey::for_url(context.url())?;

        let mut request = context.rent_buffer();
        context.encode_request_head(&mut request);
        if let Some(content) = context.content() {
            request.put_slice(content);
        }

        let token = context.cancellation().clone();
        let mut connection = cancellable(&token, self.pool.acquire(&key)).await?;
        let mut result = cancellable(&token, exchange(&mut connection, context, &request)).await;

        // Only the failed connection is dropped. Other idle connections to the
        // endpoint may be stale too; each one found is discarded in turn until
        // a fresh connection answers or fails for real.
        while let Err(error) = &result {
            if !is_stale(&connection, error) {
                break;
            }
            tracing::debug!(endpoint = %key, error = %error, "Reused connection failed, retrying on another one");
            ConnectionPool::discard(connection);
            connection = cancellable(&token, self.pool.acquire(&key)).await?;
            result = cancellable(&token, exchange(&mut connection, context, &request)).await;
        }

        match result {
            Ok(response) => {
                tracing::debug!(
                    status = response.status(),
                    reusable = connection.is_reusable(),
                    "Received response"
                );
                context.set_response(response);
                Ok(())
            }
            Err(error) => {
                ConnectionPool::discard(connection);
                Err(error)
            }
        }
    }
}

impl fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTransport")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .finish()
    }
}

//! A single keep-alive connection, plain TCP or TLS.

use bytes::BytesMut;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::errors::{PipelineError, PipelineResult};
use crate::wire::{Protocol, Url};

#[cfg(feature = "rustls-tls")]
use tokio_rustls::TlsConnector;

/// Identifies the endpoint a pooled connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    tls: bool,
    host: String,
    port: u16,
}

impl ConnectionKey {
    /// Derives the key for `url`.
    pub fn for_url(url: &Url) -> PipelineResult<Self> {
        let tls = match url.protocol() {
            Protocol::Http => false,
            Protocol::Https => true,
            Protocol::Other => {
                return Err(PipelineError::invalid_url(
                    url.as_str(),
                    "only http and https are supported",
                ))
            }
        };
        let port = url
            .port()
            .ok_or_else(|| PipelineError::invalid_url(url.as_str(), "invalid port"))?;

        // IPv6 literals keep their brackets in the URL but not in the socket address.
        let host = url.host_name();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        Ok(Self {
            tls,
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// Returns true for `https` endpoints.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Returns the host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Settings shared by every connection a pool opens.
#[derive(Clone)]
pub(crate) struct ConnectSettings {
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) idle_timeout: Duration,
    #[cfg(feature = "rustls-tls")]
    pub(crate) tls: TlsConnector,
}

impl fmt::Debug for ConnectSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectSettings")
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

enum ConnectionStream {
    Plain(TcpStream),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// An open connection plus the bookkeeping the pool needs to decide whether
/// it may be handed out again.
pub struct Connection {
    stream: ConnectionStream,
    key: ConnectionKey,
    reusable: bool,
    last_used: Instant,
    exchanges: usize,
    received: usize,
}

impl Connection {
    /// Connects to `key`, negotiating TLS for `https` endpoints.
    pub(crate) async fn open(key: &ConnectionKey, settings: &ConnectSettings) -> PipelineResult<Self> {
        let address = (key.host.as_str(), key.port);
        let stream = match settings.connect_timeout {
            Some(limit) => timeout(limit, TcpStream::connect(address))
                .await
                .map_err(|_| PipelineError::Timeout {
                    message: format!("connecting to {} timed out", key),
                })?,
            None => TcpStream::connect(address).await,
        }
        .map_err(|e| map_connect_error(e, key))?;
        stream.set_nodelay(true).ok();

        let stream = if key.tls {
            Self::negotiate_tls(stream, key, settings).await?
        } else {
            ConnectionStream::Plain(stream)
        };

        tracing::debug!(endpoint = %key, "Opened connection");
        Ok(Self {
            stream,
            key: key.clone(),
            reusable: true,
            last_used: Instant::now(),
            exchanges: 0,
            received: 0,
        })
    }

    #[cfg(feature = "rustls-tls")]
    async fn negotiate_tls(
        stream: TcpStream,
        key: &ConnectionKey,
        settings: &ConnectSettings,
    ) -> PipelineResult<ConnectionStream> {
        use rustls::pki_types::ServerName;

        let server_name = ServerName::try_from(key.host.clone())
            .map_err(|_| PipelineError::tls(format!("invalid server name: {}", key.host)))?;
        let tls = settings
            .tls
            .connect(server_name, stream)
            .await
            .map_err(|e| PipelineError::tls(format!("handshake with {} failed: {}", key, e)))?;

        Ok(ConnectionStream::Tls(Box::new(tls)))
    }

    #[cfg(not(feature = "rustls-tls"))]
    async fn negotiate_tls(
        _stream: TcpStream,
        key: &ConnectionKey,
        _settings: &ConnectSettings,
    ) -> PipelineResult<ConnectionStream> {
        Err(PipelineError::configuration(format!(
            "cannot connect to {}: TLS support is not enabled",
            key
        )))
    }

    /// Returns true if this connection carried an earlier exchange.
    pub fn is_reused(&self) -> bool {
        self.exchanges > 1
    }

    /// Returns the bytes received during the current exchange.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Returns true if the last exchange left the connection in a clean state.
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Returns how long the connection has been idle.
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Starts an exchange. The connection stays non-reusable until
    /// [`finish`](Self::finish) runs, so an interrupted exchange is never
    /// handed out again.
    pub(crate) fn begin(&mut self) {
        self.exchanges += 1;
        self.received = 0;
        self.reusable = false;
    }

    /// Completes an exchange.
    pub(crate) fn finish(&mut self, keep_alive: bool) {
        self.reusable = keep_alive;
        self.last_used = Instant::now();
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> PipelineResult<()> {
        match &mut self.stream {
            ConnectionStream::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            #[cfg(feature = "rustls-tls")]
            ConnectionStream::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Reads whatever is available into `buf`; `Ok(0)` means the peer closed.
    pub(crate) async fn read_buf(&mut self, buf: &mut BytesMut) -> PipelineResult<usize> {
        let read = match &mut self.stream {
            ConnectionStream::Plain(stream) => stream.read_buf(buf).await?,
            #[cfg(feature = "rustls-tls")]
            ConnectionStream::Tls(stream) => stream.read_buf(buf).await?,
        };
        self.received += read;
        Ok(read)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("reusable", &self.reusable)
            .field("exchanges", &self.exchanges)
            .finish_non_exhaustive()
    }
}

fn map_connect_error(error: std::io::Error, key: &ConnectionKey) -> PipelineError {
    match error.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            PipelineError::connection(format!("connection refused by {}", key))
        }
        std::io::ErrorKind::TimedOut => PipelineError::Timeout {
            message: format!("connecting to {} timed out", key),
        },
        _ => PipelineError::connection(format!("cannot connect to {}: {}", key, error)),
    }
}

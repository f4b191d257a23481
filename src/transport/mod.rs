//! Transports: the terminal stage of every pipeline.
//!
//! A transport creates the [`CallContext`]s it later processes and is the
//! only stage that performs network I/O. Three implementations are provided:
//! [`HttpTransport`] over a pooled `reqwest` client, [`SocketTransport`] over
//! raw TCP/TLS connections, and [`MockTransport`] for deterministic tests.

mod http_transport;
mod mock;
mod socket;

pub(crate) use self::http_transport::HttpTemplate;
pub use self::http_transport::{HttpTransport, HttpTransportConfig};
pub use self::mock::{MockResponse, MockTransport, RecordedRequest};
pub use self::socket::{ConnectionKey, ConnectionPool, SocketTransport, SocketTransportConfig};

use async_trait::async_trait;
use http::Method;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

use crate::buffer::BufferPool;
use crate::context::CallContext;
use crate::errors::{PipelineError, PipelineResult};
use crate::wire::Url;

/// Identity of a transport instance, stamped on every context it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    /// Allocates a process-unique id.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Fails with a mismatch error unless `context` was created by this id.
    pub fn check(self, context: &CallContext) -> PipelineResult<()> {
        if context.transport_id() == self {
            Ok(())
        } else {
            Err(PipelineError::TransportMismatch {
                expected: self,
                found: context.transport_id(),
            })
        }
    }
}

impl Default for TransportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The terminal stage of a pipeline.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Creates a context bound to this transport.
    fn create_context(
        &self,
        pool: &BufferPool,
        method: Method,
        url: Url,
        cancellation: CancellationToken,
    ) -> PipelineResult<CallContext>;

    /// Sends the request held by `context` and stores the response on it.
    ///
    /// Fails with [`PipelineError::TransportMismatch`] if `context` was
    /// created by another transport.
    async fn process(&self, context: &mut CallContext) -> PipelineResult<()>;
}

/// Races `future` against `token`, yielding [`PipelineError::Cancelled`] if
/// the token fires first.
pub(crate) async fn cancellable<F, T>(token: &CancellationToken, future: F) -> PipelineResult<T>
where
    F: Future<Output = PipelineResult<T>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(PipelineError::Cancelled),
        result = future => result,
    }
}

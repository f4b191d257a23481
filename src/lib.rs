//! Cloud Pipeline
//!
//! The request pipeline shared by the cloud service SDK clients (face
//! recognition, configuration store, key vault, file storage). A client
//! builds a [`Pipeline`] once and sends every call through it: the call's
//! [`CallContext`] passes through an ordered chain of policies (telemetry,
//! retry, logging, credentials) and ends at a transport that performs the
//! network I/O.
//!
//! # Features
//!
//! - **Pluggable transports**: a pooled `reqwest` client, a raw HTTP/1.1
//!   socket transport with keep-alive connection pooling and TLS, and a mock
//!   transport for deterministic tests
//! - **Policies**: `User-Agent` telemetry, status-driven retry with backoff,
//!   request/response logging, subscription-key credentials
//! - **Pooled buffers**: request headers and responses live in buffers rented
//!   from a [`BufferPool`] and returned when the call is dropped
//! - **Cancellation**: every call carries a `CancellationToken` honoured by
//!   every suspending operation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cloud_pipeline::{response, Pipeline};
//! use http::Method;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(serde::Deserialize)]
//! struct Setting {
//!     value: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::create("config-store", "1.0.0", None)?;
//!
//!     let mut context = pipeline.create_context(
//!         CancellationToken::new(),
//!         Method::GET,
//!         "https://contoso.azconfig.io/kv/color",
//!     )?;
//!     context.add_header(&cloud_pipeline::wire::ACCEPT_JSON);
//!
//!     let response = pipeline
//!         .send(context, response::json::<Setting>)
//!         .await?
//!         .ensure_status(&[200])?;
//!     println!("{}", response.into_result()?.value);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod context;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod policies;
pub mod response;
pub mod transport;
pub mod wire;

// Re-exports for convenience
pub use buffer::{BufferPool, BufferPoolConfig, BufferPoolStats, PooledBuffer};
pub use config::PipelineOptions;
pub use context::{CallContext, ResponseData};
pub use errors::{PipelineError, PipelineResult};
pub use observability::{ConsoleLogger, LogLevel, Logger, NoopLogger, TracingLogger};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use policies::{
    KeyCredentialPolicy, LoggingPolicy, Next, Policy, RetryPolicy, RetrySettings, TelemetryPolicy,
};
pub use response::Response;
pub use transport::{
    HttpTransport, HttpTransportConfig, MockResponse, MockTransport, SocketTransport,
    SocketTransportConfig, Transport, TransportId,
};
pub use wire::{Header, Protocol, Url};

/// Mock implementations for testing.
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

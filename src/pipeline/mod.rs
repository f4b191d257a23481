//! The pipeline: an ordered policy chain ending in a transport.
//!
//! The policy list and the transport are shared by every call and never
//! change while calls are in flight; per-call state lives in the
//! [`CallContext`]. Policies run strictly in order, one at a time, for a
//! given call.

use http::Method;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::buffer::BufferPool;
use crate::config::PipelineOptions;
use crate::context::CallContext;
use crate::errors::PipelineResult;
use crate::observability::{Logger, TracingLogger};
use crate::policies::{LoggingPolicy, Next, Policy, TelemetryPolicy};
use crate::response::Response;
use crate::transport::{HttpTransport, HttpTransportConfig, Transport};
use crate::wire::Url;

/// An ordered chain of policies ending in a transport.
#[derive(Clone)]
pub struct Pipeline {
    policies: Vec<Arc<dyn Policy>>,
    transport: Arc<dyn Transport>,
    pool: BufferPool,
    logger: Arc<dyn Logger>,
}

impl Pipeline {
    /// Creates the default chain `[Telemetry, Retry, Logging]` in front of
    /// `transport`, or of an [`HttpTransport`] if none is given.
    ///
    /// Telemetry runs first so logged requests carry the `User-Agent`; retry
    /// wraps logging so every attempt is logged.
    pub fn create(
        sdk_name: &str,
        sdk_version: &str,
        transport: Option<Arc<dyn Transport>>,
    ) -> PipelineResult<Self> {
        let options = PipelineOptions {
            transport,
            ..PipelineOptions::default()
        };
        Self::with_options(sdk_name, sdk_version, options)
    }

    /// Creates the default chain from `options`.
    pub fn with_options(
        sdk_name: &str,
        sdk_version: &str,
        options: PipelineOptions,
    ) -> PipelineResult<Self> {
        let transport: Arc<dyn Transport> = match options.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(HttpTransportConfig::default())?),
        };
        let logger: Arc<dyn Logger> = options
            .logger
            .unwrap_or_else(|| Arc::new(TracingLogger::default()));

        let mut telemetry =
            TelemetryPolicy::for_sdk(sdk_name, sdk_version, options.application_id.as_deref())?;
        if options.client_request_id {
            telemetry = telemetry.with_client_request_id();
        }

        let slow_request_threshold = options.slow_request_threshold;
        let logging = options.logging_policy.unwrap_or_else(|| {
            let policy = LoggingPolicy::new(Arc::clone(&logger));
            match slow_request_threshold {
                Some(threshold) => policy.slow_request_threshold(threshold),
                None => policy,
            }
        });
        let retry = options.retry_policy.unwrap_or_default();

        let mut builder = Self::builder(transport)
            .logger(logger)
            .policy(telemetry)
            .policy(retry)
            .policy(logging);
        if let Some(pool) = options.pool {
            builder = builder.pool(pool);
        }
        Ok(builder.build())
    }

    /// Starts an empty chain in front of `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> PipelineBuilder {
        PipelineBuilder {
            transport,
            policies: Vec::new(),
            pool: None,
            logger: None,
        }
    }

    /// Appends `policy` after the existing policies, still before the transport.
    pub fn add(&mut self, policy: impl Policy + 'static) {
        self.policies.push(Arc::new(policy));
    }

    /// Appends a shared policy.
    pub fn add_shared(&mut self, policy: Arc<dyn Policy>) {
        self.policies.push(policy);
    }

    /// Creates a context for a call to `url` through this pipeline's transport.
    pub fn create_context(
        &self,
        cancellation: CancellationToken,
        method: Method,
        url: &str,
    ) -> PipelineResult<CallContext> {
        let url = Url::parse(url)?;
        self.transport
            .create_context(&self.pool, method, url, cancellation)
    }

    /// Runs `context` through every policy in order, then the transport.
    #[instrument(skip_all, fields(method = %context.method(), policies = self.policies.len()))]
    pub async fn process(&self, context: &mut CallContext) -> PipelineResult<()> {
        Next::new(&self.policies, self.transport.as_ref())
            .run(context)
            .await
    }

    /// Processes `context` and wraps it in a [`Response`] parsed by `parser`.
    ///
    /// On failure the context is dropped, releasing its buffers.
    pub async fn send<T, F>(&self, mut context: CallContext, parser: F) -> PipelineResult<Response<T>>
    where
        F: Fn(&CallContext) -> PipelineResult<T> + Send + Sync + 'static,
    {
        self.process(&mut context).await?;
        Ok(Response::new(context, parser))
    }

    /// Returns the buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Returns the logger.
    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    /// Returns the policies, in execution order.
    pub fn policies(&self) -> &[Arc<dyn Policy>] {
        &self.policies
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("policies", &self.policies)
            .field("transport", &self.transport)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Builder for a pipeline with a custom chain.
#[derive(Debug)]
pub struct PipelineBuilder {
    transport: Arc<dyn Transport>,
    policies: Vec<Arc<dyn Policy>>,
    pool: Option<BufferPool>,
    logger: Option<Arc<dyn Logger>>,
}

impl PipelineBuilder {
    /// Appends a policy.
    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Appends a shared policy.
    pub fn shared_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(policy);
        self
    }

    /// Sets the buffer pool.
    pub fn pool(mut self, pool: BufferPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Sets the logger reported by [`Pipeline::logger`].
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Builds the pipeline.
    pub fn build(self) -> Pipeline {
        Pipeline {
            policies: self.policies,
            transport: self.transport,
            pool: self.pool.unwrap_or_default(),
            logger: self
                .logger
                .unwrap_or_else(|| Arc::new(TracingLogger::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineError;
    use crate::mocks::{RecordingPolicy, Trace};
    use crate::transport::MockTransport;

    #[test]
    fn test_default_chain_order() {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::with_statuses([200]).unwrap());
        let pipeline = Pipeline::create("config", "1.0.0", Some(transport)).unwrap();

        let names: Vec<String> = pipeline
            .policies()
            .iter()
            .map(|p| format!("{:?}", p))
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names[0].starts_with("TelemetryPolicy"));
        assert!(names[1].starts_with("RetryPolicy"));
        assert!(names[2].starts_with("LoggingPolicy"));
    }

    #[test]
    fn test_invalid_url_fails_before_io() {
        let transport = Arc::new(MockTransport::with_statuses([200]).unwrap());
        let pipeline =
            Pipeline::create("config", "1.0.0", Some(transport.clone() as Arc<dyn Transport>)).unwrap();

        let result = pipeline.create_context(CancellationToken::new(), Method::GET, "contoso.a.io");
        assert!(matches!(result, Err(PipelineError::InvalidUrl { .. })));
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_empty_sdk_name_is_rejected() {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::with_statuses([200]).unwrap());
        assert!(matches!(
            Pipeline::create("", "1.0.0", Some(transport)),
            Err(PipelineError::Argument { .. })
        ));
    }

    #[tokio::test]
    async fn test_added_policies_run_before_transport() {
        let trace = Trace::new();
        let transport = Arc::new(MockTransport::with_statuses([200]).unwrap());
        let mut pipeline = Pipeline::builder(transport.clone()).build();
        pipeline.add(RecordingPolicy::new("A", trace.clone()));
        pipeline.add(RecordingPolicy::new("B", trace.clone()));

        let mut context = pipeline
            .create_context(CancellationToken::new(), Method::GET, "http://contoso.a.io/")
            .unwrap();
        pipeline.process(&mut context).await.unwrap();

        assert_eq!(trace.joined(), "A-before,B-before,B-after,A-after");
        assert_eq!(transport.call_count(), 1);
        assert_eq!(context.status(), Some(200));
    }

    #[tokio::test]
    async fn test_send_wraps_response() {
        let transport = Arc::new(MockTransport::with_statuses([204]).unwrap());
        let pipeline = Pipeline::builder(transport).build();

        let context = pipeline
            .create_context(CancellationToken::new(), Method::DELETE, "http://contoso.a.io/kv/a")
            .unwrap();
        let response = pipeline.send(context, crate::response::empty).await.unwrap();
        assert_eq!(response.status(), 204);

        drop(response);
        assert_eq!(pipeline.pool().rented(), 0);
    }
}

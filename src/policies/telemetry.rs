//! User-Agent and request id stamping.

use async_trait::async_trait;
use uuid::Uuid;

use super::{Next, Policy};
use crate::context::CallContext;
use crate::errors::PipelineResult;
use crate::wire::{names, Header};

/// Adds a pre-built `User-Agent` header to every request.
#[derive(Debug, Clone)]
pub struct TelemetryPolicy {
    user_agent: Header,
    client_request_id: bool,
}

impl TelemetryPolicy {
    /// Creates a policy sending `user_agent`.
    pub fn new(user_agent: Header) -> Self {
        Self {
            user_agent,
            client_request_id: false,
        }
    }

    /// Creates a policy whose `User-Agent` names the SDK, its version, and
    /// optionally the calling application.
    pub fn for_sdk(
        sdk_name: &str,
        sdk_version: &str,
        application_id: Option<&str>,
    ) -> PipelineResult<Self> {
        Ok(Self::new(Header::user_agent(
            sdk_name,
            sdk_version,
            application_id,
        )?))
    }

    /// Also stamps each request with a fresh `x-client-request-id`.
    pub fn with_client_request_id(mut self) -> Self {
        self.client_request_id = true;
        self
    }

    /// Returns the `User-Agent` header.
    pub fn user_agent(&self) -> &Header {
        &self.user_agent
    }
}

#[async_trait]
impl Policy for TelemetryPolicy {
    async fn process(&self, context: &mut CallContext, next: Next<'_>) -> PipelineResult<()> {
        context.add_header(&self.user_agent);
        if self.client_request_id {
            let id = Uuid::new_v4().to_string();
            context.add_header_str(names::CLIENT_REQUEST_ID, &id)?;
        }
        next.run(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::transport::{MockTransport, Transport};
    use crate::wire::Url;
    use http::Method;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn send(policy: TelemetryPolicy, transport: &MockTransport) {
        let pool = BufferPool::default();
        let mut context = transport
            .create_context(
                &pool,
                Method::GET,
                Url::parse("http://contoso.a.io/").unwrap(),
                CancellationToken::new(),
            )
            .unwrap();
        let policies: Vec<Arc<dyn Policy>> = vec![Arc::new(policy)];
        Next::new(&policies, transport).run(&mut context).await.unwrap();
    }

    #[tokio::test]
    async fn test_user_agent_is_added() {
        let transport = MockTransport::with_statuses([200]).unwrap();
        let policy = TelemetryPolicy::for_sdk("keyvault", "1.0.0", Some("myapp")).unwrap();
        send(policy, &transport).await;

        let request = transport.last_request().unwrap();
        let user_agent = request.header("user-agent").unwrap();
        assert!(user_agent.starts_with("myapp keyvault/1.0.0 (Rust; "));
        assert!(request.header(names::CLIENT_REQUEST_ID).is_none());
    }

    #[tokio::test]
    async fn test_client_request_id_is_unique() {
        let transport = MockTransport::with_statuses([200]).unwrap();
        let policy = TelemetryPolicy::for_sdk("face", "0.1.0", None)
            .unwrap()
            .with_client_request_id();
        send(policy.clone(), &transport).await;
        send(policy, &transport).await;

        let ids: Vec<String> = transport
            .requests()
            .iter()
            .map(|r| r.header(names::CLIENT_REQUEST_ID).unwrap().to_string())
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert!(Uuid::parse_str(&ids[0]).is_ok());
    }

    #[test]
    fn test_empty_sdk_name_is_rejected() {
        assert!(TelemetryPolicy::for_sdk("", "1.0", None).is_err());
    }
}

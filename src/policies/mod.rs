//! Pipeline policies.
//!
//! A policy sees every request on its way to the transport and every response
//! on its way back. It receives the rest of the chain as a [`Next`] and may
//! act before running it, after running it, or both. A policy that does not
//! run `next` must leave a response on the context itself.

mod auth;
mod logging;
mod retry;
mod telemetry;

pub use self::auth::KeyCredentialPolicy;
pub use self::logging::{LoggingPolicy, DEFAULT_SLOW_REQUEST_THRESHOLD};
pub use self::retry::{RetryPolicy, RetrySettings, StatusPredicate};
pub use self::telemetry::TelemetryPolicy;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::context::CallContext;
use crate::errors::PipelineResult;
use crate::transport::Transport;

/// A stage of the pipeline that runs before the transport.
#[async_trait]
pub trait Policy: Send + Sync + fmt::Debug {
    /// Processes `context`, usually by calling `next.run(context)`.
    async fn process(&self, context: &mut CallContext, next: Next<'_>) -> PipelineResult<()>;
}

/// The remainder of a chain: the policies still to run, then the transport.
///
/// `Next` is `Copy`, so a policy may run the remainder several times; each
/// run re-enters every remaining policy and the transport in order.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    /// Creates a chain from `policies` ending in `transport`.
    pub fn new(policies: &'a [Arc<dyn Policy>], transport: &'a dyn Transport) -> Self {
        Self {
            policies,
            transport,
        }
    }

    /// Runs the first remaining policy, or the transport once none remain.
    pub async fn run(self, context: &mut CallContext) -> PipelineResult<()> {
        match self.policies.split_first() {
            Some((policy, rest)) => {
                policy
                    .process(context, Next::new(rest, self.transport))
                    .await
            }
            None => self.transport.process(context).await,
        }
    }

    /// Returns the number of policies left before the transport.
    pub fn remaining(&self) -> usize {
        self.policies.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("policies", &self.policies)
            .field("transport", &self.transport)
            .finish()
    }
}

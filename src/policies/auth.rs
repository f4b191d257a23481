//! Subscription-key credentials.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::{Next, Policy};
use crate::context::CallContext;
use crate::errors::{PipelineError, PipelineResult};
use crate::wire::Header;

/// Sends a key in a fixed header, e.g. `Ocp-Apim-Subscription-Key`.
pub struct KeyCredentialPolicy {
    header_name: String,
    key: SecretString,
}

impl KeyCredentialPolicy {
    /// Creates a policy sending `key` as header `header_name`.
    ///
    /// Fails with an argument error if either is empty, and with an encoding
    /// error if they cannot form a valid header.
    pub fn new(header_name: impl Into<String>, key: SecretString) -> PipelineResult<Self> {
        let header_name = header_name.into();
        if header_name.is_empty() {
            return Err(PipelineError::argument("credential header name cannot be empty"));
        }
        if key.expose_secret().is_empty() {
            return Err(PipelineError::argument("credential key cannot be empty"));
        }
        Header::new(&header_name, key.expose_secret())?;

        Ok(Self { header_name, key })
    }

    /// Creates a policy from a plain string key.
    pub fn from_string(header_name: impl Into<String>, key: impl Into<String>) -> PipelineResult<Self> {
        Self::new(header_name, SecretString::new(key.into()))
    }

    /// Returns the header name.
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Returns the last four characters of the key, for diagnostics.
    pub fn key_hint(&self) -> String {
        let key = self.key.expose_secret();
        if key.len() > 8 {
            format!("...{}", &key[key.len() - 4..])
        } else {
            "****".to_string()
        }
    }
}

#[async_trait]
impl Policy for KeyCredentialPolicy {
    async fn process(&self, context: &mut CallContext, next: Next<'_>) -> PipelineResult<()> {
        context.add_header_str(&self.header_name, self.key.expose_secret())?;
        next.run(context).await
    }
}

impl fmt::Debug for KeyCredentialPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCredentialPolicy")
            .field("header_name", &self.header_name)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

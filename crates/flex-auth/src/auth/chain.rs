//! Authenticator chaining.
//!
//! Each [`Authenticator`] either authenticates the request, defers, or fails
//! with a configuration or availability error. [`AuthChain`] asks them in
//! registration order and stops at the first identity; errors stop the chain
//! immediately.

use crate::auth::resolver::{AuthOutcome, FlexTokenResolver};
use crate::errors::FlexAuthError;
use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::sync::Arc;

/// One authentication scheme.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Scheme name, used in logs.
    fn scheme_name(&self) -> &str;

    async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthOutcome, FlexAuthError>;
}

#[async_trait]
impl Authenticator for FlexTokenResolver {
    fn scheme_name(&self) -> &str {
        &self.settings().scheme_name
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthOutcome, FlexAuthError> {
        // Values that are not visible ASCII cannot carry a Flex token
        let values: Vec<&str> = headers
            .get_all(AUTHORIZATION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();

        self.resolve(&values).await
    }
}

/// Ordered list of authenticators.
#[derive(Clone, Default)]
pub struct AuthChain {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `authenticator` to the chain.
    #[must_use]
    pub fn with(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    pub fn len(&self) -> usize {
        self.authenticators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    /// Run the chain. `Deferred` means every authenticator deferred.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthOutcome, FlexAuthError> {
        for authenticator in &self.authenticators {
            match authenticator.authenticate(headers).await? {
                AuthOutcome::Authenticated(identity) => {
                    tracing::debug!(
                        target: "flex.auth.chain",
                        scheme = %authenticator.scheme_name(),
                        "Request authenticated"
                    );
                    return Ok(AuthOutcome::Authenticated(identity));
                }
                AuthOutcome::Deferred => continue,
            }
        }
        Ok(AuthOutcome::Deferred)
    }
}

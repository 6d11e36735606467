//! Authentication middleware for protected routes.
//!
//! Runs the request's `Authorization` headers through the [`AuthChain`] and
//! injects the resulting [`AuthenticatedIdentity`] into request extensions.

use crate::auth::{AuthChain, AuthOutcome, AuthenticatedIdentity};
use crate::errors::FlexAuthError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub chain: Arc<AuthChain>,
}

/// Authentication middleware that rejects requests nobody authenticates.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <flex token>
/// ```
///
/// # Response
///
/// - 401 Unauthorized with WWW-Authenticate header if every authenticator deferred
/// - 500 if authentication is misconfigured
/// - 503 if the identity service is unreachable and faults are propagated
/// - Otherwise continues with the identity in extensions
#[instrument(skip(state, req, next), name = "flex.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, FlexAuthError> {
    match state.chain.authenticate(req.headers()).await? {
        AuthOutcome::Authenticated(identity) => {
            req.extensions_mut().insert(identity);
            Ok(next.run(req).await)
        }
        AuthOutcome::Deferred => {
            tracing::debug!(target: "flex.middleware.auth", "No authenticator accepted the request");
            Err(FlexAuthError::Unauthenticated(
                "No valid credentials presented".to_string(),
            ))
        }
    }
}

/// Authentication middleware for routes that also serve anonymous callers.
///
/// Attaches the identity when one is found; deferral passes the request
/// through untouched. Configuration and transport errors still fail.
#[instrument(skip(state, req, next), name = "flex.middleware.optional_auth")]
pub async fn optional_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, FlexAuthError> {
    if let AuthOutcome::Authenticated(identity) = state.chain.authenticate(req.headers()).await? {
        req.extensions_mut().insert(identity);
    }
    Ok(next.run(req).await)
}

/// Extension trait for reading the identity from a request.
pub trait IdentityExt {
    /// `None` if no auth middleware attached an identity.
    fn identity(&self) -> Option<&AuthenticatedIdentity>;
}

impl<B> IdentityExt for axum::extract::Request<B> {
    fn identity(&self) -> Option<&AuthenticatedIdentity> {
        self.extensions().get::<AuthenticatedIdentity>()
    }
}

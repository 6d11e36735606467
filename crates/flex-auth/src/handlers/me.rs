//! Current identity handler.
//!
//! Returns the claims of the authenticated Flex user.

use crate::auth::{AuthenticatedIdentity, Claim};
use axum::{Extension, Json};
use serde::Serialize;
use tracing::instrument;

/// Response for `/v1/me` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    /// Scheme that authenticated the request.
    pub scheme: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_sid: Option<String>,

    pub roles: Vec<String>,

    /// Every claim, in order.
    pub claims: Vec<Claim>,
}

impl From<&AuthenticatedIdentity> for MeResponse {
    fn from(identity: &AuthenticatedIdentity) -> Self {
        Self {
            scheme: identity.scheme().to_string(),
            email: identity.name().map(str::to_string),
            worker_sid: identity.worker_sid().map(str::to_string),
            roles: identity.roles().map(str::to_string).collect(),
            claims: identity.claims().to_vec(),
        }
    }
}

/// Handler for GET /v1/me
///
/// Requires the auth middleware.
///
/// ```json
/// {
///   "scheme": "Bearer",
///   "email": "agent@example.com",
///   "worker_sid": "WK123",
///   "roles": ["agent"],
///   "claims": [{"type": "Email", "value": "agent@example.com"}, ...]
/// }
/// ```
#[instrument(skip_all, name = "flex.handlers.me")]
pub async fn get_me(Extension(identity): Extension<AuthenticatedIdentity>) -> Json<MeResponse> {
    tracing::debug!(target: "flex.handlers.me", "Returning identity claims");
    Json(MeResponse::from(&identity))
}

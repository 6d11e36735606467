//! Flex authentication error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic to avoid
//! leaking internal details. Actual errors are logged server-side.
//!
//! Note that an invalid or unknown token is *not* an error at the resolver
//! level: it yields `AuthOutcome::Deferred` so other authenticators in a chain
//! can try. `Unauthenticated` is only produced once every authenticator in the
//! chain has deferred.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Flex authentication error type.
///
/// Maps to HTTP status codes:
/// - Configuration, Cache, Internal: 500 Internal Server Error
/// - Unauthenticated: 401 Unauthorized
/// - Transport: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum FlexAuthError {
    /// Settings are missing or malformed (blank account SID / auth token,
    /// unconstructable introspection endpoint). A deployment defect.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Network, timeout or decoding failure while calling Twilio IAM.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal server error")]
    Internal,
}

impl FlexAuthError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            FlexAuthError::Configuration(_) | FlexAuthError::Cache(_) | FlexAuthError::Internal => {
                500
            }
            FlexAuthError::Unauthenticated(_) => 401,
            FlexAuthError::Transport(_) => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for FlexAuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            FlexAuthError::Configuration(reason) => {
                // Misconfigured deployment: log loudly, never leak settings to the client
                tracing::error!(target: "flex.configuration", reason = %reason, "Authentication misconfigured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIGURATION_ERROR",
                    "Authentication is not configured correctly".to_string(),
                )
            }
            FlexAuthError::Unauthenticated(reason) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", reason.clone())
            }
            FlexAuthError::Transport(reason) => {
                tracing::warn!(target: "flex.availability", reason = %reason, "Identity service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            FlexAuthError::Cache(reason) => {
                tracing::error!(target: "flex.cache", reason = %reason, "Cache operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CACHE_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            FlexAuthError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"flex\", error=\"invalid_token\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<redis::RedisError> for FlexAuthError {
    fn from(err: redis::RedisError) -> Self {
        FlexAuthError::Cache(err.to_string())
    }
}

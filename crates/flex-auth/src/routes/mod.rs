//! HTTP routes for the Flex auth service.
//!
//! Defines the Axum router, application state and the authentication wiring.

use crate::auth::{AuthChain, FlexTokenResolver};
use crate::cache::ClaimsCache;
use crate::config::Config;
use crate::errors::FlexAuthError;
use crate::handlers;
use crate::middleware::{require_auth, AuthState};
use crate::services::{TokenIntrospector, TwilioIdentityClient};
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Floor for the router-wide request timeout.
pub const DEFAULT_ROUTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Headroom kept between the introspection timeout and the router timeout.
pub const ROUTER_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Authenticators tried for protected routes.
    pub auth_chain: Arc<AuthChain>,
}

/// Build the Flex token resolver for `config` on top of `cache`.
///
/// # Errors
///
/// Returns `FlexAuthError::Configuration` if the credentials are blank or the
/// account SID cannot be used in the validation endpoint.
pub fn build_flex_resolver(
    config: &Config,
    cache: Arc<dyn ClaimsCache>,
) -> Result<FlexTokenResolver, FlexAuthError> {
    let introspector: Arc<dyn TokenIntrospector> =
        Arc::new(TwilioIdentityClient::new(&config.auth)?);

    Ok(FlexTokenResolver::new(
        config.auth.clone(),
        introspector,
        cache,
    ))
}

/// Auth chain with the Flex resolver as its only scheme.
///
/// # Errors
///
/// See [`build_flex_resolver`].
pub fn build_auth_chain(
    config: &Config,
    cache: Arc<dyn ClaimsCache>,
) -> Result<AuthChain, FlexAuthError> {
    let resolver = build_flex_resolver(config, cache)?;
    Ok(AuthChain::new().with(Arc::new(resolver)))
}

/// Router-wide request timeout for `config`.
///
/// Always longer than the introspection timeout, so a slow identity service
/// is resolved by the transport fault policy rather than cut off with a 408.
pub fn router_timeout(config: &Config) -> Duration {
    DEFAULT_ROUTER_TIMEOUT.max(config.auth.request_timeout + ROUTER_TIMEOUT_MARGIN)
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/v1/health` - Liveness probe - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/v1/me` - Current identity - requires authentication
/// - TraceLayer for request logging
/// - Request timeout from [`router_timeout`]
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let timeout = router_timeout(&state.config);
    let auth_state = Arc::new(AuthState {
        chain: state.auth_chain.clone(),
    });

    // Public routes (no authentication required)
    let public_routes = Router::new().route("/v1/health", get(handlers::health_check));

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/v1/me", get(handlers::get_me))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
}

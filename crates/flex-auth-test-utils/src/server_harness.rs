//! Test server harness for E2E testing
//!
//! Provides `TestFlexServer` for spawning real Flex auth server instances in tests.

use crate::identity_server::{MockIdentityServer, TEST_ACCOUNT_SID, TEST_AUTH_TOKEN};
use flex_auth::cache::{ClaimsCache, InMemoryClaimsCache};
use flex_auth::config::Config;
use flex_auth::routes::{self, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the Flex auth server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_me_flow_e2e() -> Result<()> {
///     let identity = MockIdentityServer::start().await;
///     let server = TestFlexServer::spawn(&identity).await?;
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/v1/me", server.url()))
///         .bearer_auth("flex-token")
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 401);
///     Ok(())
/// }
/// ```
pub struct TestFlexServer {
    addr: SocketAddr,
    config: Config,
    cache: InMemoryClaimsCache,
    _handle: JoinHandle<()>,
}

impl TestFlexServer {
    /// Spawn a server that validates tokens against `identity`.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Use an in-memory claims cache, reachable via [`Self::cache`]
    /// - Start the HTTP server in the background
    pub async fn spawn(identity: &MockIdentityServer) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(identity, HashMap::new()).await
    }

    /// Like [`Self::spawn`], with extra environment variables layered on top.
    pub async fn spawn_with_vars(
        identity: &MockIdentityServer,
        extra_vars: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "TWILIO_ACCOUNT_SID".to_string(),
                TEST_ACCOUNT_SID.to_string(),
            ),
            ("TWILIO_AUTH_TOKEN".to_string(), TEST_AUTH_TOKEN.to_string()),
            ("TWILIO_IAM_BASE_URL".to_string(), identity.uri()),
            (
                "FLEX_INTROSPECTION_TIMEOUT_SECONDS".to_string(),
                "2".to_string(),
            ),
        ]);
        vars.extend(extra_vars);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let cache = InMemoryClaimsCache::new();
        let shared_cache: Arc<dyn ClaimsCache> = Arc::new(cache.clone());

        let auth_chain = routes::build_auth_chain(&config, shared_cache)
            .map_err(|e| anyhow::anyhow!("Failed to build auth chain: {}", e))?;

        let state = Arc::new(AppState {
            config: config.clone(),
            auth_chain: Arc::new(auth_chain),
        });

        // Handle from an uninstalled recorder; the global one can only be set once
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

        let app = routes::build_routes(state, metrics_handle);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            cache,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The claims cache the server reads and writes.
    pub fn cache(&self) -> &InMemoryClaimsCache {
        &self.cache
    }
}

impl Drop for TestFlexServer {
    fn drop(&mut self) {
        // Abort the HTTP server task so the port is released when the test ends
        self._handle.abort();
    }
}

//! Flex Auth Service
//!
//! Sidecar exposing Flex token authentication over HTTP: `/v1/me` answers
//! with the claims of the presented token.

use flex_auth::cache::{ClaimsCache, InMemoryClaimsCache, RedisClaimsCache};
use flex_auth::config::{CacheBackend, Config};
use flex_auth::observability::metrics::init_metrics_recorder;
use flex_auth::routes::{self, AppState};
use flex_auth::tasks::{self, cache_purge::DEFAULT_PURGE_INTERVAL_SECONDS};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flex_auth=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Flex Auth service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        token_prefix = %config.auth.token_prefix(),
        transport_fault_policy = ?config.auth.transport_fault_policy,
        request_timeout = ?config.auth.request_timeout,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    let cancel_token = CancellationToken::new();

    let cache: Arc<dyn ClaimsCache> = match &config.cache_backend {
        CacheBackend::Memory => {
            let cache = InMemoryClaimsCache::new();
            tokio::spawn(tasks::start_cache_purge(
                cache.clone(),
                Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECONDS),
                cancel_token.clone(),
            ));
            info!("Using in-memory claims cache");
            Arc::new(cache)
        }
        CacheBackend::Redis { url } => {
            let cache = RedisClaimsCache::new(url).await?;
            info!("Using Redis claims cache");
            Arc::new(cache)
        }
    };

    let auth_chain = routes::build_auth_chain(&config, cache).map_err(|e| {
        error!("Failed to build authentication: {}", e);
        e
    })?;

    // Parse bind address before moving config
    let bind_address = config.bind_address.clone();

    let state = Arc::new(AppState {
        config,
        auth_chain: Arc::new(auth_chain),
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Flex Auth listening on {}", addr);

    // Start server with graceful shutdown support
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel_token.cancel();

    info!("Flex Auth shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

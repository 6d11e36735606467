//! Redis-backed claims cache, shared across service replicas.
//!
//! # Key Patterns
//!
//! - `flex:token:{token}` - JSON array of claims, `PX` set to the remaining
//!   lifetime so Redis evicts the entry at its expiry
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently; each operation clones it instead of locking.

use super::ClaimsCache;
use crate::auth::claims::Claim;
use crate::clock::{Clock, SystemClock};
use crate::errors::FlexAuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use tracing::{error, instrument, warn};

/// Redis claims cache.
#[derive(Clone)]
pub struct RedisClaimsCache {
    connection: MultiplexedConnection,
    clock: Arc<dyn Clock>,
}

impl RedisClaimsCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `FlexAuthError::Cache` if the URL is invalid or the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, FlexAuthError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url: it may embed credentials
            error!(target: "flex.cache", error = %e, "Failed to open Redis client");
            FlexAuthError::Cache(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "flex.cache", error = %e, "Failed to connect to Redis");
                FlexAuthError::Cache(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            clock: Arc::new(SystemClock),
        })
    }
}

/// Remaining lifetime in milliseconds, or `None` if already expired.
fn ttl_millis(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Option<u64> {
    u64::try_from((expires_at - now).num_milliseconds())
        .ok()
        .filter(|ms| *ms > 0)
}

fn encode_claims(claims: &[Claim]) -> Result<String, FlexAuthError> {
    serde_json::to_string(claims).map_err(|e| {
        error!(target: "flex.cache", error = %e, "Failed to encode claims");
        FlexAuthError::Internal
    })
}

fn decode_claims(json: &str) -> Result<Vec<Claim>, FlexAuthError> {
    serde_json::from_str(json).map_err(|e| {
        warn!(target: "flex.cache", error = %e, "Cached claims are not decodable");
        FlexAuthError::Cache("Cached claims are not decodable".to_string())
    })
}

#[async_trait]
impl ClaimsCache for RedisClaimsCache {
    #[instrument(skip_all, name = "flex.cache.redis.get")]
    async fn get(&self, key: &str) -> Result<Option<Vec<Claim>>, FlexAuthError> {
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(key).await?;

        value.as_deref().map(decode_claims).transpose()
    }

    #[instrument(skip_all, name = "flex.cache.redis.set")]
    async fn set(
        &self,
        key: &str,
        claims: &[Claim],
        expires_at: DateTime<Utc>,
    ) -> Result<(), FlexAuthError> {
        let Some(ttl_ms) = ttl_millis(self.clock.now(), expires_at) else {
            tracing::debug!(target: "flex.cache", "Skipping cache write for expired entry");
            return Ok(());
        };

        let json = encode_claims(claims)?;

        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }
}

//! Process-local claims cache.

use super::ClaimsCache;
use crate::auth::claims::Claim;
use crate::clock::{Clock, SystemClock};
use crate::errors::FlexAuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cached claims with expiry time.
struct CachedClaims {
    claims: Vec<Claim>,
    expires_at: DateTime<Utc>,
}

/// In-memory claims cache keyed by `flex:token:{token}`.
///
/// Cloning shares the underlying map.
#[derive(Clone)]
pub struct InMemoryClaimsCache {
    entries: Arc<RwLock<HashMap<String, CachedClaims>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryClaimsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClaimsCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a cache that judges expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Expiry recorded for `key`, whether or not it has passed.
    pub async fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(key).map(|e| e.expires_at)
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();

        if removed > 0 {
            tracing::debug!(target: "flex.cache", removed, "Purged expired claims");
        }
        removed
    }
}

#[async_trait]
impl ClaimsCache for InMemoryClaimsCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<Claim>>, FlexAuthError> {
        let now = self.clock.now();

        // Check cache first
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.claims.clone())),
                Some(_) => {}
            }
        }

        // Expired - evict unless a fresher write landed in between
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        claims: &[Claim],
        expires_at: DateTime<Utc>,
    ) -> Result<(), FlexAuthError> {
        self.entries.write().await.insert(
            key.to_string(),
            CachedClaims {
                claims: claims.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::claims::ClaimKind;
    use crate::clock::mock::FixedClock;
    use chrono::Duration;

    fn claims() -> Vec<Claim> {
        vec![
            Claim::new(ClaimKind::Email, "test@email.com"),
            Claim::new(ClaimKind::WorkerSid, "WSID12345"),
            Claim::new(ClaimKind::WorkerRole, "agent"),
            Claim::new(ClaimKind::WorkerRole, "supervisor"),
        ]
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let cache = InMemoryClaimsCache::new();
        assert!(cache.get("flex:token:nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order() {
        let cache = InMemoryClaimsCache::new();
        let expires_at = Utc::now() + Duration::minutes(15);

        cache
            .set("flex:token:12345", &claims(), expires_at)
            .await
            .unwrap();

        let cached = cache.get("flex:token:12345").await.unwrap().unwrap();
        assert_eq!(cached, claims());
        assert_eq!(cache.expires_at("flex:token:12345").await, Some(expires_at));
    }

    #[tokio::test]
    async fn test_entry_at_expiry_is_absent_and_evicted() {
        let start = Utc::now();
        let clock = Arc::new(FixedClock::new(start));
        let cache = InMemoryClaimsCache::with_clock(clock.clone());

        cache
            .set("flex:token:12345", &claims(), start + Duration::minutes(5))
            .await
            .unwrap();

        clock.advance(Duration::minutes(4));
        assert!(cache.get("flex:token:12345").await.unwrap().is_some());

        clock.advance(Duration::minutes(1));
        assert!(cache.get("flex:token:12345").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = InMemoryClaimsCache::new();
        let expires_at = Utc::now() + Duration::minutes(15);

        cache
            .set("flex:token:1", &claims(), expires_at)
            .await
            .unwrap();
        let replacement = vec![Claim::new(ClaimKind::Email, "other@email.com")];
        cache
            .set("flex:token:1", &replacement, expires_at)
            .await
            .unwrap();

        assert_eq!(
            cache.get("flex:token:1").await.unwrap().unwrap(),
            replacement
        );
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let start = Utc::now();
        let clock = Arc::new(FixedClock::new(start));
        let cache = InMemoryClaimsCache::with_clock(clock.clone());

        cache
            .set("flex:token:short", &claims(), start + Duration::minutes(1))
            .await
            .unwrap();
        cache
            .set("flex:token:long", &claims(), start + Duration::minutes(10))
            .await
            .unwrap();

        clock.advance(Duration::minutes(2));

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("flex:token:long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let cache = InMemoryClaimsCache::new();
        let expires_at = Utc::now() + Duration::minutes(15);

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("flex:token:{}", i % 4);
                cache.set(&key, &claims(), expires_at).await.unwrap();
                cache.get(&key).await.unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(claims()));
        }
        assert_eq!(cache.len().await, 4);
    }
}

//! Claims cache.
//!
//! Successful introspections are cached under `flex:token:{token}` until
//! `min(now + 15 min, remote expiry)`. Entries are only ever written after a
//! valid introspection and are never deleted explicitly; a store must treat
//! an entry at or past its expiry as absent.
//!
//! Stores are shared by concurrent resolutions. The contract is last write
//! wins with no read-modify-write, so two cold-cache requests for the same
//! token may both introspect.

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryClaimsCache;
pub use self::redis::RedisClaimsCache;

use crate::auth::claims::Claim;
use crate::errors::FlexAuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Prefix for every cache key.
pub const CACHE_KEY_PREFIX: &str = "flex:token:";

/// Cache key for a raw token.
pub fn cache_key(token: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{token}")
}

/// Store for validated token claims.
#[async_trait]
pub trait ClaimsCache: Send + Sync {
    /// Claims cached under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<Claim>>, FlexAuthError>;

    /// Cache `claims` under `key` until `expires_at`, replacing any entry.
    async fn set(
        &self,
        key: &str,
        claims: &[Claim],
        expires_at: DateTime<Utc>,
    ) -> Result<(), FlexAuthError>;
}

/// Cache doubles for unit tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cache whose operations always fail, as an unreachable Redis would.
    #[derive(Default)]
    pub struct FailingClaimsCache {
        fail_get: bool,
        fail_set: bool,
        get_count: AtomicUsize,
        set_count: AtomicUsize,
    }

    impl FailingClaimsCache {
        /// Both `get` and `set` fail.
        pub fn new() -> Self {
            Self {
                fail_get: true,
                fail_set: true,
                ..Self::default()
            }
        }

        /// Only `set` fails; `get` always misses.
        pub fn failing_writes() -> Self {
            Self {
                fail_get: false,
                fail_set: true,
                ..Self::default()
            }
        }

        pub fn get_count(&self) -> usize {
            self.get_count.load(Ordering::SeqCst)
        }

        pub fn set_count(&self) -> usize {
            self.set_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ClaimsCache for FailingClaimsCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<Claim>>, FlexAuthError> {
            self.get_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_get {
                return Err(FlexAuthError::Cache("Mock cache get failure".to_string()));
            }
            Ok(None)
        }

        async fn set(
            &self,
            _key: &str,
            _claims: &[Claim],
            _expires_at: DateTime<Utc>,
        ) -> Result<(), FlexAuthError> {
            self.set_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_set {
                return Err(FlexAuthError::Cache("Mock cache set failure".to_string()));
            }
            Ok(())
        }
    }
}

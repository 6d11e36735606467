//! Flex bearer-token resolution.
//!
//! Turns the `Authorization` header values of a request into an
//! [`AuthOutcome`]:
//!
//! 1. Settings are checked first; blank credentials are a configuration error
//!    no matter what the request carries
//! 2. The first value starting with `"{prefix} "` (ASCII case-insensitive)
//!    supplies the token; no match or a blank token defers
//! 3. Cached claims at `flex:token:{token}` authenticate without a remote call
//! 4. Otherwise the token is introspected. Anything other than a valid result
//!    with a future expiration defers and nothing is cached
//! 5. Valid results are cached until `min(now + 15 min, expiration)`
//!
//! Deferring instead of rejecting lets other authenticators in an
//! [`AuthChain`](super::chain::AuthChain) try the request. The remote error
//! message is only logged.

use crate::auth::claims::{claims_from_introspection, AuthenticatedIdentity, Claim};
use crate::cache::{cache_key, ClaimsCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{FlexAuthSettings, TransportFaultPolicy};
use crate::errors::FlexAuthError;
use crate::observability::metrics::{
    self, CacheLookup, IntrospectionOutcome, ResolutionOutcome,
};
use crate::services::identity_client::TokenIntrospector;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::instrument;

/// Upper bound on how long validated claims are served from cache.
pub const MAX_CACHE_TIME_MINUTES: i64 = 15;

/// Result of resolving a request's credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(AuthenticatedIdentity),
    /// No applicable credential, or one the identity service did not accept.
    Deferred,
}

impl AuthOutcome {
    pub fn identity(&self) -> Option<&AuthenticatedIdentity> {
        match self {
            AuthOutcome::Authenticated(identity) => Some(identity),
            AuthOutcome::Deferred => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, AuthOutcome::Deferred)
    }
}

/// Cache expiry for a token the identity service says is valid until
/// `remote_expiration`.
pub fn cache_expiry(now: DateTime<Utc>, remote_expiration: DateTime<Utc>) -> DateTime<Utc> {
    (now + Duration::minutes(MAX_CACHE_TIME_MINUTES)).min(remote_expiration)
}

/// Select the token from the first value carrying `prefix`.
fn extract_token<'a>(authorization_values: &[&'a str], prefix: &str) -> Option<&'a str> {
    authorization_values.iter().find_map(|value| {
        let (head, rest) = (value.get(..prefix.len())?, value.get(prefix.len()..)?);
        if head.eq_ignore_ascii_case(prefix) {
            rest.strip_prefix(' ')
        } else {
            None
        }
    })
}

/// Resolves Flex bearer tokens against Twilio IAM with a claims cache in front.
pub struct FlexTokenResolver {
    settings: FlexAuthSettings,
    introspector: Arc<dyn TokenIntrospector>,
    cache: Arc<dyn ClaimsCache>,
    clock: Arc<dyn Clock>,
}

impl FlexTokenResolver {
    pub fn new(
        settings: FlexAuthSettings,
        introspector: Arc<dyn TokenIntrospector>,
        cache: Arc<dyn ClaimsCache>,
    ) -> Self {
        Self {
            settings,
            introspector,
            cache,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for expiry decisions.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &FlexAuthSettings {
        &self.settings
    }

    /// Resolve the `Authorization` header values of one request.
    ///
    /// # Errors
    ///
    /// - `FlexAuthError::Configuration` if the account SID or auth token is blank
    /// - `FlexAuthError::Transport` if the identity service is unreachable and
    ///   the transport fault policy is `Propagate`
    #[instrument(skip_all, name = "flex.auth.resolve")]
    pub async fn resolve(
        &self,
        authorization_values: &[&str],
    ) -> Result<AuthOutcome, FlexAuthError> {
        let outcome = self.resolve_inner(authorization_values).await;

        metrics::record_resolution(match &outcome {
            Ok(AuthOutcome::Authenticated(_)) => ResolutionOutcome::Authenticated,
            Ok(AuthOutcome::Deferred) => ResolutionOutcome::Deferred,
            Err(_) => ResolutionOutcome::Error,
        });

        outcome
    }

    async fn resolve_inner(
        &self,
        authorization_values: &[&str],
    ) -> Result<AuthOutcome, FlexAuthError> {
        self.settings.validate()?;

        if authorization_values.is_empty() {
            tracing::debug!(target: "flex.auth.resolver", "No Authorization header");
            return Ok(AuthOutcome::Deferred);
        }

        let Some(token) = extract_token(authorization_values, self.settings.token_prefix())
        else {
            tracing::debug!(
                target: "flex.auth.resolver",
                prefix = %self.settings.token_prefix(),
                "No Authorization value with expected prefix"
            );
            return Ok(AuthOutcome::Deferred);
        };

        if token.trim().is_empty() {
            tracing::debug!(target: "flex.auth.resolver", "Empty bearer token");
            return Ok(AuthOutcome::Deferred);
        }

        let key = cache_key(token);

        match self.cache.get(&key).await {
            Ok(Some(claims)) if !claims.is_empty() => {
                metrics::record_cache_lookup(CacheLookup::Hit);
                tracing::debug!(target: "flex.auth.resolver", "Claims cache hit");
                return Ok(AuthOutcome::Authenticated(self.identity(claims)));
            }
            Ok(_) => metrics::record_cache_lookup(CacheLookup::Miss),
            Err(e) => {
                metrics::record_cache_lookup(CacheLookup::Error);
                tracing::warn!(
                    target: "flex.auth.resolver",
                    error = %e,
                    "Claims cache lookup failed, introspecting"
                );
            }
        }

        let result = match self.introspector.validate_token(token).await {
            Ok(result) => result,
            Err(FlexAuthError::Transport(reason)) => {
                metrics::record_introspection(IntrospectionOutcome::TransportError);
                return match self.settings.transport_fault_policy {
                    TransportFaultPolicy::Defer => {
                        tracing::warn!(
                            target: "flex.auth.resolver",
                            reason = %reason,
                            "Identity service unavailable, deferring"
                        );
                        Ok(AuthOutcome::Deferred)
                    }
                    TransportFaultPolicy::Propagate => Err(FlexAuthError::Transport(reason)),
                };
            }
            Err(e) => return Err(e),
        };

        if !result.valid {
            metrics::record_introspection(IntrospectionOutcome::Invalid);
            tracing::debug!(
                target: "flex.auth.resolver",
                code = ?result.code,
                message = ?result.message_text(),
                "Identity service rejected token"
            );
            return Ok(AuthOutcome::Deferred);
        }

        let now = self.clock.now();
        let expiration = match result.expiration {
            Some(expiration) if expiration > now => expiration,
            other => {
                metrics::record_introspection(IntrospectionOutcome::Expired);
                tracing::debug!(
                    target: "flex.auth.resolver",
                    expiration = ?other,
                    "Token has no future expiration"
                );
                return Ok(AuthOutcome::Deferred);
            }
        };

        metrics::record_introspection(IntrospectionOutcome::Valid);

        let claims = claims_from_introspection(&result);
        let expires_at = cache_expiry(now, expiration);

        if let Err(e) = self.cache.set(&key, &claims, expires_at).await {
            // Token was validated remotely; the next request will introspect again
            tracing::warn!(
                target: "flex.auth.resolver",
                error = %e,
                "Failed to cache claims"
            );
        }

        tracing::debug!(
            target: "flex.auth.resolver",
            expires_at = %expires_at,
            "Token validated"
        );

        Ok(AuthOutcome::Authenticated(self.identity(claims)))
    }

    fn identity(&self, claims: Vec<Claim>) -> AuthenticatedIdentity {
        AuthenticatedIdentity::new(self.settings.scheme_name.clone(), claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::claims::ClaimKind;
    use crate::cache::mock::FailingClaimsCache;
    use crate::cache::InMemoryClaimsCache;
    use crate::clock::mock::FixedClock;
    use crate::services::identity_client::mock::MockIntrospector;
    use crate::services::identity_client::IntrospectionResult;
    use secrecy::SecretString;

    fn settings() -> FlexAuthSettings {
        FlexAuthSettings::new("AC123", SecretString::from("auth-token"))
    }

    fn valid_result(expiration: DateTime<Utc>) -> IntrospectionResult {
        IntrospectionResult {
            valid: true,
            expiration: Some(expiration),
            email: Some("a@b.com".to_string()),
            worker_sid: Some("W1".to_string()),
            roles: vec!["agent".to_string()],
            ..IntrospectionResult::default()
        }
    }

    struct Fixture {
        resolver: FlexTokenResolver,
        introspector: Arc<MockIntrospector>,
        cache: InMemoryClaimsCache,
        clock: Arc<FixedClock>,
    }

    fn fixture(settings: FlexAuthSettings, introspector: MockIntrospector) -> Fixture {
        fixture_at(Utc::now(), settings, introspector)
    }

    fn fixture_at(
        now: DateTime<Utc>,
        settings: FlexAuthSettings,
        introspector: MockIntrospector,
    ) -> Fixture {
        let clock = Arc::new(FixedClock::new(now));
        let introspector = Arc::new(introspector);
        let cache = InMemoryClaimsCache::with_clock(clock.clone());
        let resolver =
            FlexTokenResolver::new(settings, introspector.clone(), Arc::new(cache.clone()))
                .with_clock(clock.clone());

        Fixture {
            resolver,
            introspector,
            cache,
            clock,
        }
    }

    #[tokio::test]
    async fn test_blank_account_sid_is_configuration_error() {
        let mut settings = settings();
        settings.account_sid = "  ".to_string();
        let f = fixture(settings, MockIntrospector::rejecting());

        // Header is irrelevant: settings are checked first
        for headers in [vec![], vec!["Bearer 12345"]] {
            let result = f.resolver.resolve(&headers).await;
            assert!(
                matches!(result, Err(FlexAuthError::Configuration(ref msg)) if msg.contains("account_sid")),
                "Expected configuration error, got {:?}",
                result
            );
        }
        assert_eq!(f.introspector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_auth_token_is_configuration_error() {
        let mut settings = settings();
        settings.auth_token = SecretString::from("");
        let f = fixture(settings, MockIntrospector::rejecting());

        let result = f.resolver.resolve(&["Bearer 12345"]).await;
        assert!(
            matches!(result, Err(FlexAuthError::Configuration(ref msg)) if msg.contains("auth_token")),
            "Expected configuration error, got {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_no_header_defers() {
        let f = fixture(settings(), MockIntrospector::rejecting());

        let outcome = f.resolver.resolve(&[]).await.unwrap();

        assert!(outcome.is_deferred());
        assert_eq!(f.introspector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_value_without_prefix_defers() {
        let f = fixture(settings(), MockIntrospector::rejecting());

        let outcome = f.resolver.resolve(&["12345"]).await.unwrap();

        assert!(outcome.is_deferred());
        assert_eq!(f.introspector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_prefix_requires_separating_space() {
        let f = fixture(settings(), MockIntrospector::rejecting());

        for value in ["Bearer12345", "Bearer", "Bear 12345", "Basic dXNlcjpwdw=="] {
            let outcome = f.resolver.resolve(&[value]).await.unwrap();
            assert!(outcome.is_deferred(), "{:?} should defer", value);
        }
        assert_eq!(f.introspector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_token_defers_without_introspection() {
        let f = fixture(settings(), MockIntrospector::rejecting());

        for value in ["Bearer ", "Bearer    "] {
            let outcome = f.resolver.resolve(&[value]).await.unwrap();
            assert!(outcome.is_deferred());
        }
        assert_eq!(f.introspector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_introspection() {
        let f = fixture(settings(), MockIntrospector::rejecting());
        f.cache
            .set(
                "flex:token:12345",
                &[
                    Claim::new(ClaimKind::Email, "test@email.com"),
                    Claim::new(ClaimKind::WorkerSid, "WSID12345"),
                ],
                f.clock.now() + Duration::minutes(10),
            )
            .await
            .unwrap();

        let outcome = f.resolver.resolve(&["Bearer 12345"]).await.unwrap();

        let identity = outcome.identity().expect("should authenticate");
        assert_eq!(identity.claims().len(), 2);
        assert_eq!(identity.name(), Some("test@email.com"));
        assert_eq!(identity.worker_sid(), Some("WSID12345"));
        assert_eq!(identity.scheme(), "Bearer");
        assert_eq!(f.introspector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cached_empty_claims_count_as_miss() {
        let f = fixture(settings(), MockIntrospector::rejecting());
        f.cache
            .set("flex:token:12345", &[], f.clock.now() + Duration::minutes(10))
            .await
            .unwrap();

        let outcome = f.resolver.resolve(&["Bearer 12345"]).await.unwrap();

        assert!(outcome.is_deferred());
        assert_eq!(f.introspector.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_expiry_capped_at_fifteen_minutes() {
        let now = Utc::now();
        let f = fixture_at(
            now,
            settings(),
            MockIntrospector::returning(valid_result(now + Duration::minutes(20))),
        );

        let outcome = f.resolver.resolve(&["Bearer 12345"]).await.unwrap();

        let identity = outcome.identity().expect("should authenticate");
        assert_eq!(
            identity.claims(),
            &[
                Claim::new(ClaimKind::Email, "a@b.com"),
                Claim::new(ClaimKind::WorkerSid, "W1"),
                Claim::new(ClaimKind::WorkerRole, "agent"),
            ]
        );
        assert_eq!(
            f.cache.expires_at("flex:token:12345").await,
            Some(now + Duration::minutes(15))
        );
        assert_eq!(f.introspector.tokens(), vec!["12345"]);
    }

    #[tokio::test]
    async fn test_cache_expiry_follows_sooner_remote_expiry() {
        let now = Utc::now();
        let f = fixture_at(
            now,
            settings(),
            MockIntrospector::returning(valid_result(now + Duration::minutes(5))),
        );

        let outcome = f.resolver.resolve(&["Bearer 12345"]).await.unwrap();

        assert!(outcome.identity().is_some());
        assert_eq!(
            f.cache.expires_at("flex:token:12345").await,
            Some(now + Duration::minutes(5))
        );
    }

    #[tokio::test]
    async fn test_invalid_result_defers_without_cache_write() {
        let f = fixture(settings(), MockIntrospector::rejecting());

        let outcome = f.resolver.resolve(&["Bearer 12345"]).await.unwrap();

        assert!(outcome.is_deferred());
        assert_eq!(f.introspector.call_count(), 1);
        assert!(f.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_valid_without_expiration_defers() {
        let f = fixture(
            settings(),
            MockIntrospector::returning(IntrospectionResult {
                expiration: None,
                ..valid_result(Utc::now())
            }),
        );

        let outcome = f.resolver.resolve(&["Bearer 12345"]).await.unwrap();

        assert!(outcome.is_deferred());
        assert!(f.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_already_expired_token_defers() {
        let now = Utc::now();
        let f = fixture_at(
            now,
            settings(),
            MockIntrospector::with_responses(vec![
                valid_result(now),
                valid_result(now - Duration::seconds(1)),
            ]),
        );

        // Expiration equal to now is not in the future
        assert!(f.resolver.resolve(&["Bearer 1"]).await.unwrap().is_deferred());
        assert!(f.resolver.resolve(&["Bearer 1"]).await.unwrap().is_deferred());
        assert!(f.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_round_trip_through_cache() {
        let now = Utc::now();
        let mut result = valid_result(now + Duration::hours(1));
        result.roles = vec![
            "agent".to_string(),
            "supervisor".to_string(),
            "admin".to_string(),
        ];
        let f = fixture(settings(), MockIntrospector::returning(result));

        let first = f.resolver.resolve(&["Bearer tok"]).await.unwrap();
        let second = f.resolver.resolve(&["Bearer tok"]).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            second.identity().unwrap().roles().collect::<Vec<_>>(),
            vec!["agent", "supervisor", "admin"]
        );
        assert_eq!(f.introspector.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_entry_expires_and_reintrospects() {
        let f = fixture(
            settings(),
            MockIntrospector::returning(valid_result(Utc::now() + Duration::hours(2))),
        );

        f.resolver.resolve(&["Bearer tok"]).await.unwrap();
        f.clock.advance(Duration::minutes(15));
        f.resolver.resolve(&["Bearer tok"]).await.unwrap();

        assert_eq!(f.introspector.call_count(), 2);
    }

    #[tokio::test]
    async fn test_first_matching_value_wins() {
        let f = fixture(
            settings(),
            MockIntrospector::returning(valid_result(Utc::now() + Duration::hours(1))),
        );

        let outcome = f
            .resolver
            .resolve(&["Basic abc", "bearer first", "Bearer second"])
            .await
            .unwrap();

        assert!(outcome.identity().is_some());
        assert_eq!(f.introspector.tokens(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_custom_prefix() {
        let f = fixture(
            settings().with_token_prefix("Flex"),
            MockIntrospector::returning(valid_result(Utc::now() + Duration::hours(1))),
        );

        assert!(f.resolver.resolve(&["Bearer abc"]).await.unwrap().is_deferred());
        assert!(f.resolver.resolve(&["FLEX abc"]).await.unwrap().identity().is_some());
        assert_eq!(f.introspector.tokens(), vec!["abc"]);
    }

    #[tokio::test]
    async fn test_transport_fault_defers_by_default() {
        let f = fixture(settings(), MockIntrospector::failing());

        let outcome = f.resolver.resolve(&["Bearer 12345"]).await.unwrap();

        assert!(outcome.is_deferred());
        assert!(f.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_transport_fault_propagates_when_configured() {
        let f = fixture(
            settings().with_transport_fault_policy(TransportFaultPolicy::Propagate),
            MockIntrospector::failing(),
        );

        let result = f.resolver.resolve(&["Bearer 12345"]).await;

        assert!(matches!(result, Err(FlexAuthError::Transport(_))));
    }

    #[tokio::test]
    async fn test_cache_failures_do_not_block_authentication() {
        let cache = Arc::new(FailingClaimsCache::new());
        let introspector = Arc::new(MockIntrospector::returning(valid_result(
            Utc::now() + Duration::hours(1),
        )));
        let resolver = FlexTokenResolver::new(settings(), introspector.clone(), cache.clone());

        let outcome = resolver.resolve(&["Bearer 12345"]).await.unwrap();

        assert!(outcome.identity().is_some());
        assert_eq!(cache.get_count(), 1);
        assert_eq!(cache.set_count(), 1);
        assert_eq!(introspector.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_authenticates() {
        let cache = Arc::new(FailingClaimsCache::failing_writes());
        let introspector = Arc::new(MockIntrospector::returning(valid_result(
            Utc::now() + Duration::hours(1),
        )));
        let resolver = FlexTokenResolver::new(settings(), introspector.clone(), cache.clone());

        let outcome = resolver.resolve(&["Bearer 12345"]).await.unwrap();

        let identity = outcome.identity().expect("should authenticate");
        assert_eq!(identity.name(), Some("a@b.com"));
        assert_eq!(cache.get_count(), 1);
        assert_eq!(cache.set_count(), 1);
        assert_eq!(introspector.call_count(), 1);

        // Nothing was stored, so the next request introspects again
        let outcome = resolver.resolve(&["Bearer 12345"]).await.unwrap();
        assert!(outcome.identity().is_some());
        assert_eq!(cache.get_count(), 2);
        assert_eq!(introspector.call_count(), 2);
    }

    #[test]
    fn test_cache_expiry() {
        let now = Utc::now();
        assert_eq!(
            cache_expiry(now, now + Duration::minutes(20)),
            now + Duration::minutes(15)
        );
        assert_eq!(
            cache_expiry(now, now + Duration::minutes(5)),
            now + Duration::minutes(5)
        );
        assert_eq!(
            cache_expiry(now, now + Duration::minutes(15)),
            now + Duration::minutes(15)
        );
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token(&["Bearer abc"], "Bearer"), Some("abc"));
        assert_eq!(extract_token(&["bEaReR abc"], "Bearer"), Some("abc"));
        assert_eq!(extract_token(&["Bearer "], "Bearer"), Some(""));
        assert_eq!(extract_token(&["Bearerabc"], "Bearer"), None);
        assert_eq!(extract_token(&["abc"], "Bearer"), None);
        assert_eq!(extract_token(&[], "Bearer"), None);
        // Multi-byte input must not split a char boundary
        assert_eq!(extract_token(&["Béarer abc"], "Bearer"), None);
    }
}

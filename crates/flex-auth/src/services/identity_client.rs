//! Twilio IAM token introspection client.
//!
//! Validates an opaque Flex token by POSTing it to
//! `/v1/Accounts/{AccountSid}/Tokens/validate` with Basic auth built from the
//! account SID and auth token.
//!
//! # Result mapping
//!
//! - 2xx: body decoded as an [`IntrospectionResult`] as-is
//! - non-2xx: `{valid: false, message: "Unexpected Response {status}"}`, with
//!   `{status}` the numeric code (`Unexpected Response 401`). The message is
//!   only ever logged, never matched on
//! - blank token: `{valid: false, message: "Unknown Error"}`, no request sent
//! - connection error, timeout, undecodable body: `FlexAuthError::Transport`
//!
//! No retries, no backoff.
//!
//! # Security
//!
//! - The auth token only ever lives inside the precomputed Basic header,
//!   held as a `SecretString`
//! - Token values are never logged

use crate::config::FlexAuthSettings;
use crate::errors::FlexAuthError;
use crate::observability::metrics;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Connect timeout for the IAM HTTP client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Message reported for blank tokens.
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown Error";

/// Token validation response from Twilio IAM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntrospectionResult {
    #[serde(default)]
    pub code: Option<i64>,

    /// Whether IAM considers the token valid.
    #[serde(default)]
    pub valid: bool,

    /// When the token stops being valid.
    #[serde(default, deserialize_with = "deserialize_expiration")]
    pub expiration: Option<DateTime<Utc>>,

    /// Flex user email.
    #[serde(default, rename = "realm_user_id")]
    pub email: Option<String>,

    #[serde(default)]
    pub worker_sid: Option<String>,

    /// Flex roles, in the order IAM returned them. `null` decodes as empty.
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub roles: Vec<String>,

    /// Error detail from IAM; either a string or an object.
    #[serde(default)]
    pub message: Option<serde_json::Value>,

    #[serde(default)]
    pub identity: Option<String>,
}

impl IntrospectionResult {
    /// Synthesized invalid result carrying a diagnostic message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(serde_json::Value::String(message.into())),
            ..Self::default()
        }
    }

    /// Message rendered for logging.
    pub fn message_text(&self) -> Option<String> {
        match &self.message {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

fn deserialize_null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 timestamps and zone-less ISO-8601 timestamps (read as UTC).
fn deserialize_expiration<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(None),
    };

    parse_expiration(raw.trim())
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid expiration timestamp: {raw}")))
}

fn parse_expiration(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Serialize)]
struct ValidateTokenRequest<'a> {
    #[serde(rename = "Token")]
    token: &'a str,
}

/// Remote token validation.
#[async_trait]
pub trait TokenIntrospector: Send + Sync {
    /// Ask the identity service whether `token` is valid.
    ///
    /// Domain-level rejections come back as `Ok` with `valid == false`.
    ///
    /// # Errors
    ///
    /// Returns `FlexAuthError::Transport` when the service cannot be reached
    /// or answers with an undecodable body.
    async fn validate_token(&self, token: &str) -> Result<IntrospectionResult, FlexAuthError>;
}

/// Twilio IAM introspection client.
pub struct TwilioIdentityClient {
    http_client: reqwest::Client,
    validate_url: Url,
    /// Precomputed `Basic base64(sid:token)` header value.
    authorization: SecretString,
}

impl TwilioIdentityClient {
    /// Build a client for the account in `settings`.
    ///
    /// # Errors
    ///
    /// Returns `FlexAuthError::Configuration` if credentials are blank or the
    /// validation endpoint cannot be built from the account SID.
    pub fn new(settings: &FlexAuthSettings) -> Result<Self, FlexAuthError> {
        settings.validate()?;

        let validate_url = validate_url(&settings.iam_base_url, &settings.account_sid)?;

        let credentials = format!(
            "{}:{}",
            settings.account_sid,
            settings.auth_token.expose_secret()
        );
        let authorization =
            SecretString::from(format!("Basic {}", STANDARD.encode(credentials.as_bytes())));

        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                tracing::error!(target: "flex.services.identity_client", error = %e, "Failed to build HTTP client");
                FlexAuthError::Configuration("Failed to build identity service HTTP client".to_string())
            })?;

        Ok(Self {
            http_client,
            validate_url,
            authorization,
        })
    }

    /// The endpoint tokens are validated against.
    pub fn validate_url(&self) -> &str {
        self.validate_url.as_str()
    }
}

/// Compose the validation endpoint, rejecting SIDs that do not survive as a
/// single path segment.
fn validate_url(base_url: &str, account_sid: &str) -> Result<Url, FlexAuthError> {
    let raw = format!(
        "{}/v1/Accounts/{}/Tokens/validate",
        base_url.trim_end_matches('/'),
        account_sid
    );

    let url = Url::parse(&raw).map_err(|e| {
        FlexAuthError::Configuration(format!("Invalid identity service endpoint: {e}"))
    })?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();
    let expected = ["v1", "Accounts", account_sid, "Tokens", "validate"];

    if !segments.ends_with(&expected) || url.query().is_some() || url.fragment().is_some() {
        return Err(FlexAuthError::Configuration(
            "Settings account_sid cannot be used in the identity service endpoint".to_string(),
        ));
    }

    Ok(url)
}

#[async_trait]
impl TokenIntrospector for TwilioIdentityClient {
    #[instrument(skip_all, name = "flex.services.identity_client.validate")]
    async fn validate_token(&self, token: &str) -> Result<IntrospectionResult, FlexAuthError> {
        if token.trim().is_empty() {
            tracing::debug!(target: "flex.services.identity_client", "Blank token, skipping introspection");
            return Ok(IntrospectionResult::rejected(UNKNOWN_ERROR_MESSAGE));
        }

        let start = Instant::now();

        let result = self
            .http_client
            .post(self.validate_url.clone())
            .header(AUTHORIZATION, self.authorization.expose_secret())
            .header(CONTENT_TYPE, "application/json")
            .json(&ValidateTokenRequest { token })
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_introspection_duration(start.elapsed());
                tracing::warn!(
                    target: "flex.services.identity_client",
                    error = %e,
                    timeout = e.is_timeout(),
                    "Identity service request failed"
                );
                return Err(FlexAuthError::Transport(
                    "Identity service request failed".to_string(),
                ));
            }
        };

        let status = response.status();
        if !status.is_success() {
            metrics::record_introspection_duration(start.elapsed());
            tracing::debug!(
                target: "flex.services.identity_client",
                status = %status,
                "Identity service returned non-success status"
            );
            return Ok(IntrospectionResult::rejected(format!(
                "Unexpected Response {}",
                status.as_u16()
            )));
        }

        let decoded = response.json::<IntrospectionResult>().await;
        metrics::record_introspection_duration(start.elapsed());

        decoded.map_err(|e| {
            tracing::warn!(
                target: "flex.services.identity_client",
                error = %e,
                "Failed to decode identity service response"
            );
            FlexAuthError::Transport("Invalid identity service response".to_string())
        })
    }
}

/// Mock introspector for unit tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct MockIntrospector {
        /// Results to return (cycles through them).
        responses: Vec<IntrospectionResult>,
        call_count: AtomicUsize,
        /// Whether to return transport errors.
        return_error: bool,
        tokens: Mutex<Vec<String>>,
    }

    impl MockIntrospector {
        /// Create a mock that always returns `result`.
        pub fn returning(result: IntrospectionResult) -> Self {
            Self::with_responses(vec![result])
        }

        /// Create a mock that returns custom results in sequence.
        pub fn with_responses(responses: Vec<IntrospectionResult>) -> Self {
            Self {
                responses,
                call_count: AtomicUsize::new(0),
                return_error: false,
                tokens: Mutex::new(Vec::new()),
            }
        }

        /// Create a mock that always reports the token invalid.
        pub fn rejecting() -> Self {
            Self::returning(IntrospectionResult::rejected("Invalid Access Token"))
        }

        /// Create a mock whose calls fail with a transport error.
        pub fn failing() -> Self {
            Self {
                responses: vec![],
                call_count: AtomicUsize::new(0),
                return_error: true,
                tokens: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Tokens passed to `validate_token`, in call order.
        pub fn tokens(&self) -> Vec<String> {
            self.tokens.lock().map(|t| t.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl TokenIntrospector for MockIntrospector {
        async fn validate_token(
            &self,
            token: &str,
        ) -> Result<IntrospectionResult, FlexAuthError> {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut tokens) = self.tokens.lock() {
                tokens.push(token.to_string());
            }

            if self.return_error {
                return Err(FlexAuthError::Transport(
                    "Mock introspector error".to_string(),
                ));
            }

            if self.responses.is_empty() {
                return Ok(IntrospectionResult::rejected(UNKNOWN_ERROR_MESSAGE));
            }

            // Cycle through responses
            let idx = count % self.responses.len();
            Ok(self.responses.get(idx).cloned().unwrap_or_default())
        }
    }
}

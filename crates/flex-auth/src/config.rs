//! Flex authentication configuration.
//!
//! [`FlexAuthSettings`] is what the resolver and the identity client consume.
//! [`Config`] is the service-level configuration loaded from environment
//! variables; it wraps the settings and adds bind address and cache backend.
//! All sensitive fields are redacted in Debug output.

use crate::errors::FlexAuthError;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Token prefix expected in the Authorization header when none is configured.
pub const DEFAULT_TOKEN_PREFIX: &str = "Bearer";

/// Authentication scheme name attached to identities.
pub const DEFAULT_SCHEME_NAME: &str = "Bearer";

/// Twilio IAM base URL.
pub const DEFAULT_IAM_BASE_URL: &str = "https://iam.twilio.com";

/// Default introspection request timeout.
pub const DEFAULT_INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound accepted for `FLEX_INTROSPECTION_TIMEOUT_SECONDS`.
pub const MAX_INTROSPECTION_TIMEOUT_SECONDS: u64 = 60;

/// Default bind address for the service binary.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// What the resolver does when the identity service cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportFaultPolicy {
    /// Log the fault and defer, letting other authenticators try.
    #[default]
    Defer,
    /// Surface the fault to the caller as `FlexAuthError::Transport` (503).
    Propagate,
}

impl TransportFaultPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "defer" => Some(Self::Defer),
            "propagate" => Some(Self::Propagate),
            _ => None,
        }
    }
}

/// Settings for validating Flex tokens against Twilio IAM.
#[derive(Clone)]
pub struct FlexAuthSettings {
    /// Expected prefix before the token in the Authorization header,
    /// e.g. `Bearer`. `None` means [`DEFAULT_TOKEN_PREFIX`].
    pub token_prefix: Option<String>,

    /// Account SID of the Twilio project issuing the Flex tokens.
    pub account_sid: String,

    /// Auth token of the Twilio project issuing the Flex tokens.
    pub auth_token: SecretString,

    /// Scheme name attached to authenticated identities.
    pub scheme_name: String,

    /// Base URL of the Twilio IAM API (overridable for tests).
    pub iam_base_url: String,

    /// Timeout applied to each introspection request.
    pub request_timeout: Duration,

    pub transport_fault_policy: TransportFaultPolicy,
}

impl fmt::Debug for FlexAuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlexAuthSettings")
            .field("token_prefix", &self.token_prefix)
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("scheme_name", &self.scheme_name)
            .field("iam_base_url", &self.iam_base_url)
            .field("request_timeout", &self.request_timeout)
            .field("transport_fault_policy", &self.transport_fault_policy)
            .finish()
    }
}

impl FlexAuthSettings {
    /// Create settings with defaults for everything but the credentials.
    pub fn new(account_sid: impl Into<String>, auth_token: SecretString) -> Self {
        Self {
            token_prefix: None,
            account_sid: account_sid.into(),
            auth_token,
            scheme_name: DEFAULT_SCHEME_NAME.to_string(),
            iam_base_url: DEFAULT_IAM_BASE_URL.to_string(),
            request_timeout: DEFAULT_INTROSPECTION_TIMEOUT,
            transport_fault_policy: TransportFaultPolicy::default(),
        }
    }

    /// Set the expected token prefix.
    #[must_use]
    pub fn with_token_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.token_prefix = Some(prefix.into());
        self
    }

    /// Point the identity client at a different IAM host.
    #[must_use]
    pub fn with_iam_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.iam_base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_transport_fault_policy(mut self, policy: TransportFaultPolicy) -> Self {
        self.transport_fault_policy = policy;
        self
    }

    /// The token prefix in effect, falling back to [`DEFAULT_TOKEN_PREFIX`].
    pub fn token_prefix(&self) -> &str {
        self.token_prefix.as_deref().unwrap_or(DEFAULT_TOKEN_PREFIX)
    }

    /// Check that the required credentials are present.
    ///
    /// # Errors
    ///
    /// Returns `FlexAuthError::Configuration` naming the first blank field.
    pub fn validate(&self) -> Result<(), FlexAuthError> {
        if self.account_sid.trim().is_empty() {
            return Err(FlexAuthError::Configuration(
                "Settings missing account_sid".to_string(),
            ));
        }
        if self.auth_token.expose_secret().trim().is_empty() {
            return Err(FlexAuthError::Configuration(
                "Settings missing auth_token".to_string(),
            ));
        }
        Ok(())
    }
}

/// Claims cache backend selected for the service binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// Process-local cache.
    Memory,
    /// Shared Redis cache at the given URL.
    Redis { url: String },
}

/// Service configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Token validation settings.
    pub auth: FlexAuthSettings,

    pub cache_backend: CacheBackend,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache_backend = match &self.cache_backend {
            CacheBackend::Memory => "memory",
            // Redis URLs may embed credentials
            CacheBackend::Redis { .. } => "redis ([REDACTED])",
        };
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("auth", &self.auth)
            .field("cache_backend", &cache_backend)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid authentication settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid introspection timeout configuration: {0}")]
    InvalidTimeout(String),

    #[error("Invalid transport fault policy: {0}")]
    InvalidTransportFaultPolicy(String),

    #[error("Invalid cache backend: {0}")]
    InvalidCacheBackend(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let account_sid = vars
            .get("TWILIO_ACCOUNT_SID")
            .ok_or_else(|| ConfigError::MissingEnvVar("TWILIO_ACCOUNT_SID".to_string()))?
            .clone();

        let auth_token = vars
            .get("TWILIO_AUTH_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("TWILIO_AUTH_TOKEN".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let mut auth = FlexAuthSettings::new(account_sid, SecretString::from(auth_token));

        if let Some(prefix) = vars.get("FLEX_TOKEN_PREFIX") {
            auth.token_prefix = Some(prefix.clone());
        }

        if let Some(scheme_name) = vars.get("FLEX_SCHEME_NAME") {
            auth.scheme_name = scheme_name.clone();
        }

        if let Some(base_url) = vars.get("TWILIO_IAM_BASE_URL") {
            auth.iam_base_url = base_url.trim_end_matches('/').to_string();
        }

        // Parse introspection timeout with validation
        if let Some(value_str) = vars.get("FLEX_INTROSPECTION_TIMEOUT_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidTimeout(format!(
                    "FLEX_INTROSPECTION_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 || value > MAX_INTROSPECTION_TIMEOUT_SECONDS {
                return Err(ConfigError::InvalidTimeout(format!(
                    "FLEX_INTROSPECTION_TIMEOUT_SECONDS must be between 1 and {}, got {}",
                    MAX_INTROSPECTION_TIMEOUT_SECONDS, value
                )));
            }

            auth.request_timeout = Duration::from_secs(value);
        }

        if let Some(value_str) = vars.get("FLEX_TRANSPORT_FAULT_POLICY") {
            auth.transport_fault_policy =
                TransportFaultPolicy::parse(value_str).ok_or_else(|| {
                    ConfigError::InvalidTransportFaultPolicy(format!(
                        "FLEX_TRANSPORT_FAULT_POLICY must be 'defer' or 'propagate', got '{}'",
                        value_str
                    ))
                })?;
        }

        let cache_backend = match vars
            .get("FLEX_CACHE_BACKEND")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("memory") => CacheBackend::Memory,
            Some("redis") => {
                let url = vars
                    .get("REDIS_URL")
                    .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                    .clone();
                CacheBackend::Redis { url }
            }
            Some(other) => {
                return Err(ConfigError::InvalidCacheBackend(format!(
                    "FLEX_CACHE_BACKEND must be 'memory' or 'redis', got '{}'",
                    other
                )))
            }
        };

        // Blank credentials fail startup rather than every request
        auth.validate()
            .map_err(|e| ConfigError::InvalidSettings(e.to_string()))?;

        Ok(Config {
            bind_address,
            auth,
            cache_backend,
        })
    }
}

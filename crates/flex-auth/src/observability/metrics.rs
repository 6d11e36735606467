//! Metrics definitions for Flex token authentication.
//!
//! All metrics follow Prometheus naming conventions:
//! - `flex_auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `result`: 3 values (hit, miss, error)
//! - `outcome` (introspection): 4 values (valid, invalid, expired, transport_error)
//! - `outcome` (resolution): 3 values (authenticated, deferred, error)
//!
//! Token values, account SIDs and identities never appear in labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Introspection buckets: IAM round trips are usually tens of ms,
        // the upper buckets catch requests running into the client timeout
        .set_buckets_for_metric(
            Matcher::Prefix("flex_auth_introspection".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set introspection buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Cache lookup result label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
    Error,
}

impl CacheLookup {
    fn as_str(self) -> &'static str {
        match self {
            CacheLookup::Hit => "hit",
            CacheLookup::Miss => "miss",
            CacheLookup::Error => "error",
        }
    }
}

/// Introspection outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrospectionOutcome {
    Valid,
    /// IAM rejected the token or answered with a non-success status.
    Invalid,
    /// IAM accepted the token but reported no expiry or one already past.
    Expired,
    TransportError,
}

impl IntrospectionOutcome {
    fn as_str(self) -> &'static str {
        match self {
            IntrospectionOutcome::Valid => "valid",
            IntrospectionOutcome::Invalid => "invalid",
            IntrospectionOutcome::Expired => "expired",
            IntrospectionOutcome::TransportError => "transport_error",
        }
    }
}

/// Resolution outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Authenticated,
    Deferred,
    Error,
}

impl ResolutionOutcome {
    fn as_str(self) -> &'static str {
        match self {
            ResolutionOutcome::Authenticated => "authenticated",
            ResolutionOutcome::Deferred => "deferred",
            ResolutionOutcome::Error => "error",
        }
    }
}

/// Record a claims cache lookup.
///
/// Metric: `flex_auth_cache_lookups_total`
/// Labels: `result`
pub fn record_cache_lookup(result: CacheLookup) {
    counter!("flex_auth_cache_lookups_total",
        "result" => result.as_str()
    )
    .increment(1);
}

/// Record the outcome of a remote introspection.
///
/// Metric: `flex_auth_introspections_total`
/// Labels: `outcome`
pub fn record_introspection(outcome: IntrospectionOutcome) {
    counter!("flex_auth_introspections_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record how long an introspection round trip took, whatever its result.
///
/// Metric: `flex_auth_introspection_duration_seconds`
pub fn record_introspection_duration(duration: Duration) {
    histogram!("flex_auth_introspection_duration_seconds").record(duration.as_secs_f64());
}

/// Record the final outcome of a token resolution.
///
/// Metric: `flex_auth_resolutions_total`
/// Labels: `outcome`
pub fn record_resolution(outcome: ResolutionOutcome) {
    counter!("flex_auth_resolutions_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

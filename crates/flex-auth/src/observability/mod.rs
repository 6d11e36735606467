//! Observability for the Flex auth service.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;

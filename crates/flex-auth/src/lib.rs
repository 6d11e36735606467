//! Flex Auth Library
//!
//! Bearer-token authentication for Twilio Flex. Opaque Flex tokens are
//! validated against the Twilio IAM introspection endpoint and the resulting
//! claims are cached so repeated requests skip the network.
//!
//! # Architecture
//!
//! ```text
//! middleware/auth.rs -> auth/chain.rs -> auth/resolver.rs -> cache/*.rs
//!                                                        -> services/identity_client.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - Claims, token resolution and authenticator chaining
//! - `cache` - Claims cache trait with in-memory and Redis stores
//! - `clock` - Wall-clock abstraction for expiry decisions
//! - `config` - Settings and service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Axum authentication middleware
//! - `observability` - Metrics definitions
//! - `routes` - Axum router setup and wiring
//! - `services` - Twilio IAM client
//! - `tasks` - Background maintenance tasks

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod services;
pub mod tasks;

//! Flex token authentication.
//!
//! - `claims` - claim vocabulary and the authenticated identity
//! - `resolver` - bearer token to identity resolution with caching
//! - `chain` - composition of several authenticators

pub mod chain;
pub mod claims;
pub mod resolver;

pub use chain::{AuthChain, Authenticator};
pub use claims::{claims_from_introspection, AuthenticatedIdentity, Claim, ClaimKind};
pub use resolver::{cache_expiry, AuthOutcome, FlexTokenResolver, MAX_CACHE_TIME_MINUTES};

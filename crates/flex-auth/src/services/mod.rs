//! Outbound service clients.

pub mod identity_client;

pub use identity_client::{IntrospectionResult, TokenIntrospector, TwilioIdentityClient};

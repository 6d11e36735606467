//! Test utilities for the Flex auth service.
//!
//! - `identity_server` - wiremock stand-in for the Twilio IAM token endpoint
//! - `server_harness` - spawns the real service against that stand-in

pub mod identity_server;
pub mod server_harness;

pub use identity_server::{FlexUser, MockIdentityServer, TEST_ACCOUNT_SID, TEST_AUTH_TOKEN};
pub use server_harness::TestFlexServer;

//! Mock Twilio IAM token validation endpoint.
//!
//! Wraps a wiremock `MockServer` that answers
//! `POST /v1/Accounts/{sid}/Tokens/validate` the way Twilio does.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use flex_auth::config::FlexAuthSettings;
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Account SID the mock server answers for.
pub const TEST_ACCOUNT_SID: &str = "AC00000000000000000000000000000000";

/// Auth token paired with [`TEST_ACCOUNT_SID`].
pub const TEST_AUTH_TOKEN: &str = "test-auth-token";

/// Identity returned for a valid token.
#[derive(Debug, Clone)]
pub struct FlexUser {
    pub email: String,
    pub worker_sid: String,
    pub roles: Vec<String>,
}

impl FlexUser {
    /// A user with the `agent` role.
    pub fn agent(email: &str, worker_sid: &str) -> Self {
        Self {
            email: email.to_string(),
            worker_sid: worker_sid.to_string(),
            roles: vec!["agent".to_string()],
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }
}

/// Mock Twilio IAM server.
pub struct MockIdentityServer {
    server: MockServer,
}

impl MockIdentityServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to use as `iam_base_url`.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Settings pointing at this server with the test credentials.
    pub fn settings(&self) -> FlexAuthSettings {
        FlexAuthSettings::new(TEST_ACCOUNT_SID, SecretString::from(TEST_AUTH_TOKEN))
            .with_iam_base_url(self.uri())
    }

    /// Path of the validation endpoint.
    pub fn validate_path() -> String {
        format!("/v1/Accounts/{TEST_ACCOUNT_SID}/Tokens/validate")
    }

    fn valid_response(user: &FlexUser, expiration: DateTime<Utc>) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "valid": true,
            "expiration": expiration.to_rfc3339_opts(SecondsFormat::Millis, true),
            "realm_user_id": user.email,
            "worker_sid": user.worker_sid,
            "roles": user.roles,
            "message": null,
            "identity": format!("{}_identity", user.worker_sid),
        }))
    }

    /// Answer `token` as valid for `user` until `expiration`.
    pub async fn mock_valid_token(&self, token: &str, user: &FlexUser, expiration: DateTime<Utc>) {
        Mock::given(method("POST"))
            .and(path(Self::validate_path()))
            .and(body_json(json!({ "Token": token })))
            .respond_with(Self::valid_response(user, expiration))
            .mount(&self.server)
            .await;
    }

    /// Like [`Self::mock_valid_token`], but verifies on drop that the token
    /// was introspected exactly `expected_calls` times.
    pub async fn mock_valid_token_expecting(
        &self,
        token: &str,
        user: &FlexUser,
        expiration: DateTime<Utc>,
        expected_calls: u64,
    ) {
        Mock::given(method("POST"))
            .and(path(Self::validate_path()))
            .and(body_json(json!({ "Token": token })))
            .respond_with(Self::valid_response(user, expiration))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// Answer `token` as valid for an hour.
    pub async fn mock_valid_token_for_an_hour(&self, token: &str, user: &FlexUser) {
        self.mock_valid_token(token, user, Utc::now() + Duration::hours(1))
            .await;
    }

    /// Answer `token` as invalid, the way IAM reports unknown tokens.
    pub async fn mock_invalid_token(&self, token: &str) {
        Mock::given(method("POST"))
            .and(path(Self::validate_path()))
            .and(body_json(json!({ "Token": token })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 20101,
                "valid": false,
                "expiration": null,
                "realm_user_id": null,
                "worker_sid": null,
                "roles": null,
                "message": "Invalid Access Token",
            })))
            .mount(&self.server)
            .await;
    }

    /// Answer every validation request with `status` and an empty body.
    pub async fn mock_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(Self::validate_path()))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Number of validation requests received so far.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}

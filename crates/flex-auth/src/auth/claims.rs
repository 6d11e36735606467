//! Flex identity claims.
//!
//! The claim vocabulary is closed: an identity carries at most one email, at
//! most one worker SID and any number of worker roles. [`ClaimKind`] names
//! serialize to the claim-type strings downstream consumers already match on
//! (`Email`, `WorkerSID`, `WorkerRole`).

use crate::services::identity_client::IntrospectionResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of an identity claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimKind {
    /// Email address of the Flex user (`realm_user_id` on the wire).
    /// Used as the identity's name.
    #[serde(rename = "Email")]
    Email,

    /// TaskRouter worker SID.
    #[serde(rename = "WorkerSID")]
    WorkerSid,

    /// Flex role, e.g. `agent` or `supervisor`. Used as the identity's role.
    #[serde(rename = "WorkerRole")]
    WorkerRole,
}

impl ClaimKind {
    /// Claim-type string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimKind::Email => "Email",
            ClaimKind::WorkerSid => "WorkerSID",
            ClaimKind::WorkerRole => "WorkerRole",
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single attested fact about a Flex identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub kind: ClaimKind,
    pub value: String,
}

impl Claim {
    pub fn new(kind: ClaimKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    fn has_value(&self) -> bool {
        !self.value.is_empty()
    }
}

/// Convert a validated introspection result into claims.
///
/// Emits Email, then WorkerSID, then one WorkerRole per role in the order the
/// identity service returned them. Absent or empty values are skipped.
pub fn claims_from_introspection(result: &IntrospectionResult) -> Vec<Claim> {
    let mut claims = Vec::with_capacity(2 + result.roles.len());

    if let Some(email) = result.email.as_deref().filter(|v| !v.is_empty()) {
        claims.push(Claim::new(ClaimKind::Email, email));
    }

    if let Some(worker_sid) = result.worker_sid.as_deref().filter(|v| !v.is_empty()) {
        claims.push(Claim::new(ClaimKind::WorkerSid, worker_sid));
    }

    claims.extend(
        result
            .roles
            .iter()
            .filter(|role| !role.is_empty())
            .map(|role| Claim::new(ClaimKind::WorkerRole, role.as_str())),
    );

    claims
}

/// Authenticated Flex principal.
///
/// Built fresh on every successful resolution, from cached or freshly
/// introspected claims. Handlers read it from request extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedIdentity {
    scheme: String,
    claims: Vec<Claim>,
}

impl AuthenticatedIdentity {
    /// Build an identity, dropping any claim with an empty value.
    pub fn new(scheme: impl Into<String>, claims: Vec<Claim>) -> Self {
        Self {
            scheme: scheme.into(),
            claims: claims.into_iter().filter(Claim::has_value).collect(),
        }
    }

    /// Authentication scheme that produced this identity.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Value of the first claim of `kind`.
    pub fn find(&self, kind: ClaimKind) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.value.as_str())
    }

    /// Identity name (the Email claim).
    pub fn name(&self) -> Option<&str> {
        self.find(ClaimKind::Email)
    }

    pub fn worker_sid(&self) -> Option<&str> {
        self.find(ClaimKind::WorkerSid)
    }

    /// Roles in the order they were granted.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.claims
            .iter()
            .filter(|c| c.kind == ClaimKind::WorkerRole)
            .map(|c| c.value.as_str())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles().any(|r| r == role)
    }
}

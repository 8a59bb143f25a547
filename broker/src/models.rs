// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;
use std::time::SystemTime;

use aws_credential_types::Credentials;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::constants::IDENTITY_PREFIX;
use crate::policy::PolicyDocument;

/// ARN of an identity that may be allowed to assume another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal(String);

impl Principal {
    pub fn new(arn: impl Into<String>) -> Self {
        Self(arn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform handle for an identity: its name and the ARN assigned on creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityRef {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone)]
pub struct EphemeralIdentity {
    pub handle: IdentityRef,
    pub trust_policy: PolicyDocument,
    pub permission_policy: PolicyDocument,
    pub policy_name: String,
    pub created_at: DateTime<Utc>,
}

impl EphemeralIdentity {
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn arn(&self) -> &str {
        &self.handle.arn
    }
}

#[derive(Debug, Clone)]
pub struct TrustGrant {
    pub grantee: Principal,
    pub target: IdentityRef,
    pub granted_at: DateTime<Utc>,
}

/// Short-lived credentials returned by the assume operation.
///
/// Secret material is zeroized on drop and redacted from `Debug`.
#[derive(Clone, ZeroizeOnDrop)]
pub struct CredentialSet {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    #[zeroize(skip)]
    pub expiration: DateTime<Utc>,
}

impl CredentialSet {
    pub fn is_expired(&self) -> bool {
        self.expiration <= Utc::now()
    }

    /// Environment variables understood by AWS SDKs and the AWS CLI.
    pub fn env_vars(&self) -> [(&'static str, String); 4] {
        [
            ("AWS_ACCESS_KEY_ID", self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY", self.secret_access_key.clone()),
            ("AWS_SESSION_TOKEN", self.session_token.clone()),
            ("AWS_CREDENTIAL_EXPIRATION", self.expiration.to_rfc3339()),
        ]
    }
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("access_key_id", &"[REDACTED]")
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl From<&CredentialSet> for Credentials {
    fn from(credential: &CredentialSet) -> Self {
        Credentials::new(
            credential.access_key_id.clone(),
            credential.secret_access_key.clone(),
            Some(credential.session_token.clone()),
            Some(SystemTime::from(credential.expiration)),
            IDENTITY_PREFIX,
        )
    }
}

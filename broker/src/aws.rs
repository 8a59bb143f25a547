// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! AWS IAM/STS implementation of [`IdentityPlatform`].
//!
//! Identities are IAM roles, permission documents are inline role policies and
//! credentials come from `sts:AssumeRole`. SDK error codes are mapped onto
//! [`PlatformErrorKind`] so the broker can tell propagation lag ("AccessDenied")
//! and already-deleted resources ("NoSuchEntity") apart from real failures.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chrono::{DateTime, Utc};

use crate::constants::{IDENTITY_DESCRIPTION, MIN_ROLE_MAX_SESSION};
use crate::errors::{PlatformError, PlatformErrorKind};
use crate::models::{CredentialSet, IdentityRef, Principal};
use crate::platform::IdentityPlatform;
use crate::policy::PolicyDocument;

pub struct AwsPlatform {
    config: SdkConfig,
    iam: aws_sdk_iam::Client,
    sts: aws_sdk_sts::Client,
}

impl AwsPlatform {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            config: config.clone(),
            iam: aws_sdk_iam::Client::new(config),
            sts: aws_sdk_sts::Client::new(config),
        }
    }

    /// Loads the default credential chain, optionally pinned to a region or profile.
    pub async fn load(region: Option<String>, profile: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;
        Self::new(&config)
    }

    /// Principal of the credentials the broker itself runs with.
    #[tracing::instrument(skip(self))]
    pub async fn caller_principal(&self) -> Result<Principal, PlatformError> {
        let output = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| classify("get_caller_identity", e))?;
        let arn = output.arn().ok_or_else(|| {
            PlatformError::new("get_caller_identity", PlatformErrorKind::Other, "no ARN returned")
        })?;

        Ok(principal_from_caller_arn(arn))
    }

    /// Calls `sts:GetCallerIdentity` with vended credentials and returns the ARN seen.
    #[tracing::instrument(skip(self, credentials))]
    pub async fn verify_credentials(
        &self,
        credentials: &CredentialSet,
    ) -> Result<String, PlatformError> {
        let config = aws_sdk_sts::config::Builder::from(&self.config)
            .credentials_provider(Credentials::from(credentials))
            .build();
        let output = aws_sdk_sts::Client::from_conf(config)
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| classify("verify_credentials", e))?;

        Ok(output.arn().unwrap_or_default().to_string())
    }
}

/// Trust policies name roles, not role sessions: an assumed-role session ARN
/// (`arn:aws:sts::<account>:assumed-role/<role>/<session>`) maps to its role.
pub fn principal_from_caller_arn(arn: &str) -> Principal {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if let [_, partition, "sts", _, account, resource] = parts.as_slice()
        && let Some(rest) = resource.strip_prefix("assumed-role/")
        && let Some((role, _session)) = rest.split_once('/')
    {
        return Principal::new(format!("arn:{partition}:iam::{account}:role/{role}"));
    }
    Principal::new(arn)
}

fn classify<E>(operation: &'static str, err: SdkError<E>) -> PlatformError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let kind = match err.code() {
        Some("NoSuchEntity") => PlatformErrorKind::NotFound,
        Some("AccessDenied" | "AccessDeniedException") => PlatformErrorKind::AccessDenied,
        Some("DeleteConflict" | "EntityAlreadyExists" | "ConcurrentModification") => {
            PlatformErrorKind::Conflict
        }
        Some("LimitExceeded") => PlatformErrorKind::LimitExceeded,
        Some(
            "MalformedPolicyDocument" | "ValidationError" | "InvalidInput" | "PackedPolicyTooLarge",
        ) => PlatformErrorKind::InvalidInput,
        Some("Throttling" | "ThrottlingException") => PlatformErrorKind::Throttled,
        _ => PlatformErrorKind::Other,
    };
    PlatformError::new(operation, kind, DisplayErrorContext(&err).to_string())
}

fn encode(operation: &'static str, document: &PolicyDocument) -> Result<String, PlatformError> {
    serde_json::to_string(document)
        .map_err(|e| PlatformError::new(operation, PlatformErrorKind::InvalidInput, e.to_string()))
}

fn seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl IdentityPlatform for AwsPlatform {
    #[tracing::instrument(skip(self, trust_policy))]
    async fn create_identity(
        &self,
        name: &str,
        trust_policy: &PolicyDocument,
        max_session: Duration,
    ) -> Result<IdentityRef, PlatformError> {
        let output = self
            .iam
            .create_role()
            .role_name(name)
            .assume_role_policy_document(encode("create_identity", trust_policy)?)
            .description(IDENTITY_DESCRIPTION)
            .max_session_duration(seconds(max_session.max(MIN_ROLE_MAX_SESSION)))
            .send()
            .await
            .map_err(|e| classify("create_identity", e))?;

        let role = output.role().ok_or_else(|| {
            PlatformError::new("create_identity", PlatformErrorKind::Other, "no role returned")
        })?;

        Ok(IdentityRef {
            name: role.role_name().to_string(),
            arn: role.arn().to_string(),
        })
    }

    #[tracing::instrument(skip(self, document))]
    async fn put_inline_policy(
        &self,
        identity: &IdentityRef,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> Result<(), PlatformError> {
        self.iam
            .put_role_policy()
            .role_name(&identity.name)
            .policy_name(policy_name)
            .policy_document(encode("put_inline_policy", document)?)
            .send()
            .await
            .map_err(|e| classify("put_inline_policy", e))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, document))]
    async fn update_trust_policy(
        &self,
        identity: &IdentityRef,
        document: &PolicyDocument,
    ) -> Result<(), PlatformError> {
        self.iam
            .update_assume_role_policy()
            .role_name(&identity.name)
            .policy_document(encode("update_trust_policy", document)?)
            .send()
            .await
            .map_err(|e| classify("update_trust_policy", e))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_inline_policy(
        &self,
        identity: &IdentityRef,
        policy_name: &str,
    ) -> Result<(), PlatformError> {
        self.iam
            .delete_role_policy()
            .role_name(&identity.name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| classify("delete_inline_policy", e))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_identity(&self, identity: &IdentityRef) -> Result<(), PlatformError> {
        self.iam
            .delete_role()
            .role_name(&identity.name)
            .send()
            .await
            .map_err(|e| classify("delete_identity", e))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn assume_identity(
        &self,
        identity: &IdentityRef,
        session_name: &str,
        duration: Duration,
    ) -> Result<CredentialSet, PlatformError> {
        let output = self
            .sts
            .assume_role()
            .role_arn(&identity.arn)
            .role_session_name(session_name)
            .duration_seconds(seconds(duration))
            .send()
            .await
            .map_err(|e| classify("assume_identity", e))?;

        let credentials = output.credentials().ok_or_else(|| {
            PlatformError::new("assume_identity", PlatformErrorKind::Other, "no credentials returned")
        })?;
        let expiration = credentials.expiration();
        let expiration = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| {
                PlatformError::new("assume_identity", PlatformErrorKind::Other, "invalid expiration")
            })?;

        Ok(CredentialSet {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn list_identities(&self, name_prefix: &str) -> Result<Vec<String>, PlatformError> {
        let mut roles = self.iam.list_roles().into_paginator().items().send();
        let mut names = Vec::new();

        while let Some(role) = roles.next().await {
            let role = role.map_err(|e| classify("list_identities", e))?;
            if role.role_name().starts_with(name_prefix) {
                names.push(role.role_name().to_string());
            }
        }

        Ok(names)
    }
}

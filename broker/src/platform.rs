// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::PlatformError;
use crate::models::{CredentialSet, IdentityRef};
use crate::policy::PolicyDocument;

/// The identity and token service the broker provisions against.
///
/// Implemented by [`crate::aws::AwsPlatform`] for AWS IAM/STS and by
/// [`crate::simulated::SimulatedPlatform`] for tests.
#[async_trait]
pub trait IdentityPlatform: Send + Sync {
    async fn create_identity(
        &self,
        name: &str,
        trust_policy: &PolicyDocument,
        max_session: Duration,
    ) -> Result<IdentityRef, PlatformError>;

    async fn put_inline_policy(
        &self,
        identity: &IdentityRef,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> Result<(), PlatformError>;

    async fn update_trust_policy(
        &self,
        identity: &IdentityRef,
        document: &PolicyDocument,
    ) -> Result<(), PlatformError>;

    async fn delete_inline_policy(
        &self,
        identity: &IdentityRef,
        policy_name: &str,
    ) -> Result<(), PlatformError>;

    async fn delete_identity(&self, identity: &IdentityRef) -> Result<(), PlatformError>;

    async fn assume_identity(
        &self,
        identity: &IdentityRef,
        session_name: &str,
        duration: Duration,
    ) -> Result<CredentialSet, PlatformError>;

    /// Names of existing identities starting with `name_prefix`.
    async fn list_identities(&self, name_prefix: &str) -> Result<Vec<String>, PlatformError>;
}

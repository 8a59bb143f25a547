// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::errors::BrokerError;
use crate::models::EphemeralIdentity;
use crate::naming::NameGenerator;
use crate::platform::IdentityPlatform;
use crate::policy::PolicyDocument;
use crate::stack::{ResourceKind, ResourceStack};

/// Creates the ephemeral identity and attaches the caller's permissions inline.
pub struct RoleProvisioner<P: ?Sized> {
    platform: Arc<P>,
    names: Arc<NameGenerator>,
    policy_name: String,
}

impl<P: IdentityPlatform + ?Sized + 'static> RoleProvisioner<P> {
    pub fn new(platform: Arc<P>, names: Arc<NameGenerator>, policy_name: impl Into<String>) -> Self {
        Self {
            platform,
            names,
            policy_name: policy_name.into(),
        }
    }

    /// Provisions a uniquely named identity and registers its teardown.
    ///
    /// The identity's deletion is registered as soon as it exists and the
    /// inline policy's deletion right before the attach, so the unwind removes
    /// the policy first. A failed attach leaves both on the stack; deleting a
    /// policy that never landed counts as released.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::ValidationError`] if the permission document is malformed
    ///   (checked before any platform call)
    /// - [`BrokerError::ProvisioningError`] if the platform rejects a step
    #[tracing::instrument(skip_all)]
    pub async fn provision(
        &self,
        stack: &mut ResourceStack,
        trust_policy: &PolicyDocument,
        permission_policy: &PolicyDocument,
        max_session: Duration,
    ) -> Result<EphemeralIdentity, BrokerError> {
        permission_policy.validate_permissions()?;

        let name = self.names.next_name();
        let handle = self
            .platform
            .create_identity(&name, trust_policy, max_session)
            .await
            .map_err(|source| BrokerError::ProvisioningError {
                operation: "create identity",
                name: name.clone(),
                source,
            })?;

        tracing::info!("[broker] created identity {} ({})", handle.name, handle.arn);

        stack.push(ResourceKind::Identity, handle.name.clone(), {
            let platform = self.platform.clone();
            let handle = handle.clone();
            move || {
                let platform = platform.clone();
                let handle = handle.clone();
                async move { platform.delete_identity(&handle).await }
            }
        });

        // registered before the attempt: the put may land even when the call errors
        stack.push(
            ResourceKind::InlinePolicy,
            format!("{}/{}", handle.name, self.policy_name),
            {
                let platform = self.platform.clone();
                let handle = handle.clone();
                let policy_name = self.policy_name.clone();
                move || {
                    let platform = platform.clone();
                    let handle = handle.clone();
                    let policy_name = policy_name.clone();
                    async move { platform.delete_inline_policy(&handle, &policy_name).await }
                }
            },
        );

        self.platform
            .put_inline_policy(&handle, &self.policy_name, permission_policy)
            .await
            .map_err(|source| BrokerError::ProvisioningError {
                operation: "attach inline policy",
                name: name.clone(),
                source,
            })?;

        tracing::info!(
            "[broker] attached inline policy {} to {}",
            self.policy_name,
            handle.name
        );

        Ok(EphemeralIdentity {
            handle,
            trust_policy: trust_policy.clone(),
            permission_policy: permission_policy.clone(),
            policy_name: self.policy_name.clone(),
            created_at: Utc::now(),
        })
    }
}

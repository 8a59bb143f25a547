// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;

use chrono::Utc;

use crate::errors::BrokerError;
use crate::models::{EphemeralIdentity, Principal, TrustGrant};
use crate::platform::IdentityPlatform;
use crate::policy::PolicyDocument;
use crate::stack::{ResourceKind, ResourceStack};

/// Lets an existing principal assume the ephemeral identity for the scope's lifetime.
pub struct TrustLinker<P: ?Sized> {
    platform: Arc<P>,
}

impl<P: IdentityPlatform + ?Sized + 'static> TrustLinker<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }

    /// Replaces the identity's trust policy with one naming `caller`.
    ///
    /// The registered cleanup resets the trust policy to deny-all rather than
    /// restoring what was there before.
    #[tracing::instrument(skip(self, stack, identity), fields(identity = identity.name()))]
    pub async fn grant(
        &self,
        stack: &mut ResourceStack,
        caller: &Principal,
        identity: &EphemeralIdentity,
    ) -> Result<TrustGrant, BrokerError> {
        let target = identity.handle.clone();

        self.platform
            .update_trust_policy(&target, &PolicyDocument::trust(caller))
            .await
            .map_err(|source| BrokerError::ProvisioningError {
                operation: "grant trust",
                name: target.name.clone(),
                source,
            })?;

        tracing::info!("[broker] {} may now assume {}", caller, target.name);

        stack.push(ResourceKind::TrustGrant, format!("{} -> {}", caller, target.name), {
            let platform = self.platform.clone();
            let target = target.clone();
            move || {
                let platform = platform.clone();
                let target = target.clone();
                async move {
                    platform
                        .update_trust_policy(&target, &PolicyDocument::deny_all_trust())
                        .await
                }
            }
        });

        Ok(TrustGrant {
            grantee: caller.clone(),
            target,
            granted_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::constants::INLINE_POLICY_NAME;
    use crate::naming::NameGenerator;
    use crate::provisioner::RoleProvisioner;
    use crate::policy::Statement;
    use crate::simulated::{Faults, SimulatedPlatform};

    async fn provisioned(
        platform: &Arc<SimulatedPlatform>,
        stack: &mut ResourceStack,
    ) -> EphemeralIdentity {
        let names = NameGenerator::new("trust", fastrand::Rng::with_seed(3)).unwrap();
        RoleProvisioner::new(platform.clone(), Arc::new(names), INLINE_POLICY_NAME)
            .provision(
                stack,
                &PolicyDocument::deny_all_trust(),
                &PolicyDocument::new(vec![Statement::allow(&["s3:ListBucket"], &["*"])]),
                Duration::from_secs(3600),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_grant_then_revoke_on_unwind() {
        let admin = SimulatedPlatform::admin_principal();
        let platform = Arc::new(SimulatedPlatform::new(admin.clone()));
        let mut stack = ResourceStack::new();
        let identity = provisioned(&platform, &mut stack).await;

        let grant = TrustLinker::new(platform.clone())
            .grant(&mut stack, &admin, &identity)
            .await
            .unwrap();

        assert_eq!(grant.grantee, admin);
        assert_eq!(grant.target, identity.handle);
        assert!(platform.trust_policy(identity.name()).await.unwrap().trusts(&admin));
        assert_eq!(stack.registered().last().unwrap().0, ResourceKind::TrustGrant);

        stack.unwind_all().await.unwrap();
        assert!(platform.identity_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_revoke_resets_to_deny_all() {
        let admin = SimulatedPlatform::admin_principal();
        let platform = Arc::new(SimulatedPlatform::new(admin.clone()));
        let mut stack = ResourceStack::new();
        let identity = provisioned(&platform, &mut stack).await;

        let mut trust_scope = ResourceStack::new();
        TrustLinker::new(platform.clone())
            .grant(&mut trust_scope, &admin, &identity)
            .await
            .unwrap();
        trust_scope.unwind_all().await.unwrap();

        let trust = platform.trust_policy(identity.name()).await.unwrap();
        assert_eq!(trust, PolicyDocument::deny_all_trust());

        stack.unwind_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_grant_leaves_identity_cleanup_in_place() {
        let admin = SimulatedPlatform::admin_principal();
        let platform = Arc::new(SimulatedPlatform::new(admin.clone()));
        let mut stack = ResourceStack::new();
        let identity = provisioned(&platform, &mut stack).await;
        platform
            .set_faults(Faults {
                reject_trust_update: true,
                ..Faults::default()
            })
            .await;

        let err = TrustLinker::new(platform.clone())
            .grant(&mut stack, &admin, &identity)
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::ProvisioningError { operation: "grant trust", .. }));
        assert_eq!(stack.len(), 2);

        stack.unwind_all().await.unwrap();
        assert!(platform.identity_names().await.is_empty());
    }
}

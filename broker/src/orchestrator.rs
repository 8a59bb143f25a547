// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Scoped temporary credentials.
//!
//! [`Broker::with_temporary_credentials`] runs the whole lifecycle inside one
//! [`ResourceStack`]:
//!
//! 1. [`RoleProvisioner`] creates a uniquely named identity with a deny-all
//!    trust policy and attaches the permission document inline
//! 2. [`TrustLinker`] lets the caller principal assume it
//! 3. [`ReadinessWaiter`] waits out propagation
//! 4. [`CredentialVendor`] assumes the identity
//! 5. the caller's work runs with the credentials
//! 6. the stack unwinds: trust revoked, inline policy deleted, identity deleted
//!
//! Step 6 runs exactly once whatever happened before it. If the returned
//! future is dropped early, the stack's `Drop` releases the resources in the
//! background instead.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::configuration::{BrokerConfig, validate_session_duration};
use crate::errors::BrokerError;
use crate::models::{CredentialSet, Principal};
use crate::naming::NameGenerator;
use crate::platform::IdentityPlatform;
use crate::policy::PolicyDocument;
use crate::provisioner::RoleProvisioner;
use crate::readiness::ReadinessWaiter;
use crate::stack::ResourceStack;
use crate::trust::TrustLinker;
use crate::vendor::CredentialVendor;

pub struct Broker<P: ?Sized> {
    platform: Arc<P>,
    names: Arc<NameGenerator>,
    config: BrokerConfig,
}

impl<P: IdentityPlatform + ?Sized + 'static> Broker<P> {
    /// Creates a broker drawing identity names from an OS-seeded generator.
    pub fn new(platform: Arc<P>, config: BrokerConfig) -> Result<Self, BrokerError> {
        Self::with_rng(platform, config, fastrand::Rng::new())
    }

    /// Creates a broker with an explicit random source for identity names.
    pub fn with_rng(
        platform: Arc<P>,
        config: BrokerConfig,
        rng: fastrand::Rng,
    ) -> Result<Self, BrokerError> {
        config.validate()?;
        let names = Arc::new(NameGenerator::new(config.name_prefix.clone(), rng)?);
        Ok(Self {
            platform,
            names,
            config,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    /// Runs `work` with credentials for a temporary identity holding
    /// `permission_policy`, assumable by `caller` for `session_duration`.
    ///
    /// Every resource created on the way is released before this returns, on
    /// success and on every error path. Cleanup failures never replace the
    /// error that ended the scope; they are attached to it.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::ValidationError`] for bad input, before anything is created
    /// - [`BrokerError::ProvisioningError`] if the identity, policy or trust grant is rejected
    /// - [`BrokerError::PropagationTimeout`] if the identity never became assumable
    /// - [`BrokerError::WorkError`] if `work` failed
    /// - [`BrokerError::CleanupError`] if only the teardown failed
    /// - [`BrokerError::WithCleanupFailures`] if both the scope and its teardown failed
    pub async fn with_temporary_credentials<T, F, Fut>(
        &self,
        caller: &Principal,
        permission_policy: &PolicyDocument,
        session_duration: Duration,
        work: F,
    ) -> Result<T, BrokerError>
    where
        F: FnOnce(CredentialSet) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.with_temporary_credentials_until(
            caller,
            permission_policy,
            session_duration,
            std::future::pending(),
            work,
        )
        .await
    }

    /// Like [`Broker::with_temporary_credentials`], but abandons the scope as
    /// soon as `cancel` completes.
    ///
    /// Whatever step was in flight (provisioning, the settle delay, the assume
    /// retries or `work`) is dropped and the stack is unwound before this
    /// returns, so the cleanup does not depend on the runtime outliving it.
    ///
    /// # Errors
    ///
    /// As [`Broker::with_temporary_credentials`], plus [`BrokerError::Cancelled`]
    /// when `cancel` won the race.
    #[tracing::instrument(skip(self, permission_policy, cancel, work))]
    pub async fn with_temporary_credentials_until<T, C, F, Fut>(
        &self,
        caller: &Principal,
        permission_policy: &PolicyDocument,
        session_duration: Duration,
        cancel: C,
        work: F,
    ) -> Result<T, BrokerError>
    where
        C: Future<Output = ()>,
        F: FnOnce(CredentialSet) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        validate_session_duration(session_duration)?;
        permission_policy.validate_permissions()?;

        let mut stack = ResourceStack::new();
        let outcome = tokio::select! {
            outcome = self.run_scope(&mut stack, caller, permission_policy, session_duration, work) => outcome,
            () = cancel => {
                tracing::warn!("[broker] scope cancelled, releasing what it created");
                Err(BrokerError::Cancelled)
            }
        };
        let cleanup = stack.unwind_all().await;

        match (outcome, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup)) => Err(BrokerError::CleanupError(cleanup)),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup)) => Err(err.with_cleanup(cleanup)),
        }
    }

    async fn run_scope<T, F, Fut>(
        &self,
        stack: &mut ResourceStack,
        caller: &Principal,
        permission_policy: &PolicyDocument,
        session_duration: Duration,
        work: F,
    ) -> Result<T, BrokerError>
    where
        F: FnOnce(CredentialSet) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let identity = RoleProvisioner::new(
            self.platform.clone(),
            self.names.clone(),
            self.config.policy_name.clone(),
        )
        .provision(
            stack,
            &PolicyDocument::deny_all_trust(),
            permission_policy,
            session_duration,
        )
        .await?;

        TrustLinker::new(self.platform.clone())
            .grant(stack, caller, &identity)
            .await?;

        ReadinessWaiter::new(self.config.settle_delay)
            .await_usable()
            .await;

        let credentials = CredentialVendor::new(self.platform.clone(), self.config.retry)
            .vend(caller, &identity, session_duration)
            .await?;

        tracing::info!("[broker] handing credentials for {} to caller", identity.arn());

        work(credentials).await.map_err(BrokerError::WorkError)
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;
use std::time::Duration;

use crate::configuration::RetryPolicy;
use crate::errors::BrokerError;
use crate::models::{CredentialSet, EphemeralIdentity, Principal};
use crate::platform::IdentityPlatform;

/// Assumes the ephemeral identity and returns its short-lived credentials.
pub struct CredentialVendor<P: ?Sized> {
    platform: Arc<P>,
    retry: RetryPolicy,
}

impl<P: IdentityPlatform + ?Sized> CredentialVendor<P> {
    pub fn new(platform: Arc<P>, retry: RetryPolicy) -> Self {
        Self { platform, retry }
    }

    /// Performs the assume operation, retrying only on propagation lag.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::PropagationTimeout`] if every attempt was denied
    /// - [`BrokerError::PlatformError`] for any other failure, without retrying
    #[tracing::instrument(skip(self, identity), fields(identity = identity.name()))]
    pub async fn vend(
        &self,
        caller: &Principal,
        identity: &EphemeralIdentity,
        session_duration: Duration,
    ) -> Result<CredentialSet, BrokerError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match self
                .platform
                .assume_identity(&identity.handle, identity.name(), session_duration)
                .await
            {
                Ok(credentials) => {
                    tracing::info!(
                        "[broker] {} assumed {} on attempt {}, expires {}",
                        caller,
                        identity.name(),
                        attempt,
                        credentials.expiration
                    );
                    return Ok(credentials);
                }
                Err(err) if err.is_propagation_lag() => err,
                Err(err) => return Err(BrokerError::PlatformError(err)),
            };

            if attempt >= max_attempts {
                return Err(BrokerError::PropagationTimeout {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.retry.backoff(attempt);
            tracing::warn!(
                "[broker] assume attempt {}/{} denied, retrying in {:#?}: {}",
                attempt,
                max_attempts,
                delay,
                err
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::errors::PlatformErrorKind;
    use crate::models::IdentityRef;
    use crate::policy::{PolicyDocument, Statement};
    use crate::simulated::{Faults, PlatformCall, SimulatedPlatform};

    fn retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    /// A trusted identity created directly on the platform.
    async fn trusted_identity(platform: &SimulatedPlatform, caller: &Principal) -> EphemeralIdentity {
        let handle: IdentityRef = platform
            .create_identity("vend-target", &PolicyDocument::trust(caller), Duration::from_secs(3600))
            .await
            .unwrap();
        EphemeralIdentity {
            handle,
            trust_policy: PolicyDocument::trust(caller),
            permission_policy: PolicyDocument::new(vec![Statement::allow(&["*"], &["*"])]),
            policy_name: "p".to_string(),
            created_at: Utc::now(),
        }
    }

    async fn assume_calls(platform: &SimulatedPlatform) -> usize {
        platform
            .calls()
            .await
            .iter()
            .filter(|c| matches!(c, PlatformCall::AssumeIdentity(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_n_denials() {
        let caller = SimulatedPlatform::admin_principal();
        let platform = Arc::new(SimulatedPlatform::with_faults(
            caller.clone(),
            Faults {
                deny_assume_attempts: 3,
                ..Faults::default()
            },
        ));
        let identity = trusted_identity(&platform, &caller).await;

        let credentials = CredentialVendor::new(platform.clone(), retry(4))
            .vend(&caller, &identity, Duration::from_secs(900))
            .await
            .unwrap();

        assert!(!credentials.is_expired());
        assert_eq!(assume_calls(&platform).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_raise_propagation_timeout() {
        let caller = SimulatedPlatform::admin_principal();
        let platform = Arc::new(SimulatedPlatform::with_faults(
            caller.clone(),
            Faults {
                deny_assume_attempts: 4,
                ..Faults::default()
            },
        ));
        let identity = trusted_identity(&platform, &caller).await;

        let err = CredentialVendor::new(platform.clone(), retry(4))
            .vend(&caller, &identity, Duration::from_secs(900))
            .await
            .unwrap_err();

        match err {
            BrokerError::PropagationTimeout { attempts, last } => {
                assert_eq!(attempts, 4);
                assert_eq!(last.kind, PlatformErrorKind::AccessDenied);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(assume_calls(&platform).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let caller = SimulatedPlatform::admin_principal();
        let platform = Arc::new(SimulatedPlatform::with_faults(
            caller.clone(),
            Faults {
                reject_assume: Some(PlatformErrorKind::InvalidInput),
                ..Faults::default()
            },
        ));
        let identity = trusted_identity(&platform, &caller).await;

        let err = CredentialVendor::new(platform.clone(), retry(5))
            .vend(&caller, &identity, Duration::from_secs(900))
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::PlatformError(ref e) if e.kind == PlatformErrorKind::InvalidInput));
        assert_eq!(assume_calls(&platform).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_is_respected() {
        let caller = SimulatedPlatform::admin_principal();
        let platform = Arc::new(SimulatedPlatform::with_faults(
            caller.clone(),
            Faults {
                deny_assume_attempts: 2,
                ..Faults::default()
            },
        ));
        let identity = trusted_identity(&platform, &caller).await;
        let started = tokio::time::Instant::now();

        CredentialVendor::new(platform.clone(), retry(3))
            .vend(&caller, &identity, Duration::from_secs(900))
            .await
            .unwrap();

        // 2s after the first denial, 4s after the second
        assert!(started.elapsed() >= Duration::from_secs(6));
    }
}

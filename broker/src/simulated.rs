// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! In-memory identity platform.
//!
//! [`SimulatedPlatform`] behaves like IAM/STS for the operations the broker
//! uses: role names are unique, a role with inline policies cannot be deleted,
//! assume is checked against the trust policy, and vended credentials are
//! enforced against the role's inline policies by [`SimulatedPlatform::authorize`].
//! [`Faults`] injects the failures the broker has to survive.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::errors::{PlatformError, PlatformErrorKind};
use crate::models::{CredentialSet, IdentityRef, Principal};
use crate::platform::IdentityPlatform;
use crate::policy::PolicyDocument;

pub const SIMULATED_ACCOUNT_ID: &str = "123456789012";

/// Failures to inject into the simulated platform.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub reject_create: bool,
    pub reject_put_policy: bool,
    /// Store the inline policy, then answer as if the call had failed.
    pub lose_put_policy_response: bool,
    pub reject_trust_update: bool,
    /// Number of assume calls answered with access denied before succeeding.
    pub deny_assume_attempts: u32,
    /// Answer every assume call with this error kind.
    pub reject_assume: Option<PlatformErrorKind>,
    pub reject_delete_identity: bool,
}

/// One recorded platform call, by identity name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    CreateIdentity(String),
    PutInlinePolicy(String, String),
    UpdateTrustPolicy(String),
    DeleteInlinePolicy(String, String),
    DeleteIdentity(String),
    AssumeIdentity(String),
}

#[derive(Debug)]
struct SimulatedRole {
    arn: String,
    trust_policy: PolicyDocument,
    inline_policies: BTreeMap<String, PolicyDocument>,
}

#[derive(Debug)]
struct Session {
    role_name: String,
    expiration: chrono::DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    roles: BTreeMap<String, SimulatedRole>,
    sessions: HashMap<String, Session>,
    faults: Faults,
    calls: Vec<PlatformCall>,
    issued: u64,
}

#[derive(Debug)]
pub struct SimulatedPlatform {
    caller: Principal,
    state: Mutex<State>,
}

impl SimulatedPlatform {
    /// A platform whose API calls are made as `caller`.
    pub fn new(caller: Principal) -> Self {
        Self::with_faults(caller, Faults::default())
    }

    pub fn with_faults(caller: Principal, faults: Faults) -> Self {
        Self {
            caller,
            state: Mutex::new(State {
                faults,
                ..State::default()
            }),
        }
    }

    /// Default caller: an administrator role in the simulated account.
    pub fn admin_principal() -> Principal {
        Principal::new(format!("arn:aws:iam::{SIMULATED_ACCOUNT_ID}:role/admin"))
    }

    pub async fn set_faults(&self, faults: Faults) {
        self.state.lock().await.faults = faults;
    }

    pub async fn calls(&self) -> Vec<PlatformCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn identity_names(&self) -> Vec<String> {
        self.state.lock().await.roles.keys().cloned().collect()
    }

    pub async fn inline_policy_names(&self, identity_name: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .roles
            .get(identity_name)
            .map(|r| r.inline_policies.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn trust_policy(&self, identity_name: &str) -> Option<PolicyDocument> {
        let state = self.state.lock().await;
        state.roles.get(identity_name).map(|r| r.trust_policy.clone())
    }

    /// Checks whether `credentials` may perform `action` on `resource`.
    pub async fn authorize(
        &self,
        credentials: &CredentialSet,
        action: &str,
        resource: &str,
    ) -> Result<(), PlatformError> {
        let state = self.state.lock().await;
        let denied = |message: String| {
            PlatformError::new("authorize", PlatformErrorKind::AccessDenied, message)
        };

        let session = state
            .sessions
            .get(&credentials.access_key_id)
            .filter(|s| s.expiration > Utc::now())
            .ok_or_else(|| denied("the security token included in the request is invalid".into()))?;
        let role = state
            .roles
            .get(&session.role_name)
            .ok_or_else(|| denied(format!("role {} no longer exists", session.role_name)))?;

        let documents: Vec<PolicyDocument> = role.inline_policies.values().cloned().collect();
        if PolicyDocument::evaluate_all(&documents, action, resource).is_allowed() {
            Ok(())
        } else {
            Err(denied(format!(
                "{} is not authorized to perform {action} on {resource}",
                role.arn
            )))
        }
    }
}

fn not_found(operation: &'static str, name: &str) -> PlatformError {
    PlatformError::new(
        operation,
        PlatformErrorKind::NotFound,
        format!("the role with name {name} cannot be found"),
    )
}

fn injected(operation: &'static str, kind: PlatformErrorKind) -> PlatformError {
    PlatformError::new(operation, kind, "injected failure")
}

#[async_trait]
impl IdentityPlatform for SimulatedPlatform {
    async fn create_identity(
        &self,
        name: &str,
        trust_policy: &PolicyDocument,
        _max_session: Duration,
    ) -> Result<IdentityRef, PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(PlatformCall::CreateIdentity(name.to_string()));
        if state.faults.reject_create {
            return Err(injected("create_identity", PlatformErrorKind::LimitExceeded));
        }
        if state.roles.contains_key(name) {
            return Err(PlatformError::new(
                "create_identity",
                PlatformErrorKind::Conflict,
                format!("role with name {name} already exists"),
            ));
        }

        let arn = format!("arn:aws:iam::{SIMULATED_ACCOUNT_ID}:role/{name}");
        state.roles.insert(
            name.to_string(),
            SimulatedRole {
                arn: arn.clone(),
                trust_policy: trust_policy.clone(),
                inline_policies: BTreeMap::new(),
            },
        );
        Ok(IdentityRef {
            name: name.to_string(),
            arn,
        })
    }

    async fn put_inline_policy(
        &self,
        identity: &IdentityRef,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(PlatformCall::PutInlinePolicy(
            identity.name.clone(),
            policy_name.to_string(),
        ));
        if state.faults.reject_put_policy {
            return Err(injected("put_inline_policy", PlatformErrorKind::InvalidInput));
        }
        let role = state
            .roles
            .get_mut(&identity.name)
            .ok_or_else(|| not_found("put_inline_policy", &identity.name))?;
        role.inline_policies
            .insert(policy_name.to_string(), document.clone());
        if state.faults.lose_put_policy_response {
            return Err(injected("put_inline_policy", PlatformErrorKind::Other));
        }
        Ok(())
    }

    async fn update_trust_policy(
        &self,
        identity: &IdentityRef,
        document: &PolicyDocument,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(PlatformCall::UpdateTrustPolicy(identity.name.clone()));
        if state.faults.reject_trust_update {
            return Err(injected("update_trust_policy", PlatformErrorKind::InvalidInput));
        }
        let role = state
            .roles
            .get_mut(&identity.name)
            .ok_or_else(|| not_found("update_trust_policy", &identity.name))?;
        role.trust_policy = document.clone();
        Ok(())
    }

    async fn delete_inline_policy(
        &self,
        identity: &IdentityRef,
        policy_name: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(PlatformCall::DeleteInlinePolicy(
            identity.name.clone(),
            policy_name.to_string(),
        ));
        let role = state
            .roles
            .get_mut(&identity.name)
            .ok_or_else(|| not_found("delete_inline_policy", &identity.name))?;
        role.inline_policies
            .remove(policy_name)
            .map(|_| ())
            .ok_or_else(|| {
                PlatformError::new(
                    "delete_inline_policy",
                    PlatformErrorKind::NotFound,
                    format!("the role policy with name {policy_name} cannot be found"),
                )
            })
    }

    async fn delete_identity(&self, identity: &IdentityRef) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(PlatformCall::DeleteIdentity(identity.name.clone()));
        if state.faults.reject_delete_identity {
            return Err(injected("delete_identity", PlatformErrorKind::Other));
        }
        let role = state
            .roles
            .get(&identity.name)
            .ok_or_else(|| not_found("delete_identity", &identity.name))?;
        if !role.inline_policies.is_empty() {
            return Err(PlatformError::new(
                "delete_identity",
                PlatformErrorKind::Conflict,
                "cannot delete entity, must delete policies first",
            ));
        }
        state.roles.remove(&identity.name);
        Ok(())
    }

    async fn assume_identity(
        &self,
        identity: &IdentityRef,
        _session_name: &str,
        duration: Duration,
    ) -> Result<CredentialSet, PlatformError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(PlatformCall::AssumeIdentity(identity.name.clone()));

        if let Some(kind) = state.faults.reject_assume {
            return Err(injected("assume_identity", kind));
        }
        let denied = PlatformError::new(
            "assume_identity",
            PlatformErrorKind::AccessDenied,
            format!(
                "{} is not authorized to perform: sts:AssumeRole on resource: {}",
                self.caller, identity.arn
            ),
        );
        if state.faults.deny_assume_attempts > 0 {
            state.faults.deny_assume_attempts -= 1;
            return Err(denied);
        }
        let trusted = state
            .roles
            .get(&identity.name)
            .is_some_and(|r| r.trust_policy.trusts(&self.caller));
        if !trusted {
            return Err(denied);
        }

        state.issued += 1;
        let access_key_id = format!("ASIASIMULATED{:08}", state.issued);
        let expiration = Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::hours(1));
        state.sessions.insert(
            access_key_id.clone(),
            Session {
                role_name: identity.name.clone(),
                expiration,
            },
        );

        Ok(CredentialSet {
            access_key_id,
            secret_access_key: format!("simulated-secret-{}", state.issued),
            session_token: format!("simulated-token-{}", state.issued),
            expiration,
        })
    }

    async fn list_identities(&self, name_prefix: &str) -> Result<Vec<String>, PlatformError> {
        let state = self.state.lock().await;
        Ok(state
            .roles
            .keys()
            .filter(|name| name.starts_with(name_prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Statement;

    fn identity(name: &str) -> IdentityRef {
        IdentityRef {
            name: name.to_string(),
            arn: format!("arn:aws:iam::{SIMULATED_ACCOUNT_ID}:role/{name}"),
        }
    }

    #[tokio::test]
    async fn test_role_with_policies_cannot_be_deleted() {
        let platform = SimulatedPlatform::new(SimulatedPlatform::admin_principal());
        let trust = PolicyDocument::deny_all_trust();
        let role = platform
            .create_identity("r", &trust, Duration::from_secs(3600))
            .await
            .unwrap();
        let policy = PolicyDocument::new(vec![Statement::allow(&["s3:ListBucket"], &["*"])]);
        platform.put_inline_policy(&role, "p", &policy).await.unwrap();

        let err = platform.delete_identity(&role).await.unwrap_err();
        assert_eq!(err.kind, PlatformErrorKind::Conflict);

        platform.delete_inline_policy(&role, "p").await.unwrap();
        platform.delete_identity(&role).await.unwrap();
        assert!(platform.identity_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_assume_requires_trust() {
        let admin = SimulatedPlatform::admin_principal();
        let platform = SimulatedPlatform::new(admin.clone());
        let role = platform
            .create_identity("r", &PolicyDocument::deny_all_trust(), Duration::from_secs(3600))
            .await
            .unwrap();

        let err = platform
            .assume_identity(&role, "s", Duration::from_secs(900))
            .await
            .unwrap_err();
        assert!(err.is_propagation_lag());

        platform
            .update_trust_policy(&role, &PolicyDocument::trust(&admin))
            .await
            .unwrap();
        let creds = platform
            .assume_identity(&role, "s", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(!creds.is_expired());
    }

    #[tokio::test]
    async fn test_missing_entities_report_not_found() {
        let platform = SimulatedPlatform::new(SimulatedPlatform::admin_principal());
        let missing = identity("missing");

        assert!(platform.delete_identity(&missing).await.unwrap_err().is_not_found());
        assert!(
            platform
                .delete_inline_policy(&missing, "p")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}

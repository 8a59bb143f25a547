// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Policy documents.
//!
//! The broker treats permission documents as opaque: it only checks their
//! structure before sending them to the platform. Trust documents are built
//! here. [`PolicyDocument::evaluate`] implements deny-overrides evaluation and
//! is used by the simulated platform to enforce vended credentials.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use validator::{Validate, ValidationError};

use crate::constants::{ASSUME_ACTION, MAX_INLINE_POLICY_SIZE, POLICY_VERSION};
use crate::errors::BrokerError;
use crate::models::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// A single string or a list of strings, as accepted by policy grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn values(&self) -> &[String] {
        match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        }
    }
}

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
#[validate(schema(function = "validate_statement_shape"))]
pub struct Statement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<OneOrMany>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_action: Option<OneOrMany>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_resource: Option<OneOrMany>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<BTreeMap<String, Value>>,
}

impl Statement {
    pub fn allow(actions: &[&str], resources: &[&str]) -> Self {
        Self::with_effect(Effect::Allow, actions, resources)
    }

    pub fn deny(actions: &[&str], resources: &[&str]) -> Self {
        Self::with_effect(Effect::Deny, actions, resources)
    }

    fn with_effect(effect: Effect, actions: &[&str], resources: &[&str]) -> Self {
        Self {
            sid: None,
            effect,
            principal: None,
            action: Some(many(actions)),
            not_action: None,
            resource: Some(many(resources)),
            not_resource: None,
            condition: None,
        }
    }

    fn matches(&self, action: &str, resource: &str) -> bool {
        let action_matches = match (&self.action, &self.not_action) {
            (Some(actions), _) => any_matches(actions, action, true),
            (None, Some(excluded)) => !any_matches(excluded, action, true),
            (None, None) => false,
        };
        let resource_matches = match (&self.resource, &self.not_resource) {
            (Some(resources), _) => any_matches(resources, resource, false),
            (None, Some(excluded)) => !any_matches(excluded, resource, false),
            (None, None) => false,
        };
        // conditions are not evaluated; a conditional statement never applies
        action_matches && resource_matches && self.condition.is_none()
    }
}

fn many(values: &[&str]) -> OneOrMany {
    match values {
        [single] => OneOrMany::One(single.to_string()),
        _ => OneOrMany::Many(values.iter().map(|v| v.to_string()).collect()),
    }
}

fn any_matches(patterns: &OneOrMany, value: &str, ignore_case: bool) -> bool {
    patterns.values().iter().any(|pattern| {
        if ignore_case {
            wildcard_match(&pattern.to_ascii_lowercase(), &value.to_ascii_lowercase())
        } else {
            wildcard_match(pattern, value)
        }
    })
}

/// Glob match supporting `*` (any run) and `?` (any single character).
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();
    let (mut p, mut v) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == value[v]) {
            p += 1;
            v += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, v));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            v = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    ExplicitDeny,
    ImplicitDeny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    #[validate(length(min = 1))]
    pub version: String,
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement,
        }
    }

    /// Parses and structurally validates a permission document.
    pub fn from_json(input: &str) -> Result<Self, BrokerError> {
        let document: PolicyDocument = serde_json::from_str(input)?;
        document.validate_permissions()?;
        Ok(document)
    }

    /// Trust document allowing `principal` to assume the identity it is attached to.
    pub fn trust(principal: &Principal) -> Self {
        Self::trust_statement(Effect::Allow, json!({ "AWS": principal.as_str() }))
    }

    /// Trust document that nobody may assume.
    pub fn deny_all_trust() -> Self {
        Self::trust_statement(Effect::Deny, json!({ "AWS": "*" }))
    }

    fn trust_statement(effect: Effect, principal: Value) -> Self {
        Self::new(vec![Statement {
            sid: None,
            effect,
            principal: Some(principal),
            action: Some(ASSUME_ACTION.into()),
            not_action: None,
            resource: None,
            not_resource: None,
            condition: None,
        }])
    }

    /// Structural checks for a permission document. The content is not judged.
    pub fn validate_permissions(&self) -> Result<(), BrokerError> {
        self.validate()?;

        if let Some(index) = self.statement.iter().position(|s| s.principal.is_some()) {
            return Err(BrokerError::ValidationError(format!(
                "statement {index} names a Principal, which identity policies do not accept"
            )));
        }

        if let Some(index) = self
            .statement
            .iter()
            .position(|s| s.resource.is_none() == s.not_resource.is_none())
        {
            return Err(BrokerError::ValidationError(format!(
                "statement {index} must have exactly one of Resource or NotResource"
            )));
        }

        let size = self.to_json()?.len();
        if size > MAX_INLINE_POLICY_SIZE {
            return Err(BrokerError::ValidationError(format!(
                "policy document is {size} characters, limit is {MAX_INLINE_POLICY_SIZE}"
            )));
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String, BrokerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Evaluates `action` on `resource`. An explicit deny always wins.
    pub fn evaluate(&self, action: &str, resource: &str) -> Decision {
        Self::evaluate_all(std::slice::from_ref(self), action, resource)
    }

    /// Evaluates a set of documents attached to the same identity.
    pub fn evaluate_all(documents: &[PolicyDocument], action: &str, resource: &str) -> Decision {
        let mut decision = Decision::ImplicitDeny;
        for statement in documents
            .iter()
            .flat_map(|d| d.statement.iter())
            .filter(|s| s.matches(action, resource))
        {
            match statement.effect {
                Effect::Deny => return Decision::ExplicitDeny,
                Effect::Allow => decision = Decision::Allow,
            }
        }
        decision
    }

    /// Whether this trust document lets `principal` assume the identity.
    pub fn trusts(&self, principal: &Principal) -> bool {
        let mut allowed = false;
        for statement in &self.statement {
            let names_principal = statement
                .principal
                .as_ref()
                .is_some_and(|p| principal_matches(p, principal.as_str()));
            let covers_assume = statement
                .action
                .as_ref()
                .is_some_and(|a| any_matches(a, ASSUME_ACTION, true));
            if !(names_principal && covers_assume) {
                continue;
            }
            match statement.effect {
                Effect::Deny => return false,
                Effect::Allow => allowed = true,
            }
        }
        allowed
    }
}

fn principal_matches(principal: &Value, arn: &str) -> bool {
    match principal {
        Value::String(s) => s == "*",
        Value::Object(map) => map.get("AWS").is_some_and(|aws| match aws {
            Value::String(s) => s == "*" || s == arn,
            Value::Array(items) => items.iter().any(|i| i.as_str() == Some(arn) || i.as_str() == Some("*")),
            _ => false,
        }),
        _ => false,
    }
}

fn has_empty_pattern(patterns: &Option<OneOrMany>) -> bool {
    patterns.as_ref().is_some_and(|p| {
        let values = p.values();
        values.is_empty() || values.iter().any(|v| v.trim().is_empty())
    })
}

fn validate_statement_shape(statement: &Statement) -> Result<(), ValidationError> {
    if statement.action.is_some() == statement.not_action.is_some() {
        return Err(ValidationError::new("action_or_not_action"));
    }
    let fields = [
        &statement.action,
        &statement.not_action,
        &statement.resource,
        &statement.not_resource,
    ];
    if fields.into_iter().any(has_empty_pattern) {
        return Err(ValidationError::new("empty_pattern"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_except(resource: &str) -> PolicyDocument {
        PolicyDocument::new(vec![
            Statement::allow(&["s3:ListBucket"], &["*"]),
            Statement::deny(&["s3:ListBucket"], &[resource]),
        ])
    }

    #[test]
    fn test_deny_overrides_allow() {
        let policy = list_except("arn:aws:s3:::restricted");

        assert_eq!(
            policy.evaluate("s3:ListBucket", "arn:aws:s3:::other"),
            Decision::Allow
        );
        assert_eq!(
            policy.evaluate("s3:ListBucket", "arn:aws:s3:::restricted"),
            Decision::ExplicitDeny
        );
        assert_eq!(
            policy.evaluate("s3:GetObject", "arn:aws:s3:::other"),
            Decision::ImplicitDeny
        );
    }

    #[test]
    fn test_action_match_is_case_insensitive() {
        let policy = list_except("arn:aws:s3:::restricted");
        assert!(policy.evaluate("S3:listbucket", "arn:aws:s3:::other").is_allowed());
    }

    #[test]
    fn test_not_action_statement() {
        let policy = PolicyDocument::new(vec![Statement {
            sid: Some("AllButDelete".to_string()),
            effect: Effect::Allow,
            principal: None,
            action: None,
            not_action: Some("s3:Delete*".into()),
            resource: Some("*".into()),
            not_resource: None,
            condition: None,
        }]);

        assert!(policy.evaluate("s3:GetObject", "x").is_allowed());
        assert!(!policy.evaluate("s3:DeleteObject", "x").is_allowed());
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("arn:aws:s3:::bucket/*", "arn:aws:s3:::bucket/a/b"));
        assert!(wildcard_match("s3:Get?bject", "s3:GetObject"));
        assert!(wildcard_match("a*b*c", "axxbyyc"));
        assert!(!wildcard_match("a*b*c", "axxbyy"));
        assert!(!wildcard_match("bucket", "bucket2"));
    }

    #[test]
    fn test_from_json_accepts_single_and_list_values() {
        let input = r#"{
            "Version": "2012-10-17",
            "Statement": [
                {"Effect": "Allow", "Action": "s3:ListAllMyBuckets", "Resource": "*"},
                {"Sid": "NoSecrets", "Effect": "Deny", "Action": ["s3:ListBucket"], "Resource": ["arn:aws:s3:::secret"]}
            ]
        }"#;

        let policy = PolicyDocument::from_json(input).unwrap();
        assert_eq!(policy.statement.len(), 2);
        assert_eq!(policy.statement[1].sid.as_deref(), Some("NoSecrets"));
    }

    #[test]
    fn test_sample_policy_file() {
        let policy =
            PolicyDocument::from_json(include_str!("../policies/list-except-restricted.json")).unwrap();
        assert!(policy.evaluate("s3:ListBucket", "arn:aws:s3:::other").is_allowed());
        assert_eq!(
            policy.evaluate("s3:ListBucket", "arn:aws:s3:::restricted"),
            Decision::ExplicitDeny
        );
    }

    #[test]
    fn test_from_json_rejects_malformed_documents() {
        let cases = [
            r#"{"Version": "2012-10-17", "Statement": []}"#,
            r#"{"Version": "", "Statement": [{"Effect": "Allow", "Action": "a", "Resource": "*"}]}"#,
            r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Resource": "*"}]}"#,
            r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Action": "a"}]}"#,
            r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Action": [], "Resource": "*"}]}"#,
            r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Maybe", "Action": "a", "Resource": "*"}]}"#,
            r#"not json"#,
        ];

        for case in cases {
            let result = PolicyDocument::from_json(case);
            assert!(
                matches!(result, Err(BrokerError::ValidationError(_))),
                "expected validation error for {case}"
            );
        }
    }

    #[test]
    fn test_principal_rejected_in_permissions() {
        let mut statement = Statement::allow(&["s3:ListBucket"], &["*"]);
        statement.principal = Some(serde_json::json!({"AWS": "*"}));
        let policy = PolicyDocument::new(vec![statement]);

        let err = policy.validate_permissions().unwrap_err();
        assert!(err.to_string().contains("Principal"));
        // trust documents still carry one
        assert!(PolicyDocument::trust(&Principal::new("arn:aws:iam::1:role/a")).validate().is_ok());
    }

    #[test]
    fn test_oversized_document_rejected() {
        let resources: Vec<String> = (0..600).map(|i| format!("arn:aws:s3:::bucket-{i}")).collect();
        let refs: Vec<&str> = resources.iter().map(String::as_str).collect();
        let policy = PolicyDocument::new(vec![Statement::allow(&["s3:ListBucket"], &refs)]);

        let err = policy.validate_permissions().unwrap_err();
        assert!(err.to_string().contains("limit is 10240"));
    }

    #[test]
    fn test_trust_documents() {
        let admin = Principal::new("arn:aws:iam::123456789012:role/admin");
        let other = Principal::new("arn:aws:iam::123456789012:role/other");

        let trust = PolicyDocument::trust(&admin);
        assert!(trust.trusts(&admin));
        assert!(!trust.trusts(&other));

        assert!(!PolicyDocument::deny_all_trust().trusts(&admin));
    }

    #[test]
    fn test_serializes_with_policy_grammar_keys() {
        let admin = Principal::new("arn:aws:iam::123456789012:role/admin");
        let json: Value = serde_json::from_str(&PolicyDocument::trust(&admin).to_json().unwrap()).unwrap();

        assert_eq!(json["Version"], "2012-10-17");
        assert_eq!(json["Statement"][0]["Effect"], "Allow");
        assert_eq!(json["Statement"][0]["Action"], "sts:AssumeRole");
        assert_eq!(json["Statement"][0]["Principal"]["AWS"], admin.as_str());
        assert!(json["Statement"][0].get("Resource").is_none());
    }
}

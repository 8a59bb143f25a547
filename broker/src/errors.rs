// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;

use crate::stack::ResourceKind;

/// Classification of a failed platform call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    NotFound,
    /// Also returned while a fresh trust policy is still propagating.
    AccessDenied,
    Conflict,
    LimitExceeded,
    InvalidInput,
    Throttled,
    Other,
}

impl PlatformErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::AccessDenied => "access denied",
            Self::Conflict => "conflict",
            Self::LimitExceeded => "limit exceeded",
            Self::InvalidInput => "invalid input",
            Self::Throttled => "throttled",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for PlatformErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{operation} failed ({kind}): {message}")]
pub struct PlatformError {
    pub operation: &'static str,
    pub kind: PlatformErrorKind,
    pub message: String,
}

impl PlatformError {
    pub fn new(operation: &'static str, kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == PlatformErrorKind::NotFound
    }

    /// Authorization failures are what a not-yet-propagated trust policy looks like.
    pub fn is_propagation_lag(&self) -> bool {
        self.kind == PlatformErrorKind::AccessDenied
    }
}

/// A single release action that failed during an unwind.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseFailure {
    pub kind: ResourceKind,
    pub identifier: String,
    pub error: PlatformError,
}

impl fmt::Display for ReleaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.identifier, self.error)
    }
}

/// Every release failure from one unwind pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupError {
    pub failures: Vec<ReleaseFailure>,
}

impl fmt::Display for CleanupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cleanup action(s) failed", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CleanupError {}

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("provisioning error: unable to {operation} for {name}: {source}")]
    ProvisioningError {
        operation: &'static str,
        name: String,
        source: PlatformError,
    },
    #[error("credentials still unauthorized after {attempts} attempt(s): {last}")]
    PropagationTimeout { attempts: u32, last: PlatformError },
    #[error(transparent)]
    CleanupError(#[from] CleanupError),
    #[error(transparent)]
    PlatformError(#[from] PlatformError),
    #[error("work failed: {0:#}")]
    WorkError(anyhow::Error),
    #[error("scope cancelled before completion")]
    Cancelled,
    #[error("{error} (additionally, {cleanup})")]
    WithCleanupFailures {
        #[source]
        error: Box<BrokerError>,
        cleanup: CleanupError,
    },
}

impl BrokerError {
    /// Attaches cleanup failures to an error without replacing it.
    pub fn with_cleanup(self, cleanup: CleanupError) -> Self {
        Self::WithCleanupFailures {
            error: Box::new(self),
            cleanup,
        }
    }

    /// The error that ended the scope, ignoring attached cleanup failures.
    pub fn primary(&self) -> &BrokerError {
        match self {
            Self::WithCleanupFailures { error, .. } => error.primary(),
            other => other,
        }
    }

    pub fn cleanup_failures(&self) -> Option<&CleanupError> {
        match self {
            Self::CleanupError(cleanup) => Some(cleanup),
            Self::WithCleanupFailures { cleanup, .. } => Some(cleanup),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(source: serde_json::Error) -> Self {
        tracing::error!("{:?}", source);
        BrokerError::ValidationError(source.to_string())
    }
}

impl From<validator::ValidationErrors> for BrokerError {
    fn from(source: validator::ValidationErrors) -> Self {
        BrokerError::ValidationError(source.to_string())
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Mutex;

use crate::constants::{MAX_IDENTITY_NAME_LENGTH, NAME_SUFFIX_CHARSET, NAME_SUFFIX_LENGTH};
use crate::errors::BrokerError;

/// Generates `<prefix>-<random suffix>` identity names.
///
/// The random source is injected so tests can seed it.
#[derive(Debug)]
pub struct NameGenerator {
    prefix: String,
    rng: Mutex<fastrand::Rng>,
}

impl NameGenerator {
    pub fn new(prefix: impl Into<String>, rng: fastrand::Rng) -> Result<Self, BrokerError> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        Ok(Self {
            prefix,
            rng: Mutex::new(rng),
        })
    }

    pub fn next_name(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let suffix: String = (0..NAME_SUFFIX_LENGTH)
            .map(|_| NAME_SUFFIX_CHARSET[rng.usize(..NAME_SUFFIX_CHARSET.len())] as char)
            .collect();
        format!("{}-{}", self.prefix, suffix)
    }
}

fn validate_prefix(prefix: &str) -> Result<(), BrokerError> {
    let max = MAX_IDENTITY_NAME_LENGTH - NAME_SUFFIX_LENGTH - 1;
    if prefix.is_empty() || prefix.len() > max {
        return Err(BrokerError::ConfigError(format!(
            "identity name prefix must be 1 to {max} characters"
        )));
    }
    // IAM role names: alphanumerics and +=,.@_-
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c))
    {
        return Err(BrokerError::ConfigError(format!(
            "identity name prefix contains invalid characters: {prefix}"
        )));
    }
    Ok(())
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::constants::{
    BACKOFF_MULTIPLIER, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF,
    DEFAULT_SESSION_DURATION, DEFAULT_SETTLE_DELAY, IDENTITY_PREFIX, INLINE_POLICY_NAME,
    MAX_SESSION_DURATION, MIN_SESSION_DURATION,
};
use crate::errors::BrokerError;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct BrokerOptions {
    /// JSON permission policy attached to the temporary role
    #[arg(long, env("BROKER_POLICY_FILE"))]
    pub policy_file: PathBuf,
    /// ARN allowed to assume the temporary role; defaults to the current caller
    #[arg(long, env("BROKER_CALLER_ARN"))]
    pub caller_arn: Option<String>,
    #[arg(long, default_value = "3600", env("BROKER_SESSION_DURATION_SECS"))]
    pub session_duration_secs: u64,
    #[arg(long, default_value = "10", env("BROKER_SETTLE_DELAY_SECS"))]
    pub settle_delay_secs: u64,
    #[arg(long, default_value = "6", env("BROKER_MAX_ATTEMPTS"))]
    pub max_attempts: u32,
    #[arg(long, default_value = "2000", env("BROKER_INITIAL_BACKOFF_MS"))]
    pub initial_backoff_ms: u64,
    #[arg(long, default_value = "20000", env("BROKER_MAX_BACKOFF_MS"))]
    pub max_backoff_ms: u64,
    #[arg(long, default_value = "ephemeral-broker", env("BROKER_NAME_PREFIX"))]
    pub name_prefix: String,
    #[arg(long, env("AWS_REGION"))]
    pub region: Option<String>,
    #[arg(long, env("AWS_PROFILE"))]
    pub profile: Option<String>,
    /// Command to run with the temporary credentials in its environment
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl BrokerOptions {
    pub fn broker_config(&self) -> Result<BrokerConfig, BrokerError> {
        let config = BrokerConfig {
            name_prefix: self.name_prefix.clone(),
            policy_name: INLINE_POLICY_NAME.to_string(),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            session_duration: Duration::from_secs(self.session_duration_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                multiplier: BACKOFF_MULTIPLIER,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

/// Backoff schedule for the assume step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: BACKOFF_MULTIPLIER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub name_prefix: String,
    pub policy_name: String,
    pub settle_delay: Duration,
    pub session_duration: Duration,
    pub retry: RetryPolicy,
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), BrokerError> {
        validate_session_duration(self.session_duration)?;
        if self.retry.max_attempts == 0 {
            return Err(BrokerError::ConfigError(
                "max attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(BrokerError::ConfigError(
                "initial backoff exceeds maximum backoff".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn validate_session_duration(duration: Duration) -> Result<(), BrokerError> {
    if duration < MIN_SESSION_DURATION || duration > MAX_SESSION_DURATION {
        return Err(BrokerError::ValidationError(format!(
            "session duration must be between {} and {} seconds",
            MIN_SESSION_DURATION.as_secs(),
            MAX_SESSION_DURATION.as_secs()
        )));
    }
    Ok(())
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            name_prefix: IDENTITY_PREFIX.to_string(),
            policy_name: INLINE_POLICY_NAME.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            session_duration: DEFAULT_SESSION_DURATION,
            retry: RetryPolicy::default(),
        }
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const IDENTITY_PREFIX: &str = "ephemeral-broker";
pub const INLINE_POLICY_NAME: &str = "ephemeral-broker-permissions";
pub const IDENTITY_DESCRIPTION: &str = "Temporary role managed by ephemeral-broker";
/// https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_iam-quotas.html
pub const MAX_IDENTITY_NAME_LENGTH: usize = 64;
pub const NAME_SUFFIX_LENGTH: usize = 12;
pub const NAME_SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
/// aggregate size ceiling for inline role policies
pub const MAX_INLINE_POLICY_SIZE: usize = 10_240;

pub const POLICY_VERSION: &str = "2012-10-17";
pub const ASSUME_ACTION: &str = "sts:AssumeRole";

pub const MIN_SESSION_DURATION: Duration = Duration::from_secs(900); // 15 minutes
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(43_200); // 12 hours
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(3_600);
/// lower bound IAM accepts for a role's MaxSessionDuration
pub const MIN_ROLE_MAX_SESSION: Duration = Duration::from_secs(3_600);

/// Observed time for new roles and trust policies to become assumable.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

// Retry settings for the assume step
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(20);
pub const BACKOFF_MULTIPLIER: u32 = 2;

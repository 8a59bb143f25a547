// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Ephemeral Broker
//!
//! Scoped, short-lived credentials backed by a throwaway IAM role.
//!
//! The broker creates a uniquely named role carrying a caller-supplied inline
//! permission policy, lets an existing principal assume it, waits out IAM
//! propagation, assumes the role and hands the credentials to a block of work.
//! Whatever the block does, every resource created on the way is removed again
//! before control returns.
//!
//! ## Architecture
//!
//! ```text
//! Broker -> RoleProvisioner -> TrustLinker -> ReadinessWaiter -> CredentialVendor -> work
//!   |             |                 |                                                 |
//!   +------- ResourceStack <--------+------------- unwound in reverse <---------------+
//! ```
//!
//! ## Modules
//!
//! - [`aws`]: IAM/STS platform backed by the AWS SDK
//! - [`configuration`]: CLI options with clap and the validated broker config
//! - [`constants`]: Defaults and platform limits
//! - [`errors`]: Broker, platform and cleanup error types
//! - [`models`]: Identities, trust grants and credential sets
//! - [`naming`]: Collision-resistant identity names from an injected RNG
//! - [`orchestrator`]: [`Broker`], the scoped entry point
//! - [`platform`]: The [`IdentityPlatform`] trait
//! - [`policy`]: Policy documents, structural validation and evaluation
//! - [`provisioner`], [`trust`], [`readiness`], [`vendor`]: The lifecycle steps
//! - [`simulated`]: In-memory platform with fault injection
//! - [`stack`]: Reverse-order release of registered resources
//!
//! ## Usage
//!
//! ```bash
//! ephemeral-broker --policy-file policy.json -- aws s3 ls
//! ```
//!
//! ## Security Considerations
//!
//! - Credentials are never written to disk and are zeroized on drop
//! - `Debug` output of credentials is redacted
//! - A dropped scope still releases its resources in the background

pub mod aws;
pub mod configuration;
pub mod constants;
pub mod errors;
pub mod models;
pub mod naming;
pub mod orchestrator;
pub mod platform;
pub mod policy;
pub mod provisioner;
pub mod readiness;
pub mod simulated;
pub mod stack;
pub mod trust;
pub mod vendor;

pub use errors::BrokerError;
pub use orchestrator::Broker;
pub use platform::IdentityPlatform;

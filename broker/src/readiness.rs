// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

/// Waits out identity and trust policy propagation before first use.
///
/// This is one fixed delay, not a readiness probe: probing whether a new role
/// is assumable gave non-monotonic answers (success, failure, success), so a
/// positive probe is not evidence of readiness. Residual lag is absorbed by the
/// bounded retry in [`crate::vendor::CredentialVendor`].
#[derive(Debug, Clone, Copy)]
pub struct ReadinessWaiter {
    settle_delay: Duration,
}

impl ReadinessWaiter {
    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }

    #[tracing::instrument(skip(self))]
    pub async fn await_usable(&self) {
        if self.settle_delay.is_zero() {
            return;
        }
        tracing::info!(
            "[broker] waiting {:#?} for identity changes to propagate",
            self.settle_delay
        );
        tokio::time::sleep(self.settle_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_configured_delay() {
        let waiter = ReadinessWaiter::new(Duration::from_secs(10));
        let started = Instant::now();

        waiter.await_usable().await;

        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_returns_immediately() {
        let waiter = ReadinessWaiter::new(Duration::ZERO);
        let started = Instant::now();

        waiter.await_usable().await;

        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}

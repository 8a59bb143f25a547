// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Scoped acquisition register for platform resources.
//!
//! Every step that creates something on the platform pushes a
//! [`ResourceHandle`] onto a shared [`ResourceStack`]. [`ResourceStack::unwind_all`]
//! releases the handles in reverse registration order, keeps going past
//! individual failures and reports them together as one [`CleanupError`].
//!
//! A stack dropped while it still holds handles (the owning future was
//! cancelled, or a panic unwound through it) hands the remaining handles to the
//! current tokio runtime so the resources are still released.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::errors::{CleanupError, PlatformError, ReleaseFailure};

pub type ReleaseFuture = Pin<Box<dyn Future<Output = Result<(), PlatformError>> + Send>>;

/// Zero-argument release action. Must be safe to invoke more than once.
pub type ReleaseAction = Box<dyn Fn() -> ReleaseFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Identity,
    InlinePolicy,
    TrustGrant,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Identity => "identity",
            Self::InlinePolicy => "inline policy",
            Self::TrustGrant => "trust grant",
        };
        f.write_str(name)
    }
}

pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub identifier: String,
    release: ReleaseAction,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, identifier: impl Into<String>, release: ReleaseAction) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            release,
        }
    }

    /// Runs the release action. "Not found" counts as released.
    pub async fn release(&self) -> Result<(), PlatformError> {
        match (self.release)().await {
            Err(err) if err.is_not_found() => {
                tracing::debug!("[broker] {} {} already absent", self.kind, self.identifier);
                Ok(())
            }
            other => other,
        }
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("kind", &self.kind)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ResourceStack {
    handles: Vec<ResourceHandle>,
}

impl ResourceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: ResourceHandle) {
        tracing::debug!(
            "[broker] registered cleanup for {} {}",
            handle.kind,
            handle.identifier
        );
        self.handles.push(handle);
    }

    /// Registers a release closure. The closure is boxed into a [`ReleaseAction`].
    pub fn push<F, Fut>(&mut self, kind: ResourceKind, identifier: impl Into<String>, release: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PlatformError>> + Send + 'static,
    {
        let action: ReleaseAction = Box::new(move || -> ReleaseFuture { Box::pin(release()) });
        self.register(ResourceHandle::new(kind, identifier, action));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Kinds and identifiers in registration order.
    pub fn registered(&self) -> Vec<(ResourceKind, String)> {
        self.handles
            .iter()
            .map(|h| (h.kind, h.identifier.clone()))
            .collect()
    }

    /// Releases every handle in reverse registration order.
    ///
    /// A handle leaves the stack only once its release has finished, failed
    /// or not, so a second call is a no-op. If this future is dropped midway,
    /// the unreleased handles stay behind for [`Drop`].
    ///
    /// # Errors
    ///
    /// Returns a [`CleanupError`] carrying every failure of this pass, after all
    /// handles have been attempted.
    #[tracing::instrument(skip(self), fields(count = self.handles.len()))]
    pub async fn unwind_all(&mut self) -> Result<(), CleanupError> {
        let mut failures = Vec::new();

        while let Some(handle) = self.handles.last() {
            let outcome = handle.release().await;
            let Some(handle) = self.handles.pop() else {
                break;
            };
            match outcome {
                Ok(()) => tracing::info!("[broker] released {} {}", handle.kind, handle.identifier),
                Err(error) => {
                    tracing::error!(
                        "[broker] failed to release {} {}: {}",
                        handle.kind,
                        handle.identifier,
                        error
                    );
                    failures.push(ReleaseFailure {
                        kind: handle.kind,
                        identifier: handle.identifier,
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CleanupError { failures })
        }
    }
}

impl Drop for ResourceStack {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        let handles = std::mem::take(&mut self.handles);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(
                    "[broker] scope exited without unwinding, releasing {} resource(s) in background",
                    handles.len()
                );
                let mut orphaned = ResourceStack { handles };
                runtime.spawn(async move {
                    if let Err(err) = orphaned.unwind_all().await {
                        tracing::error!("[broker] background cleanup incomplete: {}", err);
                    }
                });
            }
            Err(_) => {
                for handle in handles.iter().rev() {
                    tracing::error!(
                        "[broker] leaked {} {}: no runtime available for cleanup",
                        handle.kind,
                        handle.identifier
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::errors::PlatformErrorKind;

    fn recording(
        log: &Arc<Mutex<Vec<String>>>,
        name: &'static str,
    ) -> impl Fn() -> std::future::Ready<Result<(), PlatformError>> + Send + Sync + 'static {
        let log = log.clone();
        move || {
            log.lock().unwrap().push(name.to_string());
            std::future::ready(Ok(()))
        }
    }

    fn failing(
        kind: PlatformErrorKind,
    ) -> impl Fn() -> std::future::Ready<Result<(), PlatformError>> + Send + Sync + 'static {
        move || std::future::ready(Err(PlatformError::new("release", kind, "boom")))
    }

    #[tokio::test]
    async fn test_unwind_runs_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ResourceStack::new();
        stack.push(ResourceKind::Identity, "first", recording(&log, "first"));
        stack.push(ResourceKind::InlinePolicy, "second", recording(&log, "second"));
        stack.push(ResourceKind::TrustGrant, "third", recording(&log, "third"));

        stack.unwind_all().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_unwind_continues_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ResourceStack::new();
        stack.push(ResourceKind::Identity, "first", recording(&log, "first"));
        stack.push(ResourceKind::InlinePolicy, "broken", failing(PlatformErrorKind::Other));
        stack.push(ResourceKind::TrustGrant, "also-broken", failing(PlatformErrorKind::Throttled));

        let err = stack.unwind_all().await.unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["first"]);
        let ids: Vec<_> = err.failures.iter().map(|f| f.identifier.as_str()).collect();
        assert_eq!(ids, vec!["also-broken", "broken"]);
    }

    #[tokio::test]
    async fn test_not_found_counts_as_released() {
        let mut stack = ResourceStack::new();
        stack.push(ResourceKind::Identity, "gone", failing(PlatformErrorKind::NotFound));

        assert!(stack.unwind_all().await.is_ok());
    }

    #[tokio::test]
    async fn test_second_unwind_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ResourceStack::new();
        stack.push(ResourceKind::Identity, "only", recording(&log, "only"));

        stack.unwind_all().await.unwrap();
        stack.unwind_all().await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_release_is_repeatable() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = ResourceHandle::new(
            ResourceKind::Identity,
            "role",
            Box::new({
                let record = recording(&log, "role");
                move || -> ReleaseFuture { Box::pin(record()) }
            }),
        );

        handle.release().await.unwrap();
        handle.release().await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut stack = ResourceStack::new();
            stack.push(ResourceKind::Identity, "first", recording(&log, "first"));
            stack.push(ResourceKind::InlinePolicy, "second", recording(&log, "second"));
        }

        for _ in 0..10 {
            if log.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_unwind_leaves_rest_for_drop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ResourceStack::new();
        stack.push(ResourceKind::Identity, "identity", recording(&log, "identity"));
        stack.push(ResourceKind::InlinePolicy, "slow-policy", {
            let log = log.clone();
            move || {
                let log = log.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    log.lock().unwrap().push("slow-policy".to_string());
                    Ok(())
                }
            }
        });

        let cut_short = tokio::time::timeout(Duration::from_millis(20), stack.unwind_all()).await;
        assert!(cut_short.is_err());
        assert_eq!(stack.len(), 2);

        drop(stack);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(*log.lock().unwrap(), vec!["slow-policy", "identity"]);
    }

    #[tokio::test]
    async fn test_failed_release_leaves_the_stack() {
        let mut stack = ResourceStack::new();
        stack.push(ResourceKind::Identity, "broken", failing(PlatformErrorKind::Other));

        assert!(stack.unwind_all().await.is_err());
        assert!(stack.is_empty());
        assert!(stack.unwind_all().await.is_ok());
    }

    #[test]
    fn test_registered_reports_order() {
        let mut stack = ResourceStack::new();
        stack.push(ResourceKind::Identity, "role", failing(PlatformErrorKind::NotFound));
        stack.push(ResourceKind::InlinePolicy, "role/policy", failing(PlatformErrorKind::NotFound));

        assert_eq!(
            stack.registered(),
            vec![
                (ResourceKind::Identity, "role".to_string()),
                (ResourceKind::InlinePolicy, "role/policy".to_string()),
            ]
        );

        // no runtime here, so dropping only logs
        drop(stack);
    }
}

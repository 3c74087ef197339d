//! Retry decorator for resource handlers
//!
//! Wraps every remote handler operation with exponential backoff. Permanent
//! errors are surfaced immediately, and cancelling the reconcile context
//! aborts the loop between attempts.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::crd::IngressConfig;
use crate::error::{ErrorKind, HandlerError};

use super::{Handler, Patch, ReconcileCtx, Step};

/// Backoff schedule for one handler operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per operation
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// The backoff delay after the given failed attempt (1-based)
    fn delay(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        doubled.min(self.max_delay)
    }
}

/// Handler decorator adding per-operation retries
pub struct Retried<H> {
    inner: H,
    policy: RetryPolicy,
}

impl<H> Retried<H> {
    pub fn new(inner: H, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn with_retry<T, Fut>(
        &self,
        ctx: &ReconcileCtx,
        operation: &'static str,
        f: impl Fn() -> Fut,
    ) -> Result<T, HandlerError>
    where
        H: Handler,
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        let mut attempt = 1u32;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(HandlerError::Cancelled);
            }

            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.kind() == ErrorKind::Permanent => return Err(err),
                Err(err) if attempt >= self.policy.max_attempts => {
                    error!(
                        handler = self.inner.name(),
                        operation,
                        attempt,
                        error = %err,
                        "operation failed after max retries"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        handler = self.inner.name(),
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying"
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return Err(HandlerError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<H: Handler> Handler for Retried<H> {
    type Current = H::Current;
    type Desired = H::Desired;
    type Change = H::Change;

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn current_state(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Step<Self::Current>, HandlerError> {
        self.with_retry(ctx, "current_state", || self.inner.current_state(ctx, obj))
            .await
    }

    async fn desired_state(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Self::Desired, HandlerError> {
        self.with_retry(ctx, "desired_state", || self.inner.desired_state(ctx, obj))
            .await
    }

    fn update_patch(
        &self,
        obj: &IngressConfig,
        current: &Self::Current,
        desired: &Self::Desired,
    ) -> Result<Patch<Self::Change>, HandlerError> {
        self.inner.update_patch(obj, current, desired)
    }

    fn delete_patch(
        &self,
        obj: &IngressConfig,
        current: &Self::Current,
        desired: &Self::Desired,
    ) -> Result<Patch<Self::Change>, HandlerError> {
        self.inner.delete_patch(obj, current, desired)
    }

    async fn apply_create(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Self::Change,
    ) -> Result<(), HandlerError> {
        self.with_retry(ctx, "apply_create", || {
            self.inner.apply_create(ctx, obj, change.clone())
        })
        .await
    }

    async fn apply_update(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Self::Change,
    ) -> Result<(), HandlerError> {
        self.with_retry(ctx, "apply_update", || {
            self.inner.apply_update(ctx, obj, change.clone())
        })
        .await
    }

    async fn apply_delete(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Self::Change,
    ) -> Result<(), HandlerError> {
        self.with_retry(ctx, "apply_delete", || {
            self.inner.apply_delete(ctx, obj, change.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GuestCluster, HostCluster, IngressConfigSpec, IngressController};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn test_object() -> IngressConfig {
        IngressConfig::new(
            "al9qy-ingress",
            IngressConfigSpec {
                guest_cluster: GuestCluster {
                    id: "al9qy".to_string(),
                    namespace: "al9qy".to_string(),
                    service: "worker".to_string(),
                },
                host_cluster: HostCluster {
                    ingress_controller: IngressController {
                        config_map: "ingress-controller".to_string(),
                        namespace: "kube-system".to_string(),
                        service: "ingress-controller".to_string(),
                    },
                },
                protocol_ports: vec![],
            },
        )
    }

    fn api_error() -> HandlerError {
        HandlerError::Api(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "conflict".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }))
    }

    /// Handler whose desired_state fails a scripted number of times
    struct FlakyHandler {
        calls: Arc<AtomicU32>,
        failures: u32,
        permanent: bool,
    }

    #[async_trait]
    impl Handler for FlakyHandler {
        type Current = ();
        type Desired = u32;
        type Change = ();

        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn current_state(
            &self,
            _ctx: &ReconcileCtx,
            _obj: &IngressConfig,
        ) -> Result<Step<()>, HandlerError> {
            Ok(Step::Proceed(()))
        }

        async fn desired_state(
            &self,
            _ctx: &ReconcileCtx,
            _obj: &IngressConfig,
        ) -> Result<u32, HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                if self.permanent {
                    return Err(HandlerError::WrongType("scripted".to_string()));
                }
                return Err(api_error());
            }
            Ok(call)
        }

        fn update_patch(
            &self,
            _obj: &IngressConfig,
            _current: &(),
            _desired: &u32,
        ) -> Result<Patch<()>, HandlerError> {
            Ok(Patch::empty())
        }

        fn delete_patch(
            &self,
            _obj: &IngressConfig,
            _current: &(),
            _desired: &u32,
        ) -> Result<Patch<()>, HandlerError> {
            Ok(Patch::empty())
        }

        async fn apply_create(
            &self,
            _ctx: &ReconcileCtx,
            _obj: &IngressConfig,
            _change: (),
        ) -> Result<(), HandlerError> {
            Ok(())
        }

        async fn apply_update(
            &self,
            _ctx: &ReconcileCtx,
            _obj: &IngressConfig,
            _change: (),
        ) -> Result<(), HandlerError> {
            Ok(())
        }

        async fn apply_delete(
            &self,
            _ctx: &ReconcileCtx,
            _obj: &IngressConfig,
            _change: (),
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
        };

        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(3));
        assert_eq!(policy.delay(4), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let retried = Retried::new(
            FlakyHandler {
                calls: calls.clone(),
                failures: 2,
                permanent: false,
            },
            fast_policy(3),
        );

        let result = retried
            .desired_state(&ReconcileCtx::detached(), &test_object())
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhaust() {
        let calls = Arc::new(AtomicU32::new(0));
        let retried = Retried::new(
            FlakyHandler {
                calls: calls.clone(),
                failures: 10,
                permanent: false,
            },
            fast_policy(3),
        );

        let result = retried
            .desired_state(&ReconcileCtx::detached(), &test_object())
            .await;

        assert!(matches!(result, Err(HandlerError::Api(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let retried = Retried::new(
            FlakyHandler {
                calls: calls.clone(),
                failures: 10,
                permanent: true,
            },
            fast_policy(3),
        );

        let result = retried
            .desired_state(&ReconcileCtx::detached(), &test_object())
            .await;

        assert!(matches!(result, Err(HandlerError::WrongType(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_before_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let retried = Retried::new(
            FlakyHandler {
                calls: calls.clone(),
                failures: 0,
                permanent: false,
            },
            fast_policy(3),
        );

        let ctx = ReconcileCtx::detached();
        ctx.cancel.cancel();

        let result = retried.desired_state(&ctx, &test_object()).await;

        assert!(matches!(result, Err(HandlerError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let retried = Retried::new(
            FlakyHandler {
                calls: calls.clone(),
                failures: 10,
                permanent: false,
            },
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(60),
            },
        );

        let ctx = ReconcileCtx::detached();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let result = retried.desired_state(&ctx, &test_object()).await;

        assert!(matches!(result, Err(HandlerError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

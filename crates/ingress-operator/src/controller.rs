//! IngressConfig event loop
//!
//! Watches all IngressConfig objects and dispatches coalesced events to the
//! reconciler core. The runtime serialises reconciles per object; bursts
//! within the debounce window collapse into one run, and every successful
//! reconcile requeues after the resync period so drift heals without
//! external changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::controller::{Action, Config as ControllerConfig};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{HostApi, KubeHostApi};
use crate::config::OperatorConfig;
use crate::crd::IngressConfig;
use crate::error::{ErrorKind, HandlerError};
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::resource::observe::Observed;
use crate::resource::retry::{Retried, RetryPolicy};
use crate::resource::{ConfigMapHandler, ReconcileCtx, ServiceHandler};

/// Give up requeueing after this many failed reconciles of one object and
/// wait for it to change instead.
const MAX_RETRIES: u32 = 10;

/// Base delay for the error policy backoff (seconds)
const BASE_DELAY_SECS: u64 = 5;

/// Maximum delay between failed reconciles (1 hour)
const MAX_DELAY_SECS: u64 = 3600;

pub type ComposedConfigMap = Retried<Observed<ConfigMapHandler>>;
pub type ComposedService = Retried<Observed<ServiceHandler>>;

/// Shared state for the event loop
pub struct Context {
    pub reconciler: Reconciler<ComposedConfigMap, ComposedService>,
    pub attempts: AttemptTracker,
    pub cancel: CancellationToken,
}

/// Assemble the decorated handler chain and the reconciler core
///
/// Decorator order is fixed: retry wraps metrics wraps the handler, so the
/// metrics observe individual retry attempts.
pub fn build_context(
    client: Client,
    metrics: Arc<Metrics>,
    config: &OperatorConfig,
    cancel: CancellationToken,
) -> Arc<Context> {
    let api: Arc<dyn HostApi> = Arc::new(KubeHostApi::new(client));
    let policy = RetryPolicy {
        max_attempts: config.resource_retries,
        ..RetryPolicy::default()
    };

    let config_map = Retried::new(
        Observed::new(ConfigMapHandler::new(api.clone()), metrics.clone()),
        policy.clone(),
    );
    let service = Retried::new(
        Observed::new(ServiceHandler::new(api.clone()), metrics),
        policy,
    );

    Arc::new(Context {
        reconciler: Reconciler::new(api, config_map, service, config.resync),
        attempts: AttemptTracker::new(),
        cancel,
    })
}

/// Reconcile a single IngressConfig object
#[instrument(skip(obj, ctx), fields(
    namespace = %obj.metadata.namespace.as_deref().unwrap_or("default"),
    name = %obj.metadata.name.as_deref().unwrap_or("unknown"),
))]
pub(crate) async fn reconcile(
    obj: Arc<IngressConfig>,
    ctx: Arc<Context>,
) -> Result<Action, HandlerError> {
    let rctx = ReconcileCtx::new(ctx.cancel.child_token());
    let action = ctx.reconciler.reconcile(&rctx, &obj).await?;

    if let Some(uid) = obj.uid() {
        ctx.attempts.reset(&uid);
    }

    Ok(action)
}

/// Error policy with per-object exponential backoff
pub(crate) fn error_policy(
    obj: Arc<IngressConfig>,
    error: &HandlerError,
    ctx: Arc<Context>,
) -> Action {
    let uid = obj.uid().unwrap_or_else(|| "unknown".to_string());
    let attempt = ctx.attempts.increment(&uid);

    warn!(
        object = %obj.name_any(),
        error = %error,
        attempt,
        error_kind = ?error.kind(),
        "reconciliation failed"
    );

    compute_backoff(attempt, error.kind())
}

/// Run the IngressConfig controller until shutdown
pub async fn run(client: Client, ctx: Arc<Context>, rate_wait: Duration) {
    let objects: Api<IngressConfig> = Api::all(client);

    info!("starting IngressConfig controller");

    Controller::new(objects, WatcherConfig::default())
        .with_config(ControllerConfig::default().debounce(rate_wait))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                error!(error = ?e, "IngressConfig controller stream error");
            }
        })
        .await;
}

/// Tracks failed reconcile attempts per object
///
/// Uses `std::sync::Mutex` because the error policy callback is
/// synchronous.
#[derive(Debug, Default)]
pub struct AttemptTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Increment the attempt count for an object and return the new count
    pub fn increment(&self, uid: &str) -> u32 {
        let mut attempts = self.attempts.lock().expect("attempt tracker mutex poisoned");
        let count = attempts.entry(uid.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Forget an object's attempts after a successful reconcile
    pub fn reset(&self, uid: &str) {
        let mut attempts = self.attempts.lock().expect("attempt tracker mutex poisoned");
        attempts.remove(uid);
    }

    /// Current attempt count for an object
    pub fn get(&self, uid: &str) -> u32 {
        let attempts = self.attempts.lock().expect("attempt tracker mutex poisoned");
        attempts.get(uid).copied().unwrap_or(0)
    }
}

/// Requeue action for a failed reconcile
pub fn compute_backoff(attempt: u32, kind: ErrorKind) -> Action {
    match kind {
        ErrorKind::Transient => {
            if attempt >= MAX_RETRIES {
                warn!(
                    attempt,
                    max_retries = MAX_RETRIES,
                    "max retries exceeded, waiting for object change"
                );
                Action::await_change()
            } else {
                let delay_secs = BASE_DELAY_SECS * 2u64.pow(attempt.saturating_sub(1));
                let capped = delay_secs.min(MAX_DELAY_SECS);
                debug!(attempt, delay_secs = capped, "scheduling reconcile retry");
                Action::requeue(Duration::from_secs(capped))
            }
        }
        ErrorKind::Permanent => {
            // Retrying cannot help; the event is dropped until the object
            // changes.
            warn!("permanent error, waiting for object change");
            Action::await_change()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_tracker_increment() {
        let tracker = AttemptTracker::new();

        assert_eq!(tracker.get("uid-1"), 0);
        assert_eq!(tracker.increment("uid-1"), 1);
        assert_eq!(tracker.increment("uid-1"), 2);
        assert_eq!(tracker.get("uid-1"), 2);
        assert_eq!(tracker.get("uid-2"), 0);
    }

    #[test]
    fn test_attempt_tracker_reset() {
        let tracker = AttemptTracker::new();

        tracker.increment("uid-1");
        tracker.increment("uid-1");
        tracker.reset("uid-1");

        assert_eq!(tracker.get("uid-1"), 0);
    }

    #[test]
    fn test_compute_backoff_transient_requeues() {
        let action = compute_backoff(1, ErrorKind::Transient);
        assert!(format!("{action:?}").contains("Some"));

        let action = compute_backoff(5, ErrorKind::Transient);
        assert!(format!("{action:?}").contains("Some"));
    }

    #[test]
    fn test_compute_backoff_exhausted_waits_for_change() {
        let action = compute_backoff(MAX_RETRIES, ErrorKind::Transient);
        assert!(format!("{action:?}").contains("None"));
    }

    #[test]
    fn test_compute_backoff_permanent_waits_for_change() {
        let action = compute_backoff(1, ErrorKind::Permanent);
        assert!(format!("{action:?}").contains("None"));
    }
}

//! Reconciler core
//!
//! Orchestrates the resource handlers for one event. Handlers run in the
//! fixed order [ConfigMap, Service]; a cancellation skips the remaining
//! handlers. The cleanup finalizer is added before the first real
//! reconcile and removed only after a terminal delete reconcile in which
//! no handler asked to keep it.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use tracing::{debug, info};

use crate::client::HostApi;
use crate::crd::IngressConfig;
use crate::error::HandlerError;
use crate::finalizer;
use crate::key;
use crate::resource::{Cancellation, Handler, ReconcileCtx, Step};

/// How long to wait before retrying a blocked delete reconcile. Draining
/// tenant pods emit no events on the custom object, so the retry has to be
/// time based.
const DELETE_RETRY_WAIT: Duration = Duration::from_secs(60);

/// Outcome of running one handler cycle
#[derive(Debug)]
pub enum Flow {
    Completed,
    Cancelled(Cancellation),
}

/// Drives the fixed handler order for upsert and delete reconciles
pub struct Reconciler<CM, SVC> {
    api: Arc<dyn HostApi>,
    config_map: CM,
    service: SVC,
    resync: Duration,
}

impl<CM: Handler, SVC: Handler> Reconciler<CM, SVC> {
    pub fn new(api: Arc<dyn HostApi>, config_map: CM, service: SVC, resync: Duration) -> Self {
        Self {
            api,
            config_map,
            service,
            resync,
        }
    }

    /// Run one end-to-end reconcile for the object
    pub async fn reconcile(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Action, HandlerError> {
        if key::is_deleted(obj) {
            self.reconcile_delete(ctx, obj).await
        } else {
            self.reconcile_upsert(ctx, obj).await
        }
    }

    async fn reconcile_upsert(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Action, HandlerError> {
        let (namespace, name) = coordinates(obj)?;

        // The finalizer add bumps the resource version, so the real work
        // happens on the event that follows.
        if !finalizer::has_cleanup(obj) {
            let finalizers = finalizer::with_cleanup(obj);
            self.api.set_finalizers(namespace, name, &finalizers).await?;
            debug!(
                object = %name,
                cluster = %key::cluster_id(obj),
                "added cleanup finalizer, deferring reconcile to the next event"
            );
            return Ok(Action::requeue(self.resync));
        }

        if let Flow::Cancelled(_) = run_upsert(&self.config_map, ctx, obj).await? {
            debug!(
                object = %name,
                handler = self.config_map.name(),
                "handler cancelled the reconcile, skipping remaining handlers"
            );
            return Ok(Action::requeue(self.resync));
        }
        if let Flow::Cancelled(_) = run_upsert(&self.service, ctx, obj).await? {
            debug!(
                object = %name,
                handler = self.service.name(),
                "handler cancelled the reconcile"
            );
        }

        Ok(Action::requeue(self.resync))
    }

    async fn reconcile_delete(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Action, HandlerError> {
        let (namespace, name) = coordinates(obj)?;

        let flow = match run_delete(&self.config_map, ctx, obj).await? {
            Flow::Completed => run_delete(&self.service, ctx, obj).await?,
            cancelled => cancelled,
        };

        match flow {
            Flow::Cancelled(cancellation) => {
                debug!(
                    object = %name,
                    cluster = %key::cluster_id(obj),
                    keep_finalizer = cancellation.keep_finalizer,
                    "deletion blocked, retrying later"
                );
                Ok(Action::requeue(DELETE_RETRY_WAIT))
            }
            Flow::Completed => {
                if finalizer::has_cleanup(obj) {
                    let finalizers = finalizer::without_cleanup(obj);
                    self.api.set_finalizers(namespace, name, &finalizers).await?;
                    info!(
                        object = %name,
                        cluster = %key::cluster_id(obj),
                        "removed cleanup finalizer"
                    );
                }
                Ok(Action::await_change())
            }
        }
    }
}

/// Read, diff, and apply one handler for an upsert event
async fn run_upsert<H: Handler>(
    handler: &H,
    ctx: &ReconcileCtx,
    obj: &IngressConfig,
) -> Result<Flow, HandlerError> {
    let current = match handler.current_state(ctx, obj).await? {
        Step::Proceed(current) => current,
        Step::Cancel(cancellation) => return Ok(Flow::Cancelled(cancellation)),
    };
    let desired = handler.desired_state(ctx, obj).await?;
    let patch = handler.update_patch(obj, &current, &desired)?;

    if let Some(change) = patch.create {
        handler.apply_create(ctx, obj, change).await?;
    }
    if let Some(change) = patch.update {
        handler.apply_update(ctx, obj, change).await?;
    }

    Ok(Flow::Completed)
}

/// Read, diff, and apply one handler for a delete event
///
/// The desired state is the same as for an upsert; the delete diff inside
/// the handler turns it into the set of entries to purge.
async fn run_delete<H: Handler>(
    handler: &H,
    ctx: &ReconcileCtx,
    obj: &IngressConfig,
) -> Result<Flow, HandlerError> {
    let current = match handler.current_state(ctx, obj).await? {
        Step::Proceed(current) => current,
        Step::Cancel(cancellation) => return Ok(Flow::Cancelled(cancellation)),
    };
    let desired = handler.desired_state(ctx, obj).await?;
    let patch = handler.delete_patch(obj, &current, &desired)?;

    if let Some(change) = patch.delete {
        handler.apply_delete(ctx, obj, change).await?;
    }

    Ok(Flow::Completed)
}

fn coordinates(obj: &IngressConfig) -> Result<(&str, &str), HandlerError> {
    let namespace = obj.metadata.namespace.as_deref().ok_or_else(|| {
        HandlerError::WrongType("object without metadata.namespace".to_string())
    })?;
    let name = obj
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| HandlerError::WrongType("object without metadata.name".to_string()))?;
    Ok((namespace, name))
}

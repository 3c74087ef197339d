//! Resource handler abstraction
//!
//! Each handler reconciles one shared host cluster resource against the
//! desired state derived from an IngressConfig object. Handlers declare
//! concrete typed state; the reconciler core composes them generically and
//! never inspects their payloads.

pub mod configmap;
pub mod observe;
pub mod retry;
pub mod service;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::crd::IngressConfig;
use crate::error::HandlerError;

pub use configmap::ConfigMapHandler;
pub use service::ServiceHandler;

/// Per-reconcile call context threaded into every handler operation
#[derive(Clone)]
pub struct ReconcileCtx {
    /// Cancelling this token aborts pending retries and backoff sleeps
    pub cancel: CancellationToken,
}

impl ReconcileCtx {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// A context that is never cancelled
    pub fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }
}

/// A handler's request to stop the current reconcile early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancellation {
    /// Keep the cleanup finalizer so deletion is retried later
    pub keep_finalizer: bool,
}

/// Outcome of a single handler step
#[derive(Debug)]
pub enum Step<T> {
    /// Continue the reconcile with the produced state
    Proceed(T),
    /// Skip the remaining handlers for this reconcile
    Cancel(Cancellation),
}

impl<T> Step<T> {
    /// Cancel the reconcile and keep the cleanup finalizer in place
    pub fn cancel_keep_finalizer() -> Self {
        Step::Cancel(Cancellation {
            keep_finalizer: true,
        })
    }
}

/// A patch carrying up to three changes derived from one diff
///
/// Changes are opaque to the reconciler core and interpreted by the owning
/// handler's apply operations. An absent change means there is nothing to
/// write for that action.
#[derive(Debug)]
pub struct Patch<C> {
    pub create: Option<C>,
    pub update: Option<C>,
    pub delete: Option<C>,
}

impl<C> Patch<C> {
    pub fn empty() -> Self {
        Self {
            create: None,
            update: None,
            delete: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_none() && self.update.is_none() && self.delete.is_none()
    }
}

impl<C> Default for Patch<C> {
    fn default() -> Self {
        Self::empty()
    }
}

/// One reconciled child resource of an IngressConfig object
///
/// Operations run in the fixed order read current, compute desired, diff,
/// apply. Every reconcile owns its own current, desired, and patch values;
/// state flows only through the API server.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Live state fetched from the API server
    type Current: Send + Sync;
    /// State derived from the custom object alone
    type Desired: Send + Sync;
    /// Payload of a single change, applied by this handler
    type Change: Clone + Send + Sync;

    /// Identifier used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Fetch the live state of the managed resource
    ///
    /// On the deletion flow a handler may cancel the reconcile here when a
    /// deletion precondition is unmet.
    async fn current_state(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Step<Self::Current>, HandlerError>;

    /// Compute the desired state from the custom object
    async fn desired_state(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Self::Desired, HandlerError>;

    /// Diff current against desired for an upsert reconcile
    fn update_patch(
        &self,
        obj: &IngressConfig,
        current: &Self::Current,
        desired: &Self::Desired,
    ) -> Result<Patch<Self::Change>, HandlerError>;

    /// Diff current against desired for a delete reconcile
    fn delete_patch(
        &self,
        obj: &IngressConfig,
        current: &Self::Current,
        desired: &Self::Desired,
    ) -> Result<Patch<Self::Change>, HandlerError>;

    /// Apply the create change
    async fn apply_create(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Self::Change,
    ) -> Result<(), HandlerError>;

    /// Apply the update change
    async fn apply_update(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Self::Change,
    ) -> Result<(), HandlerError>;

    /// Apply the delete change
    async fn apply_delete(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Self::Change,
    ) -> Result<(), HandlerError>;
}

//! Metrics decorator for resource handlers
//!
//! Records per-operation timing and error counters keyed by handler name
//! and operation name. Composed inside the retry decorator so every retry
//! attempt is observed.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::crd::IngressConfig;
use crate::error::HandlerError;
use crate::metrics::Metrics;

use super::{Handler, Patch, ReconcileCtx, Step};

/// Handler decorator adding operation metrics
pub struct Observed<H> {
    inner: H,
    metrics: Arc<Metrics>,
}

impl<H> Observed<H> {
    pub fn new(inner: H, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }

    fn record<T>(
        &self,
        operation: &str,
        started: Instant,
        result: Result<T, HandlerError>,
    ) -> Result<T, HandlerError>
    where
        H: Handler,
    {
        self.metrics.observe(
            self.inner.name(),
            operation,
            started.elapsed(),
            result.is_err(),
        );
        result
    }
}

#[async_trait]
impl<H: Handler> Handler for Observed<H> {
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
        let started = Instant::now();
        let result = self.inner.current_state(ctx, obj).await;
        self.record("current_state", started, result)
    }

    async fn desired_state(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Self::Desired, HandlerError> {
        let started = Instant::now();
        let result = self.inner.desired_state(ctx, obj).await;
        self.record("desired_state", started, result)
    }

    fn update_patch(
        &self,
        obj: &IngressConfig,
        current: &Self::Current,
        desired: &Self::Desired,
    ) -> Result<Patch<Self::Change>, HandlerError> {
        let started = Instant::now();
        let result = self.inner.update_patch(obj, current, desired);
        self.record("update_patch", started, result)
    }

    fn delete_patch(
        &self,
        obj: &IngressConfig,
        current: &Self::Current,
        desired: &Self::Desired,
    ) -> Result<Patch<Self::Change>, HandlerError> {
        let started = Instant::now();
        let result = self.inner.delete_patch(obj, current, desired);
        self.record("delete_patch", started, result)
    }

    async fn apply_create(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Self::Change,
    ) -> Result<(), HandlerError> {
        let started = Instant::now();
        let result = self.inner.apply_create(ctx, obj, change).await;
        self.record("apply_create", started, result)
    }

    async fn apply_update(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Self::Change,
    ) -> Result<(), HandlerError> {
        let started = Instant::now();
        let result = self.inner.apply_update(ctx, obj, change).await;
        self.record("apply_update", started, result)
    }

    async fn apply_delete(
        &self,
        ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Self::Change,
    ) -> Result<(), HandlerError> {
        let started = Instant::now();
        let result = self.inner.apply_delete(ctx, obj, change).await;
        self.record("apply_delete", started, result)
    }
}

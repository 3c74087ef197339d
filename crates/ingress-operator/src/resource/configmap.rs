//! ConfigMap resource handler
//!
//! Reconciles the per-tenant subset of the host cluster ingress controller
//! ConfigMap. Keys are decimal load balancer ports, values point at the
//! guest cluster endpoint. Keys not owned by the object are preserved
//! verbatim.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{debug, info};

use crate::client::HostApi;
use crate::crd::IngressConfig;
use crate::error::HandlerError;
use crate::key;

use super::{Handler, Patch, ReconcileCtx, Step};

pub struct ConfigMapHandler {
    api: Arc<dyn HostApi>,
}

impl ConfigMapHandler {
    pub fn new(api: Arc<dyn HostApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Handler for ConfigMapHandler {
    type Current = ConfigMap;
    type Desired = BTreeMap<String, String>;
    type Change = ConfigMap;

    fn name(&self) -> &'static str {
        "configmap"
    }

    async fn current_state(
        &self,
        _ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Step<ConfigMap>, HandlerError> {
        let target = &obj.spec.host_cluster.ingress_controller;
        let mut config_map = self
            .api
            .get_config_map(&target.namespace, &target.config_map)
            .await?;

        // Ensure the map is assignable even when the config map carries no
        // data at all.
        if config_map.data.is_none() {
            config_map.data = Some(BTreeMap::new());
        }

        debug!(
            cluster = %key::cluster_id(obj),
            config_map = %target.config_map,
            "fetched current config map state"
        );

        // On cluster deletion the config map data is still needed for
        // draining the tenant nodes. As long as pods exist in the tenant
        // namespace the cleanup is delayed; once the delete event is
        // replayed against an empty namespace the data is removed as usual.
        if key::is_deleted(obj) {
            let namespace = key::cluster_namespace(obj);
            if self.api.namespace_has_pods(namespace).await? {
                debug!(
                    cluster = %key::cluster_id(obj),
                    namespace = %namespace,
                    "tenant pods still exist, delaying config map cleanup"
                );
                return Ok(Step::cancel_keep_finalizer());
            }
        }

        Ok(Step::Proceed(config_map))
    }

    async fn desired_state(
        &self,
        _ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<BTreeMap<String, String>, HandlerError> {
        let guest = &obj.spec.guest_cluster;
        let desired = obj
            .spec
            .protocol_ports
            .iter()
            .map(|p| {
                (
                    key::data_key(p.lb_port),
                    key::data_value(&guest.namespace, &guest.service, p.ingress_port),
                )
            })
            .collect::<BTreeMap<_, _>>();

        debug!(
            cluster = %key::cluster_id(obj),
            entries = desired.len(),
            "computed desired config map state"
        );

        Ok(desired)
    }

    fn update_patch(
        &self,
        obj: &IngressConfig,
        current: &ConfigMap,
        desired: &BTreeMap<String, String>,
    ) -> Result<Patch<ConfigMap>, HandlerError> {
        let update = update_change(current, desired);

        debug!(
            cluster = %key::cluster_id(obj),
            update = update.is_some(),
            "computed config map update patch"
        );

        Ok(Patch {
            create: None,
            update,
            delete: None,
        })
    }

    fn delete_patch(
        &self,
        obj: &IngressConfig,
        current: &ConfigMap,
        desired: &BTreeMap<String, String>,
    ) -> Result<Patch<ConfigMap>, HandlerError> {
        let delete = delete_change(current, desired);

        debug!(
            cluster = %key::cluster_id(obj),
            delete = delete.is_some(),
            "computed config map delete patch"
        );

        Ok(Patch {
            create: None,
            update: None,
            delete,
        })
    }

    async fn apply_create(
        &self,
        _ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: ConfigMap,
    ) -> Result<(), HandlerError> {
        let target = &obj.spec.host_cluster.ingress_controller;
        self.api.update_config_map(&target.namespace, &change).await?;
        info!(
            cluster = %key::cluster_id(obj),
            config_map = %target.config_map,
            "created the config map data in the Kubernetes API"
        );
        Ok(())
    }

    async fn apply_update(
        &self,
        _ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: ConfigMap,
    ) -> Result<(), HandlerError> {
        let target = &obj.spec.host_cluster.ingress_controller;
        self.api.update_config_map(&target.namespace, &change).await?;
        info!(
            cluster = %key::cluster_id(obj),
            config_map = %target.config_map,
            "updated the config map data in the Kubernetes API"
        );
        Ok(())
    }

    async fn apply_delete(
        &self,
        _ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: ConfigMap,
    ) -> Result<(), HandlerError> {
        let target = &obj.spec.host_cluster.ingress_controller;
        self.api.update_config_map(&target.namespace, &change).await?;
        info!(
            cluster = %key::cluster_id(obj),
            config_map = %target.config_map,
            "deleted the config map data in the Kubernetes API"
        );
        Ok(())
    }
}

/// Whether the data map already carries exactly this key and value
fn in_data(data: &BTreeMap<String, String>, k: &str, v: &str) -> bool {
    data.get(k).is_some_and(|current| current == v)
}

/// Current state plus every desired entry that is absent or differs
///
/// Missing and drifted keys go into one merged change, so a reconcile
/// issues at most one write against the fetched object.
fn update_change(
    current: &ConfigMap,
    desired: &BTreeMap<String, String>,
) -> Option<ConfigMap> {
    let mut updated = current.clone();
    let data = updated.data.get_or_insert_with(BTreeMap::new);

    let mut count = 0;
    for (k, v) in desired {
        if !in_data(data, k, v) {
            data.insert(k.clone(), v.clone());
            count += 1;
        }
    }

    (count > 0).then_some(updated)
}

/// Current state minus exactly the entries matching canonical desired pairs
///
/// The current state fetched from the API server is the source of truth;
/// everything not owned by this object is carried over untouched.
fn delete_change(
    current: &ConfigMap,
    desired: &BTreeMap<String, String>,
) -> Option<ConfigMap> {
    let mut updated = current.clone();
    let data = updated.data.get_or_insert_with(BTreeMap::new);

    let before = data.len();
    data.retain(|k, v| !in_data(desired, k, v));

    (data.len() < before).then_some(updated)
}

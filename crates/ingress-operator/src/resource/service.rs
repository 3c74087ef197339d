//! Service resource handler
//!
//! Reconciles the per-tenant subset of the host cluster load balancer
//! Service port list. Port names embed the guest cluster ID, so names never
//! collide across tenants; ports not owned by the object are preserved.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, info, warn};

use crate::client::HostApi;
use crate::crd::IngressConfig;
use crate::error::HandlerError;
use crate::key;

use super::{Handler, Patch, ReconcileCtx, Step};

pub struct ServiceHandler {
    api: Arc<dyn HostApi>,
}

impl ServiceHandler {
    pub fn new(api: Arc<dyn HostApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Handler for ServiceHandler {
    type Current = Service;
    type Desired = Vec<ServicePort>;
    type Change = Service;

    fn name(&self) -> &'static str {
        "service"
    }

    async fn current_state(
        &self,
        _ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Step<Service>, HandlerError> {
        let target = &obj.spec.host_cluster.ingress_controller;
        let mut service = self
            .api
            .get_service(&target.namespace, &target.service)
            .await?;

        // Ensure the port list is assignable even when the service carries
        // no ports at all.
        service
            .spec
            .get_or_insert_with(Default::default)
            .ports
            .get_or_insert_with(Vec::new);

        debug!(
            cluster = %key::cluster_id(obj),
            service = %target.service,
            "fetched current service state"
        );

        // Same guard as the config map handler: while tenant pods exist the
        // service ports are still needed for draining, so deletion is
        // delayed until the delete event is replayed against an empty
        // namespace.
        if key::is_deleted(obj) {
            let namespace = key::cluster_namespace(obj);
            if self.api.namespace_has_pods(namespace).await? {
                debug!(
                    cluster = %key::cluster_id(obj),
                    namespace = %namespace,
                    "tenant pods still exist, delaying service cleanup"
                );
                return Ok(Step::cancel_keep_finalizer());
            }
        }

        Ok(Step::Proceed(service))
    }

    async fn desired_state(
        &self,
        _ctx: &ReconcileCtx,
        obj: &IngressConfig,
    ) -> Result<Vec<ServicePort>, HandlerError> {
        let desired = obj
            .spec
            .protocol_ports
            .iter()
            .map(|p| canonical_port(obj, p.protocol.as_str(), p.ingress_port, p.lb_port))
            .collect::<Vec<_>>();

        debug!(
            cluster = %key::cluster_id(obj),
            ports = desired.len(),
            "computed desired service state"
        );

        Ok(desired)
    }

    fn update_patch(
        &self,
        obj: &IngressConfig,
        current: &Service,
        desired: &Vec<ServicePort>,
    ) -> Result<Patch<Service>, HandlerError> {
        let mut updated = current.clone();
        let ports = updated
            .spec
            .get_or_insert_with(Default::default)
            .ports
            .get_or_insert_with(Vec::new);

        let mut count = 0;
        for desired_port in desired {
            let existing_name = match port_by_number(ports, desired_port.port) {
                Ok(p) => p.name.clone(),
                Err(err) if err.is_port_not_found() => {
                    ports.push(desired_port.clone());
                    count += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            if existing_name != desired_port.name {
                warn!(
                    cluster = %key::cluster_id(obj),
                    port = desired_port.port,
                    "found orphaned service port, overwriting it with desired service port"
                );
                if let Some(i) = ports.iter().position(|p| p.port == desired_port.port) {
                    ports[i] = desired_port.clone();
                    count += 1;
                }
            }
        }

        debug!(
            cluster = %key::cluster_id(obj),
            count,
            "found service ports that have to be updated"
        );

        Ok(Patch {
            create: None,
            update: (count > 0).then_some(updated),
            delete: None,
        })
    }

    fn delete_patch(
        &self,
        obj: &IngressConfig,
        current: &Service,
        desired: &Vec<ServicePort>,
    ) -> Result<Patch<Service>, HandlerError> {
        let mut updated = current.clone();
        let ports = updated
            .spec
            .get_or_insert_with(Default::default)
            .ports
            .get_or_insert_with(Vec::new);

        // Leave only the ports not owned by this object; the current state
        // fetched from the API server is the source of truth.
        let before = ports.len();
        ports.retain(|p| !in_service_ports(desired, p));
        let count = before - ports.len();

        debug!(
            cluster = %key::cluster_id(obj),
            count,
            "found service ports that have to be deleted"
        );

        Ok(Patch {
            create: None,
            update: None,
            delete: (count > 0).then_some(updated),
        })
    }

    async fn apply_create(
        &self,
        _ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Service,
    ) -> Result<(), HandlerError> {
        let target = &obj.spec.host_cluster.ingress_controller;
        self.api.update_service(&target.namespace, &change).await?;
        info!(
            cluster = %key::cluster_id(obj),
            service = %target.service,
            "created the service data in the Kubernetes API"
        );
        Ok(())
    }

    async fn apply_update(
        &self,
        _ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Service,
    ) -> Result<(), HandlerError> {
        let target = &obj.spec.host_cluster.ingress_controller;
        self.api.update_service(&target.namespace, &change).await?;
        info!(
            cluster = %key::cluster_id(obj),
            service = %target.service,
            "updated the service data in the Kubernetes API"
        );
        Ok(())
    }

    async fn apply_delete(
        &self,
        _ctx: &ReconcileCtx,
        obj: &IngressConfig,
        change: Service,
    ) -> Result<(), HandlerError> {
        let target = &obj.spec.host_cluster.ingress_controller;
        self.api.update_service(&target.namespace, &change).await?;
        info!(
            cluster = %key::cluster_id(obj),
            service = %target.service,
            "deleted the service data in the Kubernetes API"
        );
        Ok(())
    }
}

/// The canonical port entry for one protocol port of the object
fn canonical_port(
    obj: &IngressConfig,
    protocol: &str,
    ingress_port: i32,
    lb_port: i32,
) -> ServicePort {
    ServicePort {
        name: Some(key::port_name(protocol, ingress_port, key::cluster_id(obj))),
        protocol: Some("TCP".to_string()),
        port: lb_port,
        target_port: Some(IntOrString::Int(lb_port)),
        node_port: Some(lb_port),
        app_protocol: None,
    }
}

/// Look up a current port by its numeric port
fn port_by_number(ports: &[ServicePort], port: i32) -> Result<&ServicePort, HandlerError> {
    ports
        .iter()
        .find(|p| p.port == port)
        .ok_or(HandlerError::PortNotFound(port))
}

/// Canonical port tuple equality: name, protocol, port, target, node
fn same_port(a: &ServicePort, b: &ServicePort) -> bool {
    a.name == b.name
        && a.protocol == b.protocol
        && a.port == b.port
        && a.target_port == b.target_port
        && a.node_port == b.node_port
}

fn in_service_ports(ports: &[ServicePort], candidate: &ServicePort) -> bool {
    ports.iter().any(|p| same_port(p, candidate))
}

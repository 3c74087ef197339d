//! IngressConfig custom resource definition
//!
//! One IngressConfig object describes a single tenant-to-ingress forwarding
//! relation: which guest cluster service receives traffic, and which host
//! cluster ConfigMap and Service carry the per-tenant entries for it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The guest cluster side of the forwarding relation
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuestCluster {
    /// Short tenant identifier, e.g. `al9qy`
    pub id: String,
    /// Namespace inside the tenant cluster
    pub namespace: String,
    /// Service inside that namespace that receives traffic
    pub service: String,
}

/// The host cluster side of the forwarding relation
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostCluster {
    pub ingress_controller: IngressController,
}

/// Coordinates of the shared ingress controller resources to edit
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressController {
    /// Name of the TCP services ConfigMap
    pub config_map: String,
    /// Namespace of the ConfigMap and the Service
    pub namespace: String,
    /// Name of the load balancer Service
    pub service: String,
}

/// One forwarded port triple
///
/// `lb_port` values are unique within one object, as are
/// `(protocol, ingress_port)` pairs. The operator relies on this but does
/// not enforce it.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolPort {
    pub protocol: String,
    /// Port of the ingress controller within the guest cluster
    pub ingress_port: i32,
    /// Port on the host cluster load balancer
    pub lb_port: i32,
}

/// IngressConfig spec
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "core.giantswarm.io",
    version = "v1alpha1",
    kind = "IngressConfig",
    plural = "ingressconfigs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfigSpec {
    pub guest_cluster: GuestCluster,
    pub host_cluster: HostCluster,
    #[serde(default)]
    pub protocol_ports: Vec<ProtocolPort>,
}

//! Identity helpers for IngressConfig objects
//!
//! The canonical key, value, and port name formats below are the only way
//! the resource handlers recognise their own entries inside the shared
//! ConfigMap and Service. Entries that do not match these formats for a
//! given object belong to someone else and are never touched.

use crate::crd::IngressConfig;

/// Short tenant identifier of the guest cluster
pub fn cluster_id(obj: &IngressConfig) -> &str {
    &obj.spec.guest_cluster.id
}

/// Namespace inside the tenant cluster
///
/// The schema owner keeps this equal to the cluster ID; the operator reads
/// it from the spec and never substitutes one for the other.
pub fn cluster_namespace(obj: &IngressConfig) -> &str {
    &obj.spec.guest_cluster.namespace
}

/// Whether the object has been marked for deletion
pub fn is_deleted(obj: &IngressConfig) -> bool {
    obj.metadata.deletion_timestamp.is_some()
}

/// Canonical service port name
///
/// Combines the protocol, the port of the ingress controller within the
/// guest cluster and the guest cluster ID, in this order. E.g.:
///
/// ```text
/// http-30010-al9qy
/// https-30011-al9qy
/// ```
pub fn port_name(protocol: &str, ingress_port: i32, cluster_id: &str) -> String {
    format!("{protocol}-{ingress_port}-{cluster_id}")
}

/// Canonical ConfigMap data key: the decimal load balancer port
pub fn data_key(lb_port: i32) -> String {
    lb_port.to_string()
}

/// Canonical ConfigMap data value
///
/// Combines the namespace of the guest cluster, the service name used to
/// send traffic to and the port of the ingress controller within the guest
/// cluster. E.g.:
///
/// ```text
/// al9qy/worker:30010
/// al9qy/worker:30011
/// ```
pub fn data_value(namespace: &str, service: &str, ingress_port: i32) -> String {
    format!("{namespace}/{service}:{ingress_port}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GuestCluster, HostCluster, IngressConfigSpec, IngressController};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

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

    #[test]
    fn test_cluster_id_and_namespace() {
        let obj = test_object();
        assert_eq!(cluster_id(&obj), "al9qy");
        assert_eq!(cluster_namespace(&obj), "al9qy");
    }

    #[test]
    fn test_is_deleted() {
        let mut obj = test_object();
        assert!(!is_deleted(&obj));

        obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(is_deleted(&obj));
    }

    #[test]
    fn test_port_name() {
        assert_eq!(port_name("http", 30010, "al9qy"), "http-30010-al9qy");
        assert_eq!(port_name("udp", 30012, "p1l6x"), "udp-30012-p1l6x");
    }

    #[test]
    fn test_data_key() {
        assert_eq!(data_key(31000), "31000");
    }

    #[test]
    fn test_data_value() {
        assert_eq!(data_value("al9qy", "worker", 30010), "al9qy/worker:30010");
    }
}

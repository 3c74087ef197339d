//! Cleanup finalizer bookkeeping
//!
//! Every managed object carries the cleanup finalizer so the API server
//! keeps it around until the operator has purged the per-tenant entries
//! from the shared host cluster resources.

use crate::crd::IngressConfig;

/// Marker preventing deletion of an object before its entries are cleaned up
pub const CLEANUP_FINALIZER: &str = "ingress-operator.giantswarm.io/custom-object-cleanup";

/// Whether the object already carries the cleanup finalizer
pub fn has_cleanup(obj: &IngressConfig) -> bool {
    obj.metadata
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|f| f == CLEANUP_FINALIZER)
}

/// The object's finalizer list with the cleanup finalizer appended
pub fn with_cleanup(obj: &IngressConfig) -> Vec<String> {
    let mut finalizers = obj
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default();
    if !finalizers.iter().any(|f| f == CLEANUP_FINALIZER) {
        finalizers.push(CLEANUP_FINALIZER.to_string());
    }
    finalizers
}

/// The object's finalizer list with the cleanup finalizer removed
pub fn without_cleanup(obj: &IngressConfig) -> Vec<String> {
    obj.metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != CLEANUP_FINALIZER)
        .collect()
}

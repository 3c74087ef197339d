//! CRD bootstrap
//!
//! Submits the IngressConfig custom resource definition on startup via
//! server-side apply and waits for the API server to report it as
//! established. The event loop does not start before that.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tracing::{debug, info, warn};

use crate::crd::IngressConfig;

/// How long to wait between establishment polls
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How many polls before giving up and aborting startup
const MAX_POLLS: u32 = 30;

/// Ensure the IngressConfig definition exists and is established
///
/// An already existing definition is updated in place and counts as
/// success.
pub async fn ensure_crd_established(client: &Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd = IngressConfig::crd();
    let name = crd
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| "ingressconfigs.core.giantswarm.io".to_string());

    info!(crd = %name, "submitting IngressConfig custom resource definition");
    let params = PatchParams::apply("ingress-operator").force();
    crds.patch(&name, &params, &Patch::Apply(&crd))
        .await
        .with_context(|| format!("failed to apply custom resource definition {name}"))?;

    for attempt in 1..=MAX_POLLS {
        match crds.get(&name).await {
            Ok(live) if is_established(&live) => {
                info!(crd = %name, "custom resource definition is established");
                return Ok(());
            }
            Ok(_) => {
                debug!(crd = %name, attempt, "custom resource definition not yet established");
            }
            Err(e) => {
                warn!(crd = %name, attempt, error = %e, "failed to read custom resource definition");
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    bail!("custom resource definition {name} was not established after {MAX_POLLS} polls")
}

/// Whether the API server reports the definition as established
pub fn is_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinitionCondition, CustomResourceDefinitionStatus,
    };

    fn crd_with_conditions(
        conditions: Vec<CustomResourceDefinitionCondition>,
    ) -> CustomResourceDefinition {
        let mut crd = IngressConfig::crd();
        crd.status = Some(CustomResourceDefinitionStatus {
            conditions: Some(conditions),
            ..Default::default()
        });
        crd
    }

    fn condition(type_: &str, status: &str) -> CustomResourceDefinitionCondition {
        CustomResourceDefinitionCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_established_condition_true() {
        let crd = crd_with_conditions(vec![
            condition("NamesAccepted", "True"),
            condition("Established", "True"),
        ]);
        assert!(is_established(&crd));
    }

    #[test]
    fn test_established_condition_false() {
        let crd = crd_with_conditions(vec![condition("Established", "False")]);
        assert!(!is_established(&crd));
    }

    #[test]
    fn test_missing_status_is_not_established() {
        assert!(!is_established(&IngressConfig::crd()));
    }
}

//! Operator configuration
//!
//! Loaded from `INGRESS_OPERATOR_*` environment variables with validated
//! defaults. The API endpoint override builds a minimal kubeconfig for
//! out-of-cluster use; without it the ambient kubeconfig or in-cluster
//! service account is used.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::health::DEFAULT_HEALTH_PORT;

pub const ENV_API_ENDPOINT: &str = "INGRESS_OPERATOR_API_ENDPOINT";
pub const ENV_IN_CLUSTER: &str = "INGRESS_OPERATOR_IN_CLUSTER";
pub const ENV_TLS_CA_FILE: &str = "INGRESS_OPERATOR_TLS_CA_FILE";
pub const ENV_TLS_CRT_FILE: &str = "INGRESS_OPERATOR_TLS_CRT_FILE";
pub const ENV_TLS_KEY_FILE: &str = "INGRESS_OPERATOR_TLS_KEY_FILE";
pub const ENV_PROJECT_NAME: &str = "INGRESS_OPERATOR_PROJECT_NAME";
pub const ENV_RESYNC_SECONDS: &str = "INGRESS_OPERATOR_RESYNC_SECONDS";
pub const ENV_RATE_WAIT_SECONDS: &str = "INGRESS_OPERATOR_RATE_WAIT_SECONDS";
pub const ENV_RESOURCE_RETRIES: &str = "INGRESS_OPERATOR_RESOURCE_RETRIES";
pub const ENV_HEALTH_PORT: &str = "INGRESS_OPERATOR_HEALTH_PORT";

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// API server endpoint override for out-of-cluster use
    pub api_endpoint: Option<String>,
    /// Expect in-cluster service account credentials
    pub in_cluster: bool,
    /// Certificate authority file for the endpoint override
    pub tls_ca_file: Option<PathBuf>,
    /// Client certificate file for the endpoint override
    pub tls_crt_file: Option<PathBuf>,
    /// Client key file for the endpoint override
    pub tls_key_file: Option<PathBuf>,
    /// Project name used as the metrics namespace
    pub project_name: String,
    /// Period after which every live object is reconciled again
    pub resync: Duration,
    /// Window within which bursts of events coalesce into one reconcile
    pub rate_wait: Duration,
    /// Maximum attempts per handler operation
    pub resource_retries: u32,
    /// Port of the health and version HTTP server
    pub health_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            api_endpoint: None,
            in_cluster: true,
            tls_ca_file: None,
            tls_crt_file: None,
            tls_key_file: None,
            project_name: "ingress-operator".to_string(),
            resync: Duration::from_secs(300),
            rate_wait: Duration::from_secs(10),
            resource_retries: 3,
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

impl OperatorConfig {
    /// Load the configuration from the environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.api_endpoint = env_var(ENV_API_ENDPOINT);
        if let Some(in_cluster) = env_var(ENV_IN_CLUSTER) {
            config.in_cluster = in_cluster
                .parse()
                .with_context(|| format!("{ENV_IN_CLUSTER} must be true or false"))?;
        }
        config.tls_ca_file = env_var(ENV_TLS_CA_FILE).map(PathBuf::from);
        config.tls_crt_file = env_var(ENV_TLS_CRT_FILE).map(PathBuf::from);
        config.tls_key_file = env_var(ENV_TLS_KEY_FILE).map(PathBuf::from);
        if let Some(project_name) = env_var(ENV_PROJECT_NAME) {
            config.project_name = project_name;
        }
        if let Some(secs) = env_var(ENV_RESYNC_SECONDS) {
            config.resync = Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("{ENV_RESYNC_SECONDS} must be a number of seconds"))?,
            );
        }
        if let Some(secs) = env_var(ENV_RATE_WAIT_SECONDS) {
            config.rate_wait = Duration::from_secs(secs.parse().with_context(|| {
                format!("{ENV_RATE_WAIT_SECONDS} must be a number of seconds")
            })?);
        }
        if let Some(retries) = env_var(ENV_RESOURCE_RETRIES) {
            config.resource_retries = retries
                .parse()
                .with_context(|| format!("{ENV_RESOURCE_RETRIES} must be a number"))?;
        }
        if let Some(port) = env_var(ENV_HEALTH_PORT) {
            config.health_port = port
                .parse()
                .with_context(|| format!("{ENV_HEALTH_PORT} must be a port number"))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check construction-time preconditions
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.project_name.is_empty(), "project name cannot be empty");
        ensure!(
            self.resource_retries >= 1,
            "resource retries must be at least 1"
        );
        ensure!(!self.resync.is_zero(), "resync period cannot be zero");
        ensure!(!self.rate_wait.is_zero(), "rate wait cannot be zero");
        ensure!(
            self.api_endpoint.is_none() || !self.in_cluster,
            "an API endpoint override conflicts with in-cluster credentials"
        );
        Ok(())
    }
}

/// Build a Kubernetes client for the configuration
pub async fn kube_client(config: &OperatorConfig) -> Result<Client> {
    match &config.api_endpoint {
        Some(endpoint) => {
            let kubeconfig = custom_kubeconfig(
                endpoint,
                config.tls_ca_file.as_deref(),
                config.tls_crt_file.as_deref(),
                config.tls_key_file.as_deref(),
            )?;
            let kube_config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("failed to build client config from endpoint override")?;
            Client::try_from(kube_config).context("failed to create Kubernetes client")
        }
        None => Client::try_default()
            .await
            .context("failed to create Kubernetes client"),
    }
}

/// A single-context kubeconfig pointing at the endpoint override
fn custom_kubeconfig(
    endpoint: &str,
    ca_file: Option<&Path>,
    crt_file: Option<&Path>,
    key_file: Option<&Path>,
) -> Result<Kubeconfig> {
    let mut cluster = serde_json::json!({ "server": endpoint });
    if let Some(ca) = ca_file {
        cluster["certificate-authority"] = serde_json::json!(ca);
    }

    let mut user = serde_json::json!({});
    if let Some(crt) = crt_file {
        user["client-certificate"] = serde_json::json!(crt);
    }
    if let Some(key) = key_file {
        user["client-key"] = serde_json::json!(key);
    }

    let kubeconfig = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": "host", "cluster": cluster }],
        "users": [{ "name": "ingress-operator", "user": user }],
        "contexts": [{
            "name": "host",
            "context": { "cluster": "host", "user": "ingress-operator" },
        }],
        "current-context": "host",
    });

    serde_json::from_value(kubeconfig).context("failed to build kubeconfig for endpoint override")
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

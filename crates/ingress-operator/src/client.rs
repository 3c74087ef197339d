//! Host cluster API access
//!
//! Provides the narrow surface the resource handlers need from the
//! Kubernetes API. The trait seam allows mocking in tests while keeping the
//! concrete kube-backed implementation for production use.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};

use crate::crd::IngressConfig;
use crate::error::HandlerError;

/// Trait for host cluster operations
///
/// All writes are read-modify-write updates against resources fetched from
/// the API server; the operator never constructs the shared ConfigMap or
/// Service from scratch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Fetch a ConfigMap by namespace and name
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<ConfigMap, HandlerError>;

    /// Replace a ConfigMap with the given object
    async fn update_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), HandlerError>;

    /// Fetch a Service by namespace and name
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, HandlerError>;

    /// Replace a Service with the given object
    async fn update_service(&self, namespace: &str, service: &Service)
        -> Result<(), HandlerError>;

    /// Whether any pods exist in the given namespace
    async fn namespace_has_pods(&self, namespace: &str) -> Result<bool, HandlerError>;

    /// Replace the finalizer list of an IngressConfig object
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), HandlerError>;
}

/// kube-backed implementation of [`HostApi`]
pub struct KubeHostApi {
    client: Client,
}

impl KubeHostApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn named<K>(obj: &K) -> Result<&str, HandlerError>
    where
        K: kube::Resource,
    {
        obj.meta()
            .name
            .as_deref()
            .ok_or_else(|| HandlerError::WrongType("object without metadata.name".to_string()))
    }
}

#[async_trait]
impl HostApi for KubeHostApi {
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMap, HandlerError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn update_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), HandlerError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let name = Self::named(config_map)?;
        api.replace(name, &PostParams::default(), config_map)
            .await?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, HandlerError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn update_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<(), HandlerError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let name = Self::named(service)?;
        api.replace(name, &PostParams::default(), service).await?;
        Ok(())
    }

    async fn namespace_has_pods(&self, namespace: &str) -> Result<bool, HandlerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default()).await?;
        Ok(!pods.items.is_empty())
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), HandlerError> {
        let api: Api<IngressConfig> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

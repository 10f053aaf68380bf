//! Object store access.
//!
//! The reconciler only talks to the cluster through [`ObjectStore`], so
//! unit tests can swap in the in-memory store from `test_utils` while
//! production uses [`KubeStore`] on top of `kube::Api`.

use crate::error::ControllerError;
use crds::{NetService, NetServiceStatus};
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};

/// Pod lookup used while resolving attachment addresses.
#[async_trait::async_trait]
pub trait PodLookup: Send + Sync {
    /// Fetches a pod, returning `Ok(None)` when it does not exist.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError>;
}

/// Typed get/create/replace access to the objects a pass touches.
///
/// `get_*` return `Ok(None)` for missing objects. `create_*` fail with
/// [`ControllerError::AlreadyExists`] when the name is taken and
/// `replace_*` fail with [`ControllerError::Conflict`] when the object
/// changed since it was read. Nothing here retries.
#[async_trait::async_trait]
pub trait ObjectStore: PodLookup {
    /// Fetches a NetService.
    async fn get_net_service(&self, namespace: &str, name: &str) -> Result<Option<NetService>, ControllerError>;
    /// Merges `status` into the NetService status subresource.
    async fn patch_net_service_status(&self, namespace: &str, name: &str, status: &NetServiceStatus) -> Result<(), ControllerError>;

    /// Fetches a Service.
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ControllerError>;
    /// Creates a Service.
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ControllerError>;

    /// Fetches an Endpoints object.
    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>, ControllerError>;
    /// Creates an Endpoints object.
    async fn create_endpoints(&self, namespace: &str, endpoints: &Endpoints) -> Result<Endpoints, ControllerError>;
    /// Replaces an Endpoints object, guarded by its resourceVersion.
    async fn replace_endpoints(&self, namespace: &str, endpoints: &Endpoints) -> Result<Endpoints, ControllerError>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Creates a store using the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_name(meta: &kube::api::ObjectMeta) -> String {
    meta.name.clone().unwrap_or_else(|| "<unknown>".to_string())
}

/// Maps HTTP 409 to the given typed error, everything else to `Kube`.
fn map_write_error(
    err: kube::Error,
    on_conflict: impl FnOnce() -> ControllerError,
) -> ControllerError {
    match err {
        kube::Error::Api(ref response) if response.code == 409 => on_conflict(),
        other => ControllerError::Kube(other),
    }
}

#[async_trait::async_trait]
impl PodLookup for KubeStore {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError> {
        Ok(self.api::<Pod>(namespace).get_opt(name).await?)
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get_net_service(&self, namespace: &str, name: &str) -> Result<Option<NetService>, ControllerError> {
        Ok(self.api::<NetService>(namespace).get_opt(name).await?)
    }

    async fn patch_net_service_status(&self, namespace: &str, name: &str, status: &NetServiceStatus) -> Result<(), ControllerError> {
        let status_patch = serde_json::json!({
            "status": status
        });
        self.api::<NetService>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ControllerError> {
        Ok(self.api::<Service>(namespace).get_opt(name).await?)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ControllerError> {
        self.api::<Service>(namespace)
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| map_write_error(e, || ControllerError::AlreadyExists(format!("Service {}/{}", namespace, object_name(&service.metadata)))))
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>, ControllerError> {
        Ok(self.api::<Endpoints>(namespace).get_opt(name).await?)
    }

    async fn create_endpoints(&self, namespace: &str, endpoints: &Endpoints) -> Result<Endpoints, ControllerError> {
        self.api::<Endpoints>(namespace)
            .create(&PostParams::default(), endpoints)
            .await
            .map_err(|e| map_write_error(e, || ControllerError::AlreadyExists(format!("Endpoints {}/{}", namespace, object_name(&endpoints.metadata)))))
    }

    async fn replace_endpoints(&self, namespace: &str, endpoints: &Endpoints) -> Result<Endpoints, ControllerError> {
        let name = object_name(&endpoints.metadata);
        self.api::<Endpoints>(namespace)
            .replace(&name, &PostParams::default(), endpoints)
            .await
            .map_err(|e| map_write_error(e, || ControllerError::Conflict(format!("Endpoints {}/{}", namespace, name))))
    }
}

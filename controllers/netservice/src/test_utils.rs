//! Test utilities for unit testing the synchronizer and reconciler
//!
//! This module provides an in-memory object store and helpers for creating
//! test objects.

use crate::error::ControllerError;
use crate::resolver::NETWORKS_STATUS_ANNOTATION;
use crate::store::{ObjectStore, PodLookup};
use crds::{NetService, NetServiceSpec, NetServiceStatus};
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointSubset, Endpoints, ObjectReference, Pod, Service,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// In-memory object store.
///
/// Assigns uids and resource versions on create, bumps the version on
/// every write and rejects replaces carrying a stale version, like the API
/// server does.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub(crate) net_services: Arc<Mutex<HashMap<Key, NetService>>>,
    pub(crate) services: Arc<Mutex<HashMap<Key, Service>>>,
    pub(crate) endpoints: Arc<Mutex<HashMap<Key, Endpoints>>>,
    pub(crate) pods: Arc<Mutex<HashMap<Key, Pod>>>,
    /// Pods whose lookup fails with a transient error
    pub(crate) failing_pods: Arc<Mutex<HashSet<Key>>>,
    /// Objects read back with an outdated resource version
    pub(crate) stale_reads: Arc<Mutex<HashSet<Key>>>,
    /// Services and endpoints a get misses although they exist, as when
    /// another writer creates them between the get and the create
    pub(crate) racing_services: Arc<Mutex<HashSet<Key>>>,
    pub(crate) racing_endpoints: Arc<Mutex<HashSet<Key>>>,
    /// Number of endpoints replaces issued
    pub(crate) endpoint_writes: Arc<Mutex<usize>>,
    /// Number of status patches issued
    pub(crate) status_writes: Arc<Mutex<usize>>,
    next_version: Arc<Mutex<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(&self, meta: &mut ObjectMeta) {
        let mut version = self.next_version.lock().unwrap();
        *version += 1;
        meta.resource_version = Some(version.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", *version));
        }
    }

    pub fn add_net_service(&self, mut net_service: NetService) -> NetService {
        self.stamp(&mut net_service.metadata);
        let k = key(
            net_service.metadata.namespace.as_deref().unwrap_or_default(),
            net_service.metadata.name.as_deref().unwrap_or_default(),
        );
        self.net_services.lock().unwrap().insert(k, net_service.clone());
        net_service
    }

    pub fn add_service(&self, mut service: Service) {
        self.stamp(&mut service.metadata);
        let k = key(
            service.metadata.namespace.as_deref().unwrap_or_default(),
            service.metadata.name.as_deref().unwrap_or_default(),
        );
        self.services.lock().unwrap().insert(k, service);
    }

    pub fn add_endpoints(&self, mut endpoints: Endpoints) {
        self.stamp(&mut endpoints.metadata);
        let k = key(
            endpoints.metadata.namespace.as_deref().unwrap_or_default(),
            endpoints.metadata.name.as_deref().unwrap_or_default(),
        );
        self.endpoints.lock().unwrap().insert(k, endpoints);
    }

    pub fn add_pod(&self, pod: Pod) {
        let k = key(
            pod.metadata.namespace.as_deref().unwrap_or_default(),
            pod.metadata.name.as_deref().unwrap_or_default(),
        );
        self.pods.lock().unwrap().insert(k, pod);
    }

    pub fn fail_pod_lookup(&self, namespace: &str, name: &str) {
        self.failing_pods.lock().unwrap().insert(key(namespace, name));
    }

    /// Serves `namespace/name` with an outdated resource version, so the
    /// next replace based on it conflicts.
    pub fn read_stale(&self, namespace: &str, name: &str) {
        self.stale_reads.lock().unwrap().insert(key(namespace, name));
    }

    /// Hides the service `namespace/name` from gets while a create still
    /// collides with it.
    pub fn race_service_create(&self, namespace: &str, name: &str) {
        self.racing_services.lock().unwrap().insert(key(namespace, name));
    }

    /// Same as [`Self::race_service_create`] for endpoints.
    pub fn race_endpoints_create(&self, namespace: &str, name: &str) {
        self.racing_endpoints.lock().unwrap().insert(key(namespace, name));
    }

    pub fn endpoints(&self, namespace: &str, name: &str) -> Option<Endpoints> {
        self.endpoints.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.services.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn net_service(&self, namespace: &str, name: &str) -> Option<NetService> {
        self.net_services.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn endpoint_writes(&self) -> usize {
        *self.endpoint_writes.lock().unwrap()
    }

    pub fn status_writes(&self) -> usize {
        *self.status_writes.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl PodLookup for MemoryStore {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError> {
        if self.failing_pods.lock().unwrap().contains(&key(namespace, name)) {
            return Err(ControllerError::Kube(kube::Error::Service(
                format!("lookup of pod {namespace}/{name} timed out").into(),
            )));
        }
        Ok(self.pods.lock().unwrap().get(&key(namespace, name)).cloned())
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get_net_service(&self, namespace: &str, name: &str) -> Result<Option<NetService>, ControllerError> {
        Ok(self.net_service(namespace, name))
    }

    async fn patch_net_service_status(&self, namespace: &str, name: &str, status: &NetServiceStatus) -> Result<(), ControllerError> {
        let mut net_services = self.net_services.lock().unwrap();
        let net_service = net_services
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ControllerError::Conflict(format!("NetService {namespace}/{name} was deleted")))?;
        net_service.status = Some(status.clone());
        *self.status_writes.lock().unwrap() += 1;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ControllerError> {
        if self.racing_services.lock().unwrap().contains(&key(namespace, name)) {
            return Ok(None);
        }
        Ok(self.service(namespace, name))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ControllerError> {
        let name = service.metadata.name.clone().unwrap_or_default();
        if self.service(namespace, &name).is_some() {
            return Err(ControllerError::AlreadyExists(format!("Service {namespace}/{name}")));
        }
        let mut created = service.clone();
        created.metadata.namespace = Some(namespace.to_string());
        self.stamp(&mut created.metadata);
        self.services.lock().unwrap().insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>, ControllerError> {
        if self.racing_endpoints.lock().unwrap().contains(&key(namespace, name)) {
            return Ok(None);
        }
        let mut endpoints = self.endpoints(namespace, name);
        if self.stale_reads.lock().unwrap().contains(&key(namespace, name)) {
            if let Some(endpoints) = endpoints.as_mut() {
                endpoints.metadata.resource_version = Some("0".to_string());
            }
        }
        Ok(endpoints)
    }

    async fn create_endpoints(&self, namespace: &str, endpoints: &Endpoints) -> Result<Endpoints, ControllerError> {
        let name = endpoints.metadata.name.clone().unwrap_or_default();
        if self.endpoints(namespace, &name).is_some() {
            return Err(ControllerError::AlreadyExists(format!("Endpoints {namespace}/{name}")));
        }
        let mut created = endpoints.clone();
        created.metadata.namespace = Some(namespace.to_string());
        self.stamp(&mut created.metadata);
        self.endpoints.lock().unwrap().insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn replace_endpoints(&self, namespace: &str, endpoints: &Endpoints) -> Result<Endpoints, ControllerError> {
        let name = endpoints.metadata.name.clone().unwrap_or_default();
        let stored_version = self
            .endpoints(namespace, &name)
            .and_then(|existing| existing.metadata.resource_version)
            .ok_or_else(|| ControllerError::Conflict(format!("Endpoints {namespace}/{name} was deleted")))?;
        if endpoints.metadata.resource_version.as_deref() != Some(stored_version.as_str()) {
            return Err(ControllerError::Conflict(format!("Endpoints {namespace}/{name}")));
        }
        let mut replaced = endpoints.clone();
        self.stamp(&mut replaced.metadata);
        self.endpoints.lock().unwrap().insert(key(namespace, &name), replaced.clone());
        *self.endpoint_writes.lock().unwrap() += 1;
        Ok(replaced)
    }
}

/// Helper to create a test NetService
pub fn create_test_net_service(name: &str, namespace: &str, network: &str) -> NetService {
    let mut net_service = NetService::new(
        name,
        NetServiceSpec {
            net_attach_def: network.to_string(),
            selector: BTreeMap::from([("app".to_string(), name.to_string())]),
        },
    );
    net_service.metadata.namespace = Some(namespace.to_string());
    net_service
}

/// Helper to create an endpoint address referencing a pod
pub fn pod_address(ip: &str, uid: &str, namespace: &str, pod: &str) -> EndpointAddress {
    EndpointAddress {
        ip: ip.to_string(),
        target_ref: Some(ObjectReference {
            kind: Some("Pod".to_string()),
            name: Some(pod.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Helper to create an endpoints object with a single subset
pub fn create_test_endpoints(name: &str, namespace: &str, addresses: Vec<EndpointAddress>) -> Endpoints {
    Endpoints {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        subsets: if addresses.is_empty() {
            None
        } else {
            Some(vec![EndpointSubset {
                addresses: Some(addresses),
                ..Default::default()
            }])
        },
    }
}

/// Helper to create a pod carrying a network status annotation
pub fn create_test_pod(name: &str, namespace: &str, network_status: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: network_status.map(|status| {
                BTreeMap::from([(NETWORKS_STATUS_ANNOTATION.to_string(), status.to_string())])
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Network status annotation with one address per network
pub fn network_status(entries: &[(&str, &str)]) -> String {
    let records: Vec<serde_json::Value> = entries
        .iter()
        .map(|(network, ip)| serde_json::json!({"name": network, "ips": [ip]}))
        .collect();
    serde_json::Value::Array(records).to_string()
}

/// Uids of the given addresses, for order-insensitive comparison
pub fn uids(addresses: &[EndpointAddress]) -> HashSet<String> {
    addresses
        .iter()
        .filter_map(|a| a.target_ref.as_ref().and_then(|r| r.uid.clone()))
        .collect()
}

/// (uid, ip) pairs of the given addresses
pub fn uid_ips(addresses: &[EndpointAddress]) -> HashSet<(String, String)> {
    addresses
        .iter()
        .filter_map(|a| {
            let uid = a.target_ref.as_ref()?.uid.clone()?;
            Some((uid, a.ip.clone()))
        })
        .collect()
}

/// Addresses of the first subset of stored endpoints
pub fn stored_addresses(endpoints: &Endpoints) -> Vec<EndpointAddress> {
    endpoints
        .subsets
        .as_ref()
        .and_then(|s| s.first())
        .and_then(|s| s.addresses.clone())
        .unwrap_or_default()
}

/// Controller owner references of an object
pub fn owners(meta: &ObjectMeta) -> Vec<OwnerReference> {
    meta.owner_references.clone().unwrap_or_default()
}

//! Reconciliation logic for NetService CRDs.
//!
//! One pass ensures the companion objects exist and are owned by the
//! NetService, then rewrites the owned endpoints so they list every selected
//! pod under its attachment-network address:
//!
//! 1. Fetch the NetService (gone means nothing to do)
//! 2. Ensure the headless template service `<name>-template` (carries the
//!    selector, so the platform maintains its endpoints) and the headless
//!    main service `<name>`
//! 3. Ensure the target endpoints `<name>`
//! 4. Fetch the template endpoints and adopt them if unowned
//! 5. Sync template membership into the target and write it if it changed
//!
//! Every object is read fresh on each pass, so a pass that failed halfway is
//! simply resumed by the next one.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::store::ObjectStore;
use crate::sync::sync_endpoints;
use crds::{NetService, NetServiceStatus};
use k8s_openapi::api::core::v1::{EndpointSubset, Endpoints, Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The NetService no longer exists
    Deleted,
    /// Endpoints were compared (and written if `changed`)
    Synced {
        changed: bool,
        /// Selected pods left without an address on this pass
        pending: usize,
    },
}

/// Reconciles NetService resources.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

fn owned_meta(name: &str, namespace: &str, owner: &OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

fn headless_service(
    name: &str,
    namespace: &str,
    owner: &OwnerReference,
    selector: Option<BTreeMap<String, String>>,
) -> Service {
    Service {
        metadata: owned_meta(name, namespace, owner),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn has_owner(meta: &ObjectMeta) -> bool {
    meta.owner_references
        .as_ref()
        .is_some_and(|owners| !owners.is_empty())
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(store: Arc<dyn ObjectStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Metrics updated by each pass.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Runs one reconciliation pass for `namespace/name`.
    ///
    /// Safe to call repeatedly with no new information. Store errors are
    /// returned unchanged for the caller to retry; per-member resolution
    /// problems are not errors and only show up in `pending`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        self.metrics.reconciliations.inc();

        let Some(net_service) = self.store.get_net_service(namespace, name).await? else {
            debug!("NetService {}/{} not found, assuming deleted", namespace, name);
            self.metrics.forget(namespace, name);
            return Ok(ReconcileOutcome::Deleted);
        };

        info!("Reconciling NetService {}/{}", namespace, name);

        let owner = net_service
            .controller_owner_ref(&())
            .ok_or(ControllerError::MissingObjectKey("name or uid"))?;
        let template_name = net_service
            .template_name()
            .ok_or(ControllerError::MissingObjectKey("name"))?;

        let template_service = headless_service(
            &template_name,
            namespace,
            &owner,
            (!net_service.spec.selector.is_empty()).then(|| net_service.spec.selector.clone()),
        );
        self.ensure_service(namespace, &template_service, "template").await?;

        let main_service = headless_service(name, namespace, &owner, None);
        self.ensure_service(namespace, &main_service, "main").await?;

        let target = self.ensure_target_endpoints(namespace, name, &owner).await?;

        let template = self
            .store
            .get_endpoints(namespace, &template_name)
            .await?
            .ok_or_else(|| {
                info!("Template endpoints {}/{} not found yet, will retry", namespace, template_name);
                ControllerError::TemplateEndpointsMissing(format!("{namespace}/{template_name}"))
            })?;
        let template = self.adopt_template_endpoints(namespace, template, &owner).await?;

        // A changed netAttachDef does not invalidate addresses already
        // resolved; only membership changes trigger resolution.
        let outcome = sync_endpoints(
            &net_service.spec.net_attach_def,
            &template,
            &target,
            self.store.as_ref(),
        )
        .await;

        self.metrics.addresses_added.inc_by(outcome.added as u64);
        self.metrics.addresses_removed.inc_by(outcome.removed as u64);
        self.metrics
            .pending_members
            .with_label_values(&[namespace, name])
            .set(i64::try_from(outcome.pending).unwrap_or(i64::MAX));

        if outcome.changed {
            let mut updated = target;
            updated.subsets = Some(vec![EndpointSubset {
                addresses: Some(outcome.addresses.clone()),
                ..Default::default()
            }]);
            self.store.replace_endpoints(namespace, &updated).await?;
            info!(
                "Updated endpoints {}/{}: {} addresses (+{} -{})",
                namespace,
                name,
                outcome.addresses.len(),
                outcome.added,
                outcome.removed
            );
        } else {
            debug!("Endpoints {}/{} already up to date", namespace, name);
        }

        self.update_status(&net_service, namespace, name, outcome.addresses.len(), outcome.pending)
            .await;

        Ok(ReconcileOutcome::Synced {
            changed: outcome.changed,
            pending: outcome.pending,
        })
    }

    /// Creates `service` if absent. Existing services are left untouched:
    /// updating them is not supported, so a changed selector only takes
    /// effect once the template service is deleted and recreated.
    async fn ensure_service(&self, namespace: &str, service: &Service, role: &str) -> Result<(), ControllerError> {
        let name = service.metadata.name.as_deref().unwrap_or_default();

        if self.store.get_service(namespace, name).await?.is_some() {
            debug!("{} service {}/{} exists, updates are not supported", role, namespace, name);
            return Ok(());
        }

        info!("{} service {}/{} does not exist, creating it", role, namespace, name);
        match self.store.create_service(namespace, service).await {
            Ok(_) => Ok(()),
            Err(ControllerError::AlreadyExists(_)) => {
                debug!("{} service {}/{} was created concurrently", role, namespace, name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the target endpoints, creating an empty owned one if absent.
    async fn ensure_target_endpoints(&self, namespace: &str, name: &str, owner: &OwnerReference) -> Result<Endpoints, ControllerError> {
        if let Some(existing) = self.store.get_endpoints(namespace, name).await? {
            return Ok(existing);
        }

        info!("Endpoints {}/{} do not exist, creating them", namespace, name);
        let endpoints = Endpoints {
            metadata: owned_meta(name, namespace, owner),
            subsets: None,
        };
        self.store.create_endpoints(namespace, &endpoints).await
    }

    /// Sets the NetService as owner of the platform-managed template
    /// endpoints so changes to them trigger a pass. Endpoints that already
    /// have an owner are returned as-is.
    async fn adopt_template_endpoints(&self, namespace: &str, template: Endpoints, owner: &OwnerReference) -> Result<Endpoints, ControllerError> {
        if has_owner(&template.metadata) {
            return Ok(template);
        }

        info!(
            "Setting owner of template endpoints {}/{}",
            namespace,
            template.metadata.name.as_deref().unwrap_or("<unknown>")
        );
        let mut adopted = template;
        adopted.metadata.owner_references = Some(vec![owner.clone()]);
        self.store.replace_endpoints(namespace, &adopted).await
    }

    async fn update_status(
        &self,
        net_service: &NetService,
        namespace: &str,
        name: &str,
        ready: usize,
        pending: usize,
    ) {
        let status = NetServiceStatus {
            ready_addresses: u32::try_from(ready).unwrap_or(u32::MAX),
            pending_members: u32::try_from(pending).unwrap_or(u32::MAX),
        };
        if net_service.status.as_ref() == Some(&status) {
            return;
        }

        // Status is informational; the endpoints are already correct
        if let Err(e) = self.store.patch_net_service_status(namespace, name, &status).await {
            warn!("Failed to update NetService {}/{} status: {}", namespace, name, e);
        }
    }
}

//! Kubernetes resource watchers.
//!
//! This module drives reconciliation with `kube_runtime::Controller`. The
//! runtime serializes passes per NetService, debounces bursts of events and
//! bounds concurrency across NetServices. Changes to the Services and
//! Endpoints a NetService controls (including the adopted template
//! endpoints) requeue their owner.

use crate::backoff::BackoffTracker;
use crate::error::ControllerError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crds::NetService;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::{Api, Client, ResourceExt};
use kube_runtime::{Controller, watcher, controller::{self, Action, Config as RuntimeConfig}};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared state handed to every reconciliation.
#[derive(Debug)]
pub struct Context {
    /// Runs the reconciliation passes
    pub reconciler: Reconciler,
    /// Failure backoff per NetService identity
    pub backoff: BackoffTracker,
    /// Requeue after a fully resolved pass
    pub resync_interval: Duration,
    /// Requeue after a pass that left members unresolved
    pub pending_requeue: Duration,
}

impl Context {
    /// Drops per-identity state kept for a NetService that no longer exists.
    pub fn forget(&self, namespace: &str, name: &str) {
        self.reconciler.metrics().forget(namespace, name);
        self.backoff.success(&format!("{namespace}/{name}"));
    }
}

fn identity(net_service: &NetService) -> Result<(String, String), ControllerError> {
    let namespace = net_service
        .namespace()
        .ok_or(ControllerError::MissingObjectKey("namespace"))?;
    Ok((namespace, net_service.name_any()))
}

/// Requeue policy after a successful pass.
///
/// Pod annotation changes do not trigger a pass, so unresolved members are
/// retried on a short timer; otherwise a slow resync catches anything missed.
pub fn requeue_after(outcome: ReconcileOutcome, context: &Context) -> Action {
    match outcome {
        ReconcileOutcome::Deleted => Action::await_change(),
        ReconcileOutcome::Synced { pending, .. } if pending > 0 => Action::requeue(context.pending_requeue),
        ReconcileOutcome::Synced { .. } => Action::requeue(context.resync_interval),
    }
}

async fn reconcile(net_service: Arc<NetService>, context: Arc<Context>) -> Result<Action, ControllerError> {
    let (namespace, name) = identity(&net_service)?;

    let outcome = context.reconciler.reconcile(&namespace, &name).await?;
    context.backoff.success(&format!("{namespace}/{name}"));

    Ok(requeue_after(outcome, &context))
}

fn error_policy(net_service: Arc<NetService>, error: &ControllerError, context: Arc<Context>) -> Action {
    context.reconciler.metrics().count_failure(error);

    let key = format!(
        "{}/{}",
        net_service.namespace().unwrap_or_default(),
        net_service.name_any()
    );
    let delay = context.backoff.next_failure(&key);
    match error {
        ControllerError::TemplateEndpointsMissing(_) => {
            info!("NetService {} waiting for template endpoints, retrying in {:?}", key, delay);
        }
        _ => warn!("Reconciliation of NetService {} failed: {}, retrying in {:?}", key, error, delay),
    }
    Action::requeue(delay)
}

/// Handles an error surfaced by the runtime outside of a pass.
///
/// Deletions never start a pass: a requeue scheduled for a deleted
/// NetService ends up here as `ObjectNotFound`, which is where its state
/// is dropped.
fn on_runtime_error(context: &Context, error: &controller::Error<ControllerError, watcher::Error>) {
    match error {
        controller::Error::ObjectNotFound(object) => {
            debug!("NetService {} is gone, dropping its state", object);
            context.forget(object.namespace.as_deref().unwrap_or_default(), &object.name);
        }
        other => debug!("Controller error: {}", other),
    }
}

/// Watches NetService resources and the objects they own.
pub struct Watcher {
    context: Arc<Context>,
    net_service_api: Api<NetService>,
    service_api: Api<Service>,
    endpoints_api: Api<Endpoints>,
    runtime_config: RuntimeConfig,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a watcher over one namespace, or all namespaces for `None`.
    pub fn new(
        client: Client,
        namespace: Option<&str>,
        context: Arc<Context>,
        debounce: Duration,
        concurrency: u16,
    ) -> Self {
        let (net_service_api, service_api, endpoints_api) = match namespace {
            Some(ns) => (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client, ns),
            ),
            None => (
                Api::all(client.clone()),
                Api::all(client.clone()),
                Api::all(client),
            ),
        };

        Self {
            context,
            net_service_api,
            service_api,
            endpoints_api,
            runtime_config: RuntimeConfig::default()
                .debounce(debounce)
                .concurrency(concurrency),
        }
    }

    /// Runs the NetService controller until shutdown is signalled.
    pub async fn watch_net_services(&self) -> Result<(), ControllerError> {
        info!("Starting NetService watcher");

        let context = self.context.clone();

        Controller::new(self.net_service_api.clone(), watcher::Config::default())
            .owns(self.service_api.clone(), watcher::Config::default())
            .owns(self.endpoints_api.clone(), watcher::Config::default())
            .with_config(self.runtime_config.clone())
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.context.clone())
            .for_each(move |res| {
                let context = context.clone();
                async move {
                    match res {
                        Ok((object, action)) => debug!("Reconciled {}: {:?}", object, action),
                        Err(e) => on_runtime_error(&context, &e),
                    }
                }
            })
            .await;

        info!("NetService watcher stopped");
        Ok(())
    }
}

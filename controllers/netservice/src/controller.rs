//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the object
//! store, reconciler and watcher together and runs them alongside the
//! metrics and health server.

use crate::backoff::BackoffTracker;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::store::KubeStore;
use crate::watcher::{Context, Watcher};
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for NetService management.
#[derive(Debug)]
pub struct Controller {
    net_service_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing NetService Controller");

        // Create Kubernetes client
        let kube_client = Client::try_default().await?;

        let metrics = Arc::new(Metrics::new()?);
        let reconciler = Reconciler::new(
            Arc::new(KubeStore::new(kube_client.clone())),
            metrics.clone(),
        );

        let context = Arc::new(Context {
            reconciler,
            backoff: BackoffTracker::new(config.backoff_min_secs, config.backoff_max_secs),
            resync_interval: config.resync_interval,
            pending_requeue: config.pending_requeue,
        });

        let watcher_instance = Watcher::new(
            kube_client,
            config.watch_namespace.as_deref(),
            context,
            config.debounce,
            config.concurrency,
        );

        // Start watcher and metrics server in background tasks
        let net_service_watcher = tokio::spawn(async move {
            watcher_instance.watch_net_services().await
        });

        let metrics_addr = config.metrics_addr;
        let metrics_server = tokio::spawn(async move {
            metrics::serve(metrics_addr, metrics).await
        });

        Ok(Self {
            net_service_watcher,
            metrics_server,
        })
    }

    /// Runs the controller until shutdown.
    ///
    /// The watcher returns once a shutdown signal was handled; the metrics
    /// server only returns on failure.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("NetService Controller running");

        tokio::select! {
            result = &mut self.net_service_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("NetService watcher panicked: {}", e)))??;
                info!("NetService Controller shut down");
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))??;
            }
        }

        self.metrics_server.abort();
        Ok(())
    }
}

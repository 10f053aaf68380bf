//! Prometheus metrics and the health endpoint server.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Reconciliation metrics, registered on a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Passes started
    pub reconciliations: IntCounter,
    /// Failed passes by error kind
    pub errors: IntCounterVec,
    /// Addresses published
    pub addresses_added: IntCounter,
    /// Addresses withdrawn
    pub addresses_removed: IntCounter,
    /// Unresolved members per NetService
    pub pending_members: IntGaugeVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates and registers all metrics.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("netservice".to_string()), None)?;

        let reconciliations = IntCounter::new("reconciliations_total", "Reconciliation passes started")?;
        let errors = IntCounterVec::new(
            Opts::new("reconcile_errors_total", "Reconciliation passes that failed"),
            &["error"],
        )?;
        let addresses_added = IntCounter::new("addresses_added_total", "Endpoint addresses added")?;
        let addresses_removed = IntCounter::new("addresses_removed_total", "Endpoint addresses removed")?;
        let pending_members = IntGaugeVec::new(
            Opts::new("pending_members", "Selected pods without a resolved attachment address"),
            &["namespace", "name"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(addresses_added.clone()))?;
        registry.register(Box::new(addresses_removed.clone()))?;
        registry.register(Box::new(pending_members.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            errors,
            addresses_added,
            addresses_removed,
            pending_members,
        })
    }

    /// Counts a failed pass under the error's label.
    pub fn count_failure(&self, error: &ControllerError) {
        self.errors.with_label_values(&[error.metric_label()]).inc();
    }

    /// Drops the pending gauge of a deleted NetService.
    pub fn forget(&self, namespace: &str, name: &str) {
        // Absent label sets are not an error worth reporting
        let _ = self.pending_members.remove_label_values(&[namespace, name]);
    }

    /// Renders all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Routes for the metrics and health endpoints.
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler))
        .route("/readyz", get(health_handler))
        .with_state(metrics)
}

/// Serves `/metrics`, `/healthz` and `/readyz` until the process exits.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

//! NetService Controller
//!
//! Publishes headless services whose endpoints point at the addresses pods
//! hold on a secondary (Multus) attachment network.
//!
//! For every `NetService` the controller maintains:
//! - `<name>-template`: headless service carrying the selector, whose
//!   endpoints the platform keeps in sync with the matching pods
//! - `<name>`: headless service without selector
//! - `<name>` endpoints: the template's members, each under the address read
//!   from the pod's network status annotation

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod resolver;
mod store;
mod sync;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting NetService Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Metrics address: {}", config.metrics_addr);
    info!("  Concurrency: {}, debounce: {:?}", config.concurrency, config.debounce);
    info!("  Resync: {:?}, pending requeue: {:?}", config.resync_interval, config.pending_requeue);

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

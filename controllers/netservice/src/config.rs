//! Controller configuration.
//!
//! All settings come from environment variables and are read once at
//! startup.

use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings of the NetService Controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch (`None` watches all namespaces)
    pub watch_namespace: Option<String>,
    /// Listen address of the metrics and health server
    pub metrics_addr: SocketAddr,
    /// Maximum reconciliations running at once
    pub concurrency: u16,
    /// Quiet period after the last event before a pass starts
    pub debounce: Duration,
    /// Periodic requeue after a fully resolved pass
    pub resync_interval: Duration,
    /// Requeue after a pass that left members unresolved
    pub pending_requeue: Duration,
    /// Backoff bounds for failed passes, in seconds
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            concurrency: 3,
            debounce: Duration::from_secs(1),
            resync_interval: Duration::from_secs(300),
            pending_requeue: Duration::from_secs(15),
            backoff_min_secs: 5,
            backoff_max_secs: 300,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ControllerError> {
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => value.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{var} has invalid value {value:?}"))
        }),
        _ => Ok(default),
    }
}

impl ControllerConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Loads configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();

        let watch_namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());
        let metrics_addr = parse(&lookup, "METRICS_ADDR", defaults.metrics_addr)?;
        let concurrency = parse(&lookup, "RECONCILE_CONCURRENCY", defaults.concurrency)?;
        let debounce = parse(&lookup, "RECONCILE_DEBOUNCE_SECS", defaults.debounce.as_secs())?;
        let resync = parse(&lookup, "RESYNC_INTERVAL_SECS", defaults.resync_interval.as_secs())?;
        let pending = parse(&lookup, "PENDING_REQUEUE_SECS", defaults.pending_requeue.as_secs())?;
        let backoff_min_secs = parse(&lookup, "BACKOFF_MIN_SECS", defaults.backoff_min_secs)?;
        let backoff_max_secs = parse(&lookup, "BACKOFF_MAX_SECS", defaults.backoff_max_secs)?;

        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if backoff_min_secs == 0 || backoff_min_secs > backoff_max_secs {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff bounds must satisfy 0 < BACKOFF_MIN_SECS ({backoff_min_secs}) <= BACKOFF_MAX_SECS ({backoff_max_secs})"
            )));
        }

        Ok(Self {
            watch_namespace,
            metrics_addr,
            concurrency,
            debounce: Duration::from_secs(debounce),
            resync_interval: Duration::from_secs(resync),
            pending_requeue: Duration::from_secs(pending),
            backoff_min_secs,
            backoff_max_secs,
        })
    }
}

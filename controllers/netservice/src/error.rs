//! Controller-specific error types.
//!
//! This module defines error types specific to the NetService Controller
//! that are not covered by upstream library errors.

use thiserror::Error;
use kube::Error as KubeError;

/// Errors that can occur in the NetService Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Create raced with another writer
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    /// Write rejected because the object changed since it was read
    #[error("Update conflict: {0}")]
    Conflict(String),

    /// The platform has not produced the template endpoints yet
    #[error("Template endpoints not found: {0}")]
    TemplateEndpointsMissing(String),

    /// Object lacks the name or uid needed to reference it
    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Short label used for the error counter.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kube",
            Self::AlreadyExists(_) => "already_exists",
            Self::Conflict(_) => "conflict",
            Self::TemplateEndpointsMissing(_) => "template_missing",
            Self::MissingObjectKey(_) => "missing_key",
            Self::InvalidConfig(_) => "config",
            Self::Metrics(_) => "metrics",
            Self::Io(_) => "io",
            Self::Watch(_) => "watch",
        }
    }
}

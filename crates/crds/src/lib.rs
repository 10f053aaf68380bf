//! svcctl CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the NetService controller.

pub mod net_service;

pub use net_service::*;

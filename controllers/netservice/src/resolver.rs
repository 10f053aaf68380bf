//! Network annotation resolver.
//!
//! Multus records every attachment of a pod in a JSON annotation shaped as
//! `[{"name": "...", "ips": ["..."]}, ...]`. This module picks the IPv4
//! address a pod holds on one named attachment network.

use ipnet::Ipv4Net;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Annotation written by older Multus releases.
pub const NETWORKS_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks-status";

/// Annotation written by current Multus releases (same JSON shape).
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";

/// The annotation text could not be decoded.
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("malformed network status annotation: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct AttachmentStatus {
    #[serde(default)]
    name: String,
    #[serde(default)]
    ips: Vec<String>,
}

/// Returns the network status annotation text, preferring the legacy key.
pub fn network_status(annotations: &BTreeMap<String, String>) -> Option<&str> {
    annotations
        .get(NETWORKS_STATUS_ANNOTATION)
        .or_else(|| annotations.get(NETWORK_STATUS_ANNOTATION))
        .map(String::as_str)
}

/// Resolves the IPv4 address held on `network` from annotation text.
///
/// Each `ips` entry may be a bare address or a CIDR; a CIDR contributes its
/// network address. Surrounding whitespace is ignored. Anything that does
/// not parse as IPv4, IPv4-mapped IPv6 (`::ffff:a.b.c.d`) included, is
/// skipped. When several
/// addresses qualify, across one or several records with a matching name,
/// the last one wins.
///
/// Returns `Ok(None)` when nothing qualifies and `Err` only when the text
/// is not a JSON array of attachment records.
pub fn resolve(annotation: &str, network: &str) -> Result<Option<Ipv4Addr>, AnnotationError> {
    let attachments: Vec<AttachmentStatus> = serde_json::from_str(annotation)?;

    let found = attachments
        .iter()
        .filter(|attachment| attachment.name == network)
        .flat_map(|attachment| attachment.ips.iter())
        .filter_map(|ip| parse_ipv4(ip))
        .last();

    Ok(found)
}

fn parse_ipv4(value: &str) -> Option<Ipv4Addr> {
    let value = value.trim();
    value
        .parse::<Ipv4Addr>()
        .ok()
        .or_else(|| value.parse::<Ipv4Net>().ok().map(|net| net.network()))
}

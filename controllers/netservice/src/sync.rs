//! Endpoint synchronization.
//!
//! Compares the platform-managed template endpoints (who belongs) with the
//! endpoints this controller owns (where they are reachable) and computes
//! the target address list. Members are matched by pod uid; new members get
//! the address their pod holds on the attachment network.

use crate::resolver::{self, AnnotationError};
use crate::store::PodLookup;
use k8s_openapi::api::core::v1::{EndpointAddress, Endpoints};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Result of comparing template and target endpoints.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Addresses the target's single subset should hold
    pub addresses: Vec<EndpointAddress>,
    /// Whether `addresses` differs from the target's current membership
    pub changed: bool,
    /// Members added on this pass
    pub added: usize,
    /// Members removed on this pass
    pub removed: usize,
    /// Template members that could not be resolved on this pass
    pub pending: usize,
}

/// Addresses of the first subset, with a diagnostic when there are more.
fn first_subset_addresses<'a>(endpoints: &'a Endpoints, role: &str) -> &'a [EndpointAddress] {
    let Some(subsets) = endpoints.subsets.as_deref() else {
        return &[];
    };
    if subsets.len() > 1 {
        warn!(
            "{} endpoints {} has {} subsets, only the first is used",
            role,
            endpoints.metadata.name.as_deref().unwrap_or("<unknown>"),
            subsets.len()
        );
    }
    subsets
        .first()
        .and_then(|subset| subset.addresses.as_deref())
        .unwrap_or(&[])
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

/// Target members keyed by uid. Anything carrying a uid counts.
fn index_target(addresses: &[EndpointAddress]) -> HashMap<String, &EndpointAddress> {
    addresses
        .iter()
        .filter_map(|address| {
            let uid = non_empty(address.target_ref.as_ref()?.uid.as_ref())?;
            Some((uid.to_string(), address))
        })
        .collect()
}

/// Template members keyed by uid. Only complete pod references count.
fn index_template(addresses: &[EndpointAddress]) -> HashMap<String, &EndpointAddress> {
    addresses
        .iter()
        .filter_map(|address| {
            let target_ref = address.target_ref.as_ref()?;
            if target_ref.kind.as_deref() != Some("Pod") {
                return None;
            }
            non_empty(target_ref.name.as_ref())?;
            non_empty(target_ref.namespace.as_ref())?;
            let uid = non_empty(target_ref.uid.as_ref())?;
            Some((uid.to_string(), address))
        })
        .collect()
}

/// Looks up the pod behind a template member and resolves its address on
/// `network`. Every failure is logged and yields `None` so the member is
/// retried on a later pass.
async fn resolve_member<L>(network: &str, member: &EndpointAddress, lookup: &L) -> Option<EndpointAddress>
where
    L: PodLookup + ?Sized,
{
    let target_ref = member.target_ref.as_ref()?;
    let pod_name = target_ref.name.as_deref()?;
    let pod_namespace = target_ref.namespace.as_deref()?;

    let pod = match lookup.get_pod(pod_namespace, pod_name).await {
        Ok(Some(pod)) => pod,
        Ok(None) => {
            debug!("Pod {}/{} not found (template IP {}), skipping", pod_namespace, pod_name, member.ip);
            return None;
        }
        Err(e) => {
            warn!("Failed to look up pod {}/{} (template IP {}): {}", pod_namespace, pod_name, member.ip, e);
            return None;
        }
    };

    let Some(annotations) = pod.metadata.annotations.as_ref() else {
        debug!("Pod {}/{} has no annotations, skipping", pod_namespace, pod_name);
        return None;
    };
    let Some(status) = resolver::network_status(annotations) else {
        debug!("Pod {}/{} has no network status annotation, skipping", pod_namespace, pod_name);
        return None;
    };

    let ip = match resolver::resolve(status, network) {
        Ok(Some(ip)) => ip,
        Ok(None) => {
            debug!("Pod {}/{} has no IPv4 address on network {}", pod_namespace, pod_name, network);
            return None;
        }
        Err(AnnotationError::Malformed(e)) => {
            warn!("Pod {}/{} has a malformed network status annotation: {}", pod_namespace, pod_name, e);
            return None;
        }
    };

    Some(EndpointAddress {
        ip: ip.to_string(),
        ..member.clone()
    })
}

/// Computes the target address list for `target` given `template`.
///
/// Members present only in the target are dropped, members present in both
/// keep the target's already-resolved address, and members present only in
/// the template are resolved through `lookup`. Unresolvable members are left
/// out and counted in [`SyncOutcome::pending`].
///
/// When nothing was added or removed, `changed` is false and `addresses`
/// holds the target's current addresses; callers must not write then.
/// Address order carries no meaning.
pub async fn sync_endpoints<L>(
    network: &str,
    template: &Endpoints,
    target: &Endpoints,
    lookup: &L,
) -> SyncOutcome
where
    L: PodLookup + ?Sized,
{
    let target_addresses = first_subset_addresses(target, "Target");
    let template_addresses = first_subset_addresses(template, "Template");

    let target_by_uid = index_target(target_addresses);
    let template_by_uid = index_template(template_addresses);

    let mut outcome = SyncOutcome::default();

    for (uid, address) in &target_by_uid {
        if template_by_uid.contains_key(uid) {
            outcome.addresses.push((*address).clone());
        } else {
            info!("Removed address {} (uid {})", address.ip, uid);
            outcome.removed += 1;
        }
    }

    for (uid, member) in &template_by_uid {
        if target_by_uid.contains_key(uid) {
            continue;
        }
        match resolve_member(network, member, lookup).await {
            Some(address) => {
                info!(
                    "Added address {} for pod {}",
                    address.ip,
                    address
                        .target_ref
                        .as_ref()
                        .and_then(|r| r.name.as_deref())
                        .unwrap_or("<unknown>")
                );
                outcome.addresses.push(address);
                outcome.added += 1;
            }
            None => outcome.pending += 1,
        }
    }

    outcome.changed = outcome.added > 0 || outcome.removed > 0;
    if !outcome.changed {
        outcome.addresses = target_addresses.to_vec();
    }

    debug!(
        "Endpoint sync complete: changed={}, added={}, removed={}, pending={}",
        outcome.changed, outcome.added, outcome.removed, outcome.pending
    );
    outcome
}

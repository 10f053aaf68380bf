//! NetService CRD
//!
//! Declares a headless service whose member addresses are taken from a
//! secondary (Multus) attachment network instead of the pod's primary IP.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Suffix of the platform-managed template service and its endpoints.
pub const TEMPLATE_SUFFIX: &str = "-template";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "svcctl.io",
    version = "v1alpha1",
    kind = "NetService",
    namespaced,
    status = "NetServiceStatus",
    shortname = "nsvc",
    printcolumn = r#"{"name":"Network","type":"string","jsonPath":".spec.netAttachDef"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyAddresses"}"#,
    printcolumn = r#"{"name":"Pending","type":"integer","jsonPath":".status.pendingMembers"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetServiceSpec {
    /// Name of the network attachment definition to take addresses from
    pub net_attach_def: String,

    /// Pod selector for the template service. Empty leaves it selector-less.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetServiceStatus {
    /// Members currently published in the service endpoints
    #[serde(default)]
    pub ready_addresses: u32,

    /// Selected pods whose attachment address could not be resolved yet
    #[serde(default)]
    pub pending_members: u32,
}

impl NetService {
    /// Name of the selector-bearing template service (`<name>-template`).
    pub fn template_name(&self) -> Option<String> {
        self.metadata
            .name
            .as_ref()
            .map(|name| format!("{name}{TEMPLATE_SUFFIX}"))
    }
}

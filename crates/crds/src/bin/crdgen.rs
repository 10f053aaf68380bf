//! Prints the NetService CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > deploy/crd.yaml`

use crds::NetService;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&NetService::crd())?);
    Ok(())
}

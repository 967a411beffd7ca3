//! Prints the CRD manifests as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crds.yaml`

use crds::{Node, NodePool};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    for crd in [NodePool::crd(), Node::crd()] {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}

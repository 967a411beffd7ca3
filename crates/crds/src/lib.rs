//! Hardware Manager CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the NodePool controller:
//! - `NodePool`: a request for groups of nodes of given hardware profiles
//! - `Node`: one allocated (emulated) physical node
//!
//! Both resources live in the `hardwaremanagement.oran.openshift.io` group.

pub mod conditions;
pub mod node;
pub mod node_pool;

pub use conditions::*;
pub use node::*;
pub use node_pool::*;

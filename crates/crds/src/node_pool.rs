//! NodePool CRD
//!
//! A request for hardware: one or more node groups, each asking for a number
//! of nodes of a given hardware profile. The controller reports progress in
//! the `Provisioned` condition and lists the bound node names.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{find_condition, Condition, PROVISIONED};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "hardwaremanagement.oran.openshift.io",
    version = "v1alpha1",
    kind = "NodePool",
    namespaced,
    status = "NodePoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Identity of the requesting cloud; keys the allocation ledger
    #[serde(rename = "cloudID")]
    #[schemars(rename = "cloudID")]
    pub cloud_id: String,

    /// Requested node groups
    #[serde(default)]
    pub node_group: Vec<NodeGroup>,
}

/// One group of identical nodes within a NodePool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    /// Group name (e.g. "controller", "worker")
    pub name: String,

    /// Hardware profile every node in the group must match
    pub hw_profile: String,

    /// Number of nodes requested
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolStatus {
    /// Status conditions (only `Provisioned` is used)
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Allocation results
    #[serde(default)]
    pub properties: NodePoolProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolProperties {
    /// Names of the Node objects bound to this pool, sorted
    #[serde(default)]
    pub node_names: Vec<String>,
}

impl NodePool {
    /// The `Provisioned` condition, if one has been set
    pub fn provisioned_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, PROVISIONED))
    }
}

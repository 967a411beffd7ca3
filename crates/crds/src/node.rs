//! Node CRD
//!
//! One emulated physical node bound to a NodePool. Created by the controller
//! when a node is allocated and deleted when the pool is released.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{find_condition, Condition, ConditionStatus, PROVISIONED};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "hardwaremanagement.oran.openshift.io",
    version = "v1alpha1",
    kind = "Node",
    namespaced,
    status = "NodeStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// cloudID of the owning NodePool
    pub node_pool: String,

    /// Node group within the pool
    pub group_name: String,

    /// Hardware profile the node was matched on
    pub hw_profile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// BMC connection details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc: Option<Bmc>,

    /// MAC address of the boot interface
    #[serde(default, rename = "bootMACAddress")]
    #[schemars(rename = "bootMACAddress")]
    pub boot_mac_address: String,

    /// Hostname
    #[serde(default)]
    pub hostname: String,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bmc {
    /// BMC address URI (e.g. "idrac-virtualmedia+https://10.0.0.1/redfish/v1/Systems/1")
    pub address: String,

    /// Name of the Secret holding the BMC username and password
    pub credentials_name: String,
}

impl Node {
    /// Whether the controller finished writing this node's status
    pub fn is_provisioned(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, PROVISIONED))
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Whether this Node is live, bound to `cloud_id` and `group_name`, and
    /// provisioned. A Node left over from another cloud does not count.
    pub fn is_provisioned_for(&self, cloud_id: &str, group_name: &str) -> bool {
        self.metadata.deletion_timestamp.is_none()
            && self.spec.node_pool == cloud_id
            && self.spec.group_name == group_name
            && self.is_provisioned()
    }
}

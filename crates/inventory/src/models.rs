//! Inventory document models
//!
//! Both sections of the `nodelist` document are YAML. Field names follow the
//! document format exactly, which is why some of them are kebab-case and
//! some camelCase.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Interface label marking the interface a node PXE-boots from
pub const BOOT_INTERFACE_LABEL: &str = "bootable-interface";

/// BMC connection descriptor of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BmcInfo {
    /// BMC address URI
    #[serde(default)]
    pub address: String,

    /// Base64-encoded BMC username
    #[serde(default, rename = "username-base64")]
    pub username_base64: String,

    /// Base64-encoded BMC password
    #[serde(default, rename = "password-base64")]
    pub password_base64: String,
}

/// A network interface of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    /// Interface name (e.g. "eno1")
    #[serde(default)]
    pub name: String,

    /// Role label (e.g. "bootable-interface")
    #[serde(default)]
    pub label: String,

    /// MAC address
    #[serde(default)]
    pub mac_address: String,
}

/// Catalog entry for one emulated physical node
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Hardware profile of the node
    pub hwprofile: String,

    /// BMC connection details
    #[serde(default)]
    pub bmc: BmcInfo,

    /// Network interfaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceInfo>,

    /// Legacy single boot MAC, used when no interface carries the boot label
    #[serde(default, rename = "bootMACAddress", skip_serializing_if = "Option::is_none")]
    pub boot_mac_address: Option<String>,

    /// Hostname
    #[serde(default)]
    pub hostname: String,
}

impl NodeInfo {
    /// MAC address the node boots from.
    ///
    /// Resolution order: interface labelled `bootable-interface`, the legacy
    /// `bootMACAddress` field, the first interface, otherwise empty.
    pub fn boot_mac(&self) -> &str {
        if let Some(iface) = self.interfaces.iter().find(|i| i.label == BOOT_INTERFACE_LABEL) {
            return &iface.mac_address;
        }
        if let Some(mac) = self.boot_mac_address.as_deref() {
            return mac;
        }
        self.interfaces
            .first()
            .map(|i| i.mac_address.as_str())
            .unwrap_or_default()
    }
}

/// The `resources` section: hardware catalog
///
/// Nodes are kept in a `BTreeMap` so iteration is in node-name order, which
/// makes allocation deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resources {
    /// Known hardware profiles
    #[serde(default)]
    pub hwprofiles: Vec<String>,

    /// Nodes by name
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeInfo>,
}

/// Ledger entry for one cloud
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudAllocation {
    /// cloudID of the owning NodePool
    #[serde(rename = "cloudID")]
    pub cloud_id: String,

    /// Allocated node names per group, in allocation order
    #[serde(default)]
    pub nodegroups: BTreeMap<String, Vec<String>>,
}

impl CloudAllocation {
    /// Creates an empty entry
    pub fn new(cloud_id: impl Into<String>) -> Self {
        Self {
            cloud_id: cloud_id.into(),
            nodegroups: BTreeMap::new(),
        }
    }

    /// Number of nodes already assigned to `group`
    pub fn assigned_count(&self, group: &str) -> usize {
        self.nodegroups.get(group).map_or(0, Vec::len)
    }

    /// Every (group, node) pair held by this entry
    pub fn iter_nodes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.nodegroups
            .iter()
            .flat_map(|(group, nodes)| nodes.iter().map(move |n| (group.as_str(), n.as_str())))
    }
}

/// The `allocations` section: allocation ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocations {
    /// One entry per cloudID
    #[serde(default)]
    pub clouds: Vec<CloudAllocation>,
}

impl Allocations {
    /// Ledger entry for a cloud
    pub fn find(&self, cloud_id: &str) -> Option<&CloudAllocation> {
        self.clouds.iter().find(|c| c.cloud_id == cloud_id)
    }

    /// Ledger entry for a cloud, created empty on first use
    pub fn find_or_insert(&mut self, cloud_id: &str) -> &mut CloudAllocation {
        let index = match self.clouds.iter().position(|c| c.cloud_id == cloud_id) {
            Some(index) => index,
            None => {
                self.clouds.push(CloudAllocation::new(cloud_id));
                self.clouds.len() - 1
            }
        };
        &mut self.clouds[index]
    }

    /// Names of every node held by any cloud
    pub fn in_use(&self) -> HashSet<&str> {
        self.clouds
            .iter()
            .flat_map(CloudAllocation::iter_nodes)
            .map(|(_, node)| node)
            .collect()
    }
}

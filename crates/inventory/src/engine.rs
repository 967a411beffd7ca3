//! Allocation engine
//!
//! Runs the allocation rules as read-modify-write cycles against the
//! document store. A lost compare-and-write restarts the whole cycle from a
//! fresh read; nothing is merged in place.

use crate::allocation;
use crate::error::InventoryError;
use crate::models::{CloudAllocation, NodeInfo};
use crate::store::{DocumentStore, Inventory};
use crds::NodeGroup;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tuning knobs for the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How many times a conflicting write is retried before giving up.
    /// Running out returns `Conflict`, which the controller handles like any
    /// other reconcile error: it requeues with backoff and starts a fresh
    /// cycle.
    pub max_conflict_retries: u32,

    /// Artificial delay before each allocation attempt, emulating a slow
    /// hardware manager. Zero disables it.
    pub allocation_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            allocation_delay: Duration::ZERO,
        }
    }
}

/// A node held by a cloud, with its catalog record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedNode {
    /// Group the node is assigned to
    pub group_name: String,
    /// Inventory node name
    pub node_name: String,
    /// Catalog record (`None` if the catalog no longer lists the node)
    pub info: Option<NodeInfo>,
}

impl AllocatedNode {
    /// Hardware profile from the catalog record, if known
    pub fn hw_profile(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.hwprofile.as_str())
    }
}

/// Allocates and releases inventory nodes on behalf of NodePools
#[derive(Clone)]
pub struct AllocationEngine {
    inventory: Inventory,
    settings: EngineSettings,
}

impl AllocationEngine {
    /// Creates an engine over a document store
    pub fn new(store: Arc<dyn DocumentStore>, settings: EngineSettings) -> Self {
        Self {
            inventory: Inventory::new(store),
            settings,
        }
    }

    /// Checks that the request could be satisfied from currently free nodes.
    pub async fn check_feasibility(&self, groups: &[NodeGroup]) -> Result<(), InventoryError> {
        let snapshot = self.inventory.load().await?;
        allocation::feasibility_check(&snapshot.resources, &snapshot.allocations, groups)
    }

    /// Allocates at most one node to `group` and persists the ledger.
    ///
    /// Returns `Ok(None)` without writing anything if the group is already at
    /// its requested size.
    pub async fn allocate_one(
        &self,
        cloud_id: &str,
        group: &NodeGroup,
    ) -> Result<Option<AllocatedNode>, InventoryError> {
        if !self.settings.allocation_delay.is_zero() {
            tokio::time::sleep(self.settings.allocation_delay).await;
        }

        let mut conflicts = 0;
        loop {
            let mut snapshot = self.inventory.load().await?;

            let Some(node_name) =
                allocation::reserve(&snapshot.resources, &mut snapshot.allocations, cloud_id, group)?
            else {
                debug!("Node group {} of cloud {} is fully allocated", group.name, cloud_id);
                return Ok(None);
            };
            let info = snapshot.resources.nodes.get(&node_name).cloned();

            match self.inventory.save(&snapshot).await {
                Ok(()) => {
                    info!(
                        "Allocated node {} to cloud {} group {} (profile {})",
                        node_name, cloud_id, group.name, group.hw_profile
                    );
                    return Ok(Some(AllocatedNode {
                        group_name: group.name.clone(),
                        node_name,
                        info,
                    }));
                }
                Err(InventoryError::Conflict(msg)) if conflicts < self.settings.max_conflict_retries => {
                    conflicts += 1;
                    debug!(
                        "Conflict allocating for cloud {} group {} (attempt {}): {}, retrying",
                        cloud_id, group.name, conflicts, msg
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether every group of the request is at its requested size
    pub async fn is_fully_allocated(
        &self,
        cloud_id: &str,
        groups: &[NodeGroup],
    ) -> Result<bool, InventoryError> {
        let snapshot = self.inventory.load().await?;
        Ok(allocation::is_fully_allocated(&snapshot.allocations, cloud_id, groups))
    }

    /// Sorted names of nodes assigned to the request's groups
    pub async fn assigned_nodes(
        &self,
        cloud_id: &str,
        groups: &[NodeGroup],
    ) -> Result<Vec<String>, InventoryError> {
        let snapshot = self.inventory.load().await?;
        Ok(allocation::assigned_nodes(&snapshot.allocations, cloud_id, groups))
    }

    /// Every node the ledger holds for `cloud_id`, across all of its groups
    pub async fn assignments(&self, cloud_id: &str) -> Result<Vec<AllocatedNode>, InventoryError> {
        let snapshot = self.inventory.load().await?;
        let Some(cloud) = snapshot.allocations.find(cloud_id) else {
            return Ok(Vec::new());
        };

        Ok(cloud
            .iter_nodes()
            .map(|(group, node)| {
                let info = snapshot.resources.nodes.get(node).cloned();
                if info.is_none() {
                    warn!("Node {} held by cloud {} is missing from the catalog", node, cloud_id);
                }
                AllocatedNode {
                    group_name: group.to_string(),
                    node_name: node.to_string(),
                    info,
                }
            })
            .collect())
    }

    /// Removes the cloud's ledger entry, freeing all of its nodes.
    ///
    /// Returns the removed entry, or `None` (without writing) if the cloud
    /// held nothing.
    pub async fn release(&self, cloud_id: &str) -> Result<Option<CloudAllocation>, InventoryError> {
        let mut conflicts = 0;
        loop {
            let mut snapshot = self.inventory.load().await?;

            let Some(removed) = allocation::remove_cloud(&mut snapshot.allocations, cloud_id) else {
                info!("No allocated nodes found for cloud {}", cloud_id);
                return Ok(None);
            };

            match self.inventory.save(&snapshot).await {
                Ok(()) => {
                    info!("Released {} nodes of cloud {}", removed.iter_nodes().count(), cloud_id);
                    return Ok(Some(removed));
                }
                Err(InventoryError::Conflict(msg)) if conflicts < self.settings.max_conflict_retries => {
                    conflicts += 1;
                    debug!("Conflict releasing cloud {} (attempt {}): {}, retrying", cloud_id, conflicts, msg);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Free node count per profile, for shortfall diagnostics
    pub async fn free_by_profile(&self) -> Result<std::collections::BTreeMap<String, usize>, InventoryError> {
        let snapshot = self.inventory.load().await?;
        Ok(allocation::free_by_profile(&snapshot.resources, &snapshot.allocations))
    }
}

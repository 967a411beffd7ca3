//! Test utilities for unit testing the reconciler
//!
//! Builders for NodePools plus in-memory fakes of the lifecycle and NodePool
//! clients that record what the reconciler asked them to do.

use crate::error::ControllerError;
use crate::lifecycle::{NodeLifecycle, ProvisionRequest};
use crate::pool_client::NodePoolClient;
use crate::reconciler::{Reconciler, NODEPOOL_FINALIZER};
use crds::{set_condition, ConditionStatus, NodeGroup, NodePool, NodePoolSpec, NodePoolStatus, ProvisionReason, PROVISIONED};
use inventory::{AllocationEngine, EngineSettings, MockDocumentStore};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Inventory with three nodes: two of profile `P`, one of profile `Q`
pub const TEST_RESOURCES: &str = r#"
hwprofiles:
  - P
  - Q
nodes:
  n0:
    hwprofile: P
    bmc:
      address: "idrac-virtualmedia+https://10.16.2.1/redfish/v1/Systems/System.Embedded.1"
      username-base64: YWRtaW4=
      password-base64: bXlwYXNz
    interfaces:
      - name: eno1
        label: bootable-interface
        macAddress: "c6:b6:13:a0:02:01"
    hostname: n0.example.com
  n1:
    hwprofile: P
    bmc:
      address: "idrac-virtualmedia+https://10.16.2.2/redfish/v1/Systems/System.Embedded.1"
      username-base64: YWRtaW4=
      password-base64: bXlwYXNz
    interfaces:
      - name: eno1
        label: bootable-interface
        macAddress: "c6:b6:13:a0:02:02"
    hostname: n1.example.com
  q0:
    hwprofile: Q
    bmc:
      address: "idrac-virtualmedia+https://10.16.2.3/redfish/v1/Systems/System.Embedded.1"
      username-base64: YWRtaW4=
      password-base64: bXlwYXNz
    bootMACAddress: "c6:b6:13:a0:02:03"
    hostname: q0.example.com
"#;

/// Helper to create a node group
pub fn group(name: &str, hw_profile: &str, size: usize) -> NodeGroup {
    NodeGroup {
        name: name.to_string(),
        hw_profile: hw_profile.to_string(),
        size,
    }
}

/// Helper to create a live NodePool at generation 1 without status or finalizer
pub fn create_test_node_pool(name: &str, cloud_id: &str, groups: Vec<NodeGroup>) -> NodePool {
    NodePool {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: NodePoolSpec {
            cloud_id: cloud_id.to_string(),
            node_group: groups,
        },
        status: None,
    }
}

/// Sets the `Provisioned` condition of `pool`
pub fn with_condition(
    mut pool: NodePool,
    status: ConditionStatus,
    reason: ProvisionReason,
    observed_generation: Option<i64>,
) -> NodePool {
    let mut pool_status = pool.status.take().unwrap_or_default();
    set_condition(&mut pool_status.conditions, PROVISIONED, status, reason, "test", observed_generation);
    pool.status = Some(pool_status);
    pool
}

/// Adds the NodePool finalizer
pub fn with_finalizer(mut pool: NodePool) -> NodePool {
    pool.metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(NODEPOOL_FINALIZER.to_string());
    pool
}

/// Marks `pool` as being deleted
pub fn with_deletion(mut pool: NodePool) -> NodePool {
    let timestamp: Time = serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap();
    pool.metadata.deletion_timestamp = Some(timestamp);
    pool
}

/// Applies the last status the fake client received, as the API server would
pub fn apply_last_status(mut pool: NodePool, pools: &FakeNodePoolClient) -> NodePool {
    if let Some(status) = pools.last_status() {
        pool.status = Some(status);
    }
    pool
}

/// A node the fake lifecycle has published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedNode {
    pub cloud_id: String,
    pub group_name: String,
    pub hw_profile: String,
    pub boot_mac: String,
}

#[derive(Debug, Default)]
struct FakeLifecycleState {
    nodes: BTreeMap<String, PublishedNode>,
    terminating: BTreeSet<String>,
    provision_calls: u32,
    deprovisioned: Vec<String>,
    fail_provision: bool,
    fail_deprovision: bool,
}

/// In-memory node lifecycle
#[derive(Debug, Clone, Default)]
pub struct FakeLifecycle {
    state: Arc<Mutex<FakeLifecycleState>>,
}

impl FakeLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published nodes by name
    pub fn nodes(&self) -> BTreeMap<String, PublishedNode> {
        self.state.lock().unwrap().nodes.clone()
    }

    pub fn provision_calls(&self) -> u32 {
        self.state.lock().unwrap().provision_calls
    }

    /// Node names passed to `deprovision`, in call order
    pub fn deprovisioned(&self) -> Vec<String> {
        self.state.lock().unwrap().deprovisioned.clone()
    }

    /// Forgets a published node, as if the Node object were deleted by hand
    pub fn forget(&self, node_name: &str) {
        self.state.lock().unwrap().nodes.remove(node_name);
    }

    /// Seeds a published node, as if left behind by an earlier owner
    pub fn publish(&self, node_name: &str, node: PublishedNode) {
        self.state.lock().unwrap().nodes.insert(node_name.to_string(), node);
    }

    /// Marks a node as deleted but held back by someone else's finalizer
    pub fn set_terminating(&self, node_name: &str, terminating: bool) {
        let mut state = self.state.lock().unwrap();
        if terminating {
            state.terminating.insert(node_name.to_string());
        } else {
            state.terminating.remove(node_name);
        }
    }

    pub fn fail_provision(&self, fail: bool) {
        self.state.lock().unwrap().fail_provision = fail;
    }

    pub fn fail_deprovision(&self, fail: bool) {
        self.state.lock().unwrap().fail_deprovision = fail;
    }
}

#[async_trait::async_trait]
impl NodeLifecycle for FakeLifecycle {
    async fn provision(&self, request: ProvisionRequest<'_>) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.provision_calls += 1;
        if state.fail_provision {
            return Err(ControllerError::Reconciliation(format!(
                "injected failure provisioning {}",
                request.node_name
            )));
        }
        if state.terminating.contains(request.node_name) {
            return Err(ControllerError::Reconciliation(format!(
                "Node {} is still being deleted",
                request.node_name
            )));
        }
        state.nodes.insert(
            request.node_name.to_string(),
            PublishedNode {
                cloud_id: request.cloud_id.to_string(),
                group_name: request.group_name.to_string(),
                hw_profile: request.hw_profile.to_string(),
                boot_mac: request.info.boot_mac().to_string(),
            },
        );
        Ok(())
    }

    async fn deprovision(&self, node_name: &str) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deprovision {
            return Err(ControllerError::Reconciliation(format!(
                "injected failure deprovisioning {}",
                node_name
            )));
        }
        state.deprovisioned.push(node_name.to_string());
        state.nodes.remove(node_name);
        Ok(())
    }

    async fn is_provisioned(
        &self,
        node_name: &str,
        cloud_id: &str,
        group_name: &str,
    ) -> Result<bool, ControllerError> {
        let state = self.state.lock().unwrap();
        if state.terminating.contains(node_name) {
            return Ok(false);
        }
        Ok(state
            .nodes
            .get(node_name)
            .is_some_and(|n| n.cloud_id == cloud_id && n.group_name == group_name))
    }
}

#[derive(Debug, Default)]
struct FakePoolState {
    statuses: Vec<(String, NodePoolStatus)>,
    finalizers_added: Vec<String>,
    finalizers_removed: Vec<String>,
}

/// In-memory NodePool client
#[derive(Debug, Clone, Default)]
pub struct FakeNodePoolClient {
    state: Arc<Mutex<FakePoolState>>,
}

impl FakeNodePoolClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of status patches sent
    pub fn status_patches(&self) -> usize {
        self.state.lock().unwrap().statuses.len()
    }

    pub fn last_status(&self) -> Option<NodePoolStatus> {
        self.state.lock().unwrap().statuses.last().map(|(_, s)| s.clone())
    }

    /// NodePool names the finalizer was added to
    pub fn finalizers_added(&self) -> Vec<String> {
        self.state.lock().unwrap().finalizers_added.clone()
    }

    /// NodePool names the finalizer was removed from
    pub fn finalizers_removed(&self) -> Vec<String> {
        self.state.lock().unwrap().finalizers_removed.clone()
    }
}

#[async_trait::async_trait]
impl NodePoolClient for FakeNodePoolClient {
    async fn patch_status(&self, name: &str, status: &NodePoolStatus) -> Result<(), ControllerError> {
        self.state
            .lock()
            .unwrap()
            .statuses
            .push((name.to_string(), status.clone()));
        Ok(())
    }

    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<(), ControllerError> {
        assert_eq!(finalizer, NODEPOOL_FINALIZER);
        self.state.lock().unwrap().finalizers_added.push(name.to_string());
        Ok(())
    }

    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), ControllerError> {
        assert_eq!(finalizer, NODEPOOL_FINALIZER);
        self.state.lock().unwrap().finalizers_removed.push(name.to_string());
        Ok(())
    }
}

/// Everything a reconciler test needs to drive and inspect one reconciler
pub struct TestHarness {
    pub reconciler: Reconciler,
    pub store: MockDocumentStore,
    pub lifecycle: FakeLifecycle,
    pub pools: FakeNodePoolClient,
}

/// Helper to create a reconciler over [`TEST_RESOURCES`] and fresh fakes
pub fn create_test_harness() -> TestHarness {
    create_test_harness_with(MockDocumentStore::with_resources(TEST_RESOURCES))
}

/// Helper to create a reconciler over an existing mock store
pub fn create_test_harness_with(store: MockDocumentStore) -> TestHarness {
    let lifecycle = FakeLifecycle::new();
    let pools = FakeNodePoolClient::new();
    let engine = AllocationEngine::new(Arc::new(store.clone()), EngineSettings::default());
    let reconciler = Reconciler::new(engine, lifecycle.clone(), pools.clone(), Duration::from_secs(15));

    TestHarness {
        reconciler,
        store,
        lifecycle,
        pools,
    }
}

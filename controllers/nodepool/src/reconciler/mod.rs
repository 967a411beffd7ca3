//! Reconciliation logic for NodePools.
//!
//! A NodePool moves through three phases (see [`state`]):
//! - `Uninitialized`: admission. The request is checked against free
//!   inventory and either accepted (InProgress) or rejected (Failed).
//! - `InProgress`: one node per group is allocated per pass, every allocated
//!   node is published as a `Node` object, and the pass is repeated until all
//!   groups are full.
//! - `Terminal`: nothing to do.
//!
//! Deletion is handled before any of that: the finalizer holds the NodePool
//! until its Nodes are torn down and its nodes are back in the inventory.

pub mod state;

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::lifecycle::{NodeLifecycle, ProvisionRequest};
use crate::pool_client::NodePoolClient;
use crds::{set_condition, ConditionStatus, NodePool, ProvisionReason, PROVISIONED};
use inventory::{AllocationEngine, InventoryError};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use state::NodePoolState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Finalizer guarding NodePool deletion until its nodes are released
pub const NODEPOOL_FINALIZER: &str = "hwmgr-emulator.oran.openshift.io/nodepool-finalizer";

/// What the watcher should do after a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Wait for the next change to the NodePool
    Done,
    /// Reconcile again after the given delay
    RequeueAfter(Duration),
}

impl From<ReconcileOutcome> for Action {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(15, 300), // 15 seconds min, 5 minutes max
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Key identifying a NodePool in the backoff map
pub fn resource_key(pool: &NodePool) -> String {
    format!("{}/{}", pool.namespace().unwrap_or_default(), pool.name_any())
}

fn has_finalizer(pool: &NodePool) -> bool {
    pool.finalizers().iter().any(|f| f == NODEPOOL_FINALIZER)
}

/// Reconciles NodePools against the inventory.
pub struct Reconciler {
    pub(crate) engine: AllocationEngine,
    pub(crate) lifecycle: Box<dyn NodeLifecycle + Send + Sync>,
    pub(crate) pools: Box<dyn NodePoolClient + Send + Sync>,
    requeue_interval: Duration,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        engine: AllocationEngine,
        lifecycle: impl NodeLifecycle + Send + Sync + 'static,
        pools: impl NodePoolClient + Send + Sync + 'static,
        requeue_interval: Duration,
    ) -> Self {
        Self {
            engine,
            lifecycle: Box::new(lifecycle),
            pools: Box::new(pools),
            requeue_interval,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records a failed reconcile of `key` and returns the delay before retrying
    pub fn error_backoff(&self, key: &str) -> Duration {
        // A poisoned map only loses backoff history
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_insert_with(BackoffState::new);
        state.increment_error();
        let delay = state.backoff.next_backoff();
        debug!("NodePool {} failed {} time(s) in a row, retrying in {:?}", key, state.error_count, delay);
        delay
    }

    /// Clears the backoff of `key` after a successful reconcile
    pub fn reset_backoff(&self, key: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(mut state) = states.remove(key) {
            state.reset();
        }
    }

    /// Reconciles a NodePool.
    pub async fn reconcile(&self, pool: &NodePool) -> Result<ReconcileOutcome, ControllerError> {
        let name = pool.name_any();

        if pool.metadata.deletion_timestamp.is_some() {
            if has_finalizer(pool) {
                self.finalize(pool).await?;
            } else {
                debug!("NodePool {} is being deleted and has no finalizer, nothing to do", name);
            }
            return Ok(ReconcileOutcome::Done);
        }

        if !has_finalizer(pool) {
            info!("Adding finalizer to NodePool {}", name);
            self.pools.add_finalizer(&name, NODEPOOL_FINALIZER).await?;
        }

        match NodePoolState::determine(pool) {
            NodePoolState::Uninitialized => self.handle_create(pool).await,
            NodePoolState::InProgress => self.handle_in_progress(pool).await,
            NodePoolState::Terminal => {
                debug!("NodePool {} is in a terminal state", name);
                Ok(ReconcileOutcome::Done)
            }
        }
    }

    /// Admission: checks the request against free inventory.
    async fn handle_create(&self, pool: &NodePool) -> Result<ReconcileOutcome, ControllerError> {
        let name = pool.name_any();
        let generation = pool.metadata.generation;
        let mut status = pool.status.clone().unwrap_or_default();

        info!("Handling creation of NodePool {} (cloud {})", name, pool.spec.cloud_id);

        match self.engine.check_feasibility(&pool.spec.node_group).await {
            Ok(()) => {
                set_condition(
                    &mut status.conditions,
                    PROVISIONED,
                    ConditionStatus::False,
                    ProvisionReason::InProgress,
                    "Handling creation",
                    generation,
                );
                self.pools.patch_status(&name, &status).await?;
                Ok(ReconcileOutcome::RequeueAfter(Duration::ZERO))
            }
            Err(e @ InventoryError::InsufficientResources { .. }) => {
                warn!("NodePool {} rejected: {}", name, e);
                set_condition(
                    &mut status.conditions,
                    PROVISIONED,
                    ConditionStatus::False,
                    ProvisionReason::Failed,
                    format!("Creation request failed: {}", e),
                    generation,
                );
                self.pools.patch_status(&name, &status).await?;
                Ok(ReconcileOutcome::Done)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// One allocation pass over an admitted NodePool.
    async fn handle_in_progress(&self, pool: &NodePool) -> Result<ReconcileOutcome, ControllerError> {
        let name = pool.name_any();
        let cloud_id = pool.spec.cloud_id.as_str();
        let groups = pool.spec.node_group.as_slice();

        if !self.engine.is_fully_allocated(cloud_id, groups).await? {
            self.allocate_pass(&name, pool).await?;
        }

        self.converge_nodes(cloud_id).await?;

        let original = pool.status.clone().unwrap_or_default();
        let mut status = original.clone();
        status.properties.node_names = self.engine.assigned_nodes(cloud_id, groups).await?;

        let outcome = if self.engine.is_fully_allocated(cloud_id, groups).await? {
            info!("NodePool {} is fully allocated", name);
            set_condition(
                &mut status.conditions,
                PROVISIONED,
                ConditionStatus::True,
                ProvisionReason::Completed,
                "Created",
                pool.metadata.generation,
            );
            ReconcileOutcome::Done
        } else {
            ReconcileOutcome::RequeueAfter(self.requeue_interval)
        };

        if status != original {
            self.pools.patch_status(&name, &status).await?;
        }

        Ok(outcome)
    }

    /// Allocates at most one node per group. A group short of hardware does
    /// not hold back the groups after it.
    async fn allocate_pass(&self, name: &str, pool: &NodePool) -> Result<(), ControllerError> {
        let cloud_id = pool.spec.cloud_id.as_str();

        for group in &pool.spec.node_group {
            match self.engine.allocate_one(cloud_id, group).await {
                Ok(Some(node)) => {
                    debug!("NodePool {} group {} got node {}", name, group.name, node.node_name);
                }
                Ok(None) => {}
                Err(e @ InventoryError::InsufficientResources { .. }) => {
                    let free = self.engine.free_by_profile().await.unwrap_or_default();
                    warn!(
                        "NodePool {} is waiting for hardware: {} (free by profile: {:?})",
                        name, e, free
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Publishes every node the ledger holds for `cloud_id` that is not yet
    /// fully provisioned for this cloud and group.
    async fn converge_nodes(&self, cloud_id: &str) -> Result<(), ControllerError> {
        for node in self.engine.assignments(cloud_id).await? {
            if self
                .lifecycle
                .is_provisioned(&node.node_name, cloud_id, &node.group_name)
                .await?
            {
                continue;
            }

            let Some(info) = node.info.as_ref() else {
                return Err(ControllerError::Reconciliation(format!(
                    "node {} held by cloud {} is missing from the inventory catalog",
                    node.node_name, cloud_id
                )));
            };

            self.lifecycle
                .provision(ProvisionRequest {
                    cloud_id,
                    node_name: &node.node_name,
                    group_name: &node.group_name,
                    hw_profile: &info.hwprofile,
                    info,
                })
                .await?;
        }

        Ok(())
    }

    /// Tears down a deleted NodePool's Nodes, releases its inventory and
    /// drops the finalizer.
    async fn finalize(&self, pool: &NodePool) -> Result<(), ControllerError> {
        let name = pool.name_any();
        let cloud_id = pool.spec.cloud_id.as_str();

        info!("Finalizing NodePool {} (cloud {})", name, cloud_id);

        for node in self.engine.assignments(cloud_id).await? {
            if let Err(e) = self.lifecycle.deprovision(&node.node_name).await {
                error!("Failed to deprovision node {} of NodePool {}: {}", node.node_name, name, e);
                return Err(e);
            }
        }

        self.engine.release(cloud_id).await?;
        self.pools.remove_finalizer(&name, NODEPOOL_FINALIZER).await?;

        info!("NodePool {} finalized", name);
        Ok(())
    }
}

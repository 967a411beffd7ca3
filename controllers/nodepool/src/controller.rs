//! Main controller implementation.
//!
//! Wires the inventory, lifecycle and NodePool clients into a reconciler and
//! runs the NodePool watcher in a background task.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::lifecycle::KubeNodeLifecycle;
use crate::pool_client::KubeNodePoolClient;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::NodePool;
use inventory::{AllocationEngine, ConfigMapStore};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for NodePool management.
pub struct Controller {
    node_pool_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts watching.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing NodePool Controller");

        let kube_client = Client::try_default().await?;
        let ns = config.namespace.as_str();

        let store = Arc::new(ConfigMapStore::new(kube_client.clone(), ns));
        let engine = AllocationEngine::new(store, config.engine_settings());

        // A missing inventory is not fatal here; NodePools will error and
        // retry until the ConfigMap shows up
        match engine.free_by_profile().await {
            Ok(free) => info!("Inventory loaded, free nodes by profile: {:?}", free),
            Err(e) => warn!("Inventory is not readable yet (will retry per NodePool): {}", e),
        }

        let reconciler = Arc::new(Reconciler::new(
            engine,
            KubeNodeLifecycle::new(kube_client.clone(), ns),
            KubeNodePoolClient::new(kube_client.clone(), ns),
            config.requeue_interval,
        ));

        let node_pool_api: Api<NodePool> = Api::namespaced(kube_client, ns);
        let watcher = Watcher::new(reconciler, node_pool_api, config.concurrency);

        let node_pool_watcher = tokio::spawn(async move { watcher.watch_node_pools().await });

        Ok(Self { node_pool_watcher })
    }

    /// Runs the controller until the watcher exits.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("NodePool Controller running");

        self.node_pool_watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("NodePool watcher panicked: {}", e)))?
            .map_err(|e| ControllerError::Watch(format!("NodePool watcher error: {}", e)))?;

        Ok(())
    }
}

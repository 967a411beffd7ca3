//! Kubernetes resource watchers.
//!
//! Watches NodePools and drives the reconciler through
//! `kube_runtime::Controller`, which handles reconnection, queueing and
//! per-object serialization.

use crate::error::ControllerError;
use crate::reconciler::{resource_key, Reconciler};
use crds::NodePool;
use futures::StreamExt;
use kube::Api;
use kube_runtime::{controller::{Action, Config as ControllerConfig}, watcher, Controller};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Watches NodePools for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    node_pool_api: Api<NodePool>,
    concurrency: u16,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, node_pool_api: Api<NodePool>, concurrency: u16) -> Self {
        Self {
            reconciler,
            node_pool_api,
            concurrency,
        }
    }

    /// Starts watching NodePool resources. Runs until the watch stream ends.
    pub async fn watch_node_pools(&self) -> Result<(), ControllerError> {
        info!("Starting NodePool watcher (concurrency {})", self.concurrency);

        // Error policy: requeue with per-NodePool Fibonacci backoff
        let error_policy = |pool: Arc<NodePool>, error: &ControllerError, ctx: Arc<Reconciler>| {
            let key = resource_key(&pool);
            let delay = ctx.error_backoff(&key);
            error!("Reconciliation error for NodePool {}: {} (retrying in {:?})", key, error, delay);
            Action::requeue(delay)
        };

        let reconcile = |pool: Arc<NodePool>, ctx: Arc<Reconciler>| async move {
            let key = resource_key(&pool);
            debug!("Reconciling NodePool {}", key);

            let outcome = ctx.reconcile(&pool).await?;
            ctx.reset_backoff(&key);
            debug!("Reconciled NodePool {}: {:?}", key, outcome);
            Ok::<Action, ControllerError>(outcome.into())
        };

        let controller_config = ControllerConfig::default().concurrency(self.concurrency);

        Controller::new(self.node_pool_api.clone(), watcher::Config::default())
            .with_config(controller_config)
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                if let Err(e) = res {
                    error!("Controller error for NodePool: {}", e);
                }
            })
            .await;

        Ok(())
    }
}

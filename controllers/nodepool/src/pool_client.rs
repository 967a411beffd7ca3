//! NodePool writes
//!
//! The reconciler only ever writes three things back to a NodePool: its
//! status and the add/remove of its finalizer. They sit behind a trait so
//! the reconciler can be tested without an API server.

use crate::error::ControllerError;
use crds::{NodePool, NodePoolStatus};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

/// Writes status and finalizers of NodePools
#[async_trait::async_trait]
pub trait NodePoolClient: Send + Sync {
    /// Replaces the status of the named NodePool
    async fn patch_status(&self, name: &str, status: &NodePoolStatus) -> Result<(), ControllerError>;

    /// Adds `finalizer` unless already present
    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<(), ControllerError>;

    /// Removes `finalizer`; a NodePool that is already gone is not an error
    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), ControllerError>;
}

/// Kubernetes-backed NodePool client
pub struct KubeNodePoolClient {
    api: Api<NodePool>,
}

impl KubeNodePoolClient {
    /// Client for NodePools in `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    async fn patch_finalizers(&self, name: &str, finalizers: Vec<String>) -> Result<(), kube::Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl NodePoolClient for KubeNodePoolClient {
    async fn patch_status(&self, name: &str, status: &NodePoolStatus) -> Result<(), ControllerError> {
        let patch = serde_json::json!({ "status": status });
        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Updated status of NodePool {}", name);
        Ok(())
    }

    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<(), ControllerError> {
        // Read the current list so finalizers owned by others survive the patch
        let pool = self.api.get(name).await?;
        let mut finalizers = pool.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }

        finalizers.push(finalizer.to_string());
        self.patch_finalizers(name, finalizers).await?;
        debug!("Added finalizer {} to NodePool {}", finalizer, name);
        Ok(())
    }

    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), ControllerError> {
        let pool = match self.api.get(name).await {
            Ok(pool) => pool,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let finalizers: Vec<String> = pool
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        match self.patch_finalizers(name, finalizers).await {
            Ok(()) => {
                debug!("Removed finalizer {} from NodePool {}", finalizer, name);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

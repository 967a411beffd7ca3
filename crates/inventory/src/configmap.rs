//! ConfigMap-backed document store
//!
//! The inventory document is a ConfigMap; its `resourceVersion` is the
//! document version. Writes are JSON merge patches that carry the
//! `resourceVersion` read earlier, which the API server treats as a
//! precondition and rejects with 409 if the object moved on.

use crate::error::InventoryError;
use crate::store::{Document, DocumentStore};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

/// Name of the inventory ConfigMap
pub const NODELIST_CONFIGMAP: &str = "nodelist";

/// Document store backed by a namespaced ConfigMap
pub struct ConfigMapStore {
    api: Api<ConfigMap>,
    namespace: String,
    name: String,
}

impl ConfigMapStore {
    /// Store for the `nodelist` ConfigMap in `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self::with_name(client, namespace, NODELIST_CONFIGMAP)
    }

    /// Store for an arbitrary ConfigMap
    pub fn with_name(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for ConfigMapStore {
    fn location(&self) -> String {
        format!("configmap {}/{}", self.namespace, self.name)
    }

    async fn read(&self) -> Result<Document, InventoryError> {
        match self.api.get(&self.name).await {
            Ok(cm) => Ok(Document {
                data: cm.data.unwrap_or_default(),
                version: cm.metadata.resource_version,
            }),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(InventoryError::NotFound(self.location()))
            }
            Err(e) => Err(InventoryError::Kube(e)),
        }
    }

    async fn write(&self, document: &Document) -> Result<(), InventoryError> {
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": document.version,
            },
            "data": document.data,
        });

        match self
            .api
            .patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(updated) => {
                debug!(
                    "Updated {} (resourceVersion {:?} -> {:?})",
                    self.location(),
                    document.version,
                    updated.metadata.resource_version
                );
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(InventoryError::Conflict(format!(
                "{} was modified concurrently",
                self.location()
            ))),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(InventoryError::NotFound(self.location()))
            }
            Err(e) => Err(InventoryError::Kube(e)),
        }
    }
}

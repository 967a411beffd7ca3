//! Node lifecycle
//!
//! Publishes an allocated inventory node to the cluster: a BMC credential
//! Secret, a `Node` object bound to the NodePool, and the Node's status.
//! Each step is individually idempotent, so a provision interrupted half-way
//! is finished by simply calling `provision` again.

use crate::error::ControllerError;
use base64::prelude::*;
use crds::{set_condition, Bmc, ConditionStatus, Node, NodeSpec, NodeStatus, ProvisionReason, PROVISIONED};
use inventory::NodeInfo;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Label carrying the cloudID of the owning NodePool
pub const CLOUD_ID_LABEL: &str = "hwmgr.openshift.io/cloud-id";
/// Standard managed-by label
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of the managed-by label
pub const MANAGED_BY: &str = "hwmgr-emulator";

/// Name of the BMC credential Secret for a node
pub fn bmc_secret_name(node_name: &str) -> String {
    format!("{}-bmc-secret", node_name)
}

/// Everything needed to publish one allocated node
#[derive(Debug, Clone, Copy)]
pub struct ProvisionRequest<'a> {
    /// cloudID of the owning NodePool
    pub cloud_id: &'a str,
    /// Inventory node name (also the Node object name)
    pub node_name: &'a str,
    /// Group the node was allocated to
    pub group_name: &'a str,
    /// Hardware profile the node matched
    pub hw_profile: &'a str,
    /// Catalog record of the node
    pub info: &'a NodeInfo,
}

/// Creates and deletes the cluster objects backing allocated nodes
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait NodeLifecycle: Send + Sync {
    /// Creates the credential Secret and Node object and fills in Node status
    async fn provision(&self, request: ProvisionRequest<'_>) -> Result<(), ControllerError>;

    /// Deletes the Node object and its Secret; missing objects are not an error
    async fn deprovision(&self, node_name: &str) -> Result<(), ControllerError>;

    /// Whether the Node exists, is not being deleted, is bound to `cloud_id`
    /// and `group_name`, and has been fully provisioned
    async fn is_provisioned(
        &self,
        node_name: &str,
        cloud_id: &str,
        group_name: &str,
    ) -> Result<bool, ControllerError>;
}

fn ownership_labels(cloud_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLOUD_ID_LABEL.to_string(), cloud_id.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
    ])
}

fn decode_credential(node_name: &str, field: &str, encoded: &str) -> Result<Vec<u8>, ControllerError> {
    BASE64_STANDARD.decode(encoded.trim()).map_err(|e| {
        ControllerError::Decode(format!("BMC {} of node {}: {}", field, node_name, e))
    })
}

/// Builds the BMC credential Secret for a node
pub fn build_bmc_secret(cloud_id: &str, node_name: &str, info: &NodeInfo) -> Result<Secret, ControllerError> {
    let username = decode_credential(node_name, "username", &info.bmc.username_base64)?;
    let password = decode_credential(node_name, "password", &info.bmc.password_base64)?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(bmc_secret_name(node_name)),
            labels: Some(ownership_labels(cloud_id)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            ("username".to_string(), ByteString(username)),
            ("password".to_string(), ByteString(password)),
        ])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}

/// Builds the status written onto a provisioned Node
pub fn build_node_status(node_name: &str, info: &NodeInfo) -> NodeStatus {
    let mut conditions = Vec::new();
    set_condition(
        &mut conditions,
        PROVISIONED,
        ConditionStatus::True,
        ProvisionReason::Completed,
        "Provisioned",
        None,
    );

    NodeStatus {
        bmc: Some(Bmc {
            address: info.bmc.address.clone(),
            credentials_name: bmc_secret_name(node_name),
        }),
        boot_mac_address: info.boot_mac().to_string(),
        hostname: info.hostname.clone(),
        conditions,
    }
}

/// Kubernetes-backed node lifecycle
pub struct KubeNodeLifecycle {
    nodes: Api<Node>,
    secrets: Api<Secret>,
}

impl KubeNodeLifecycle {
    /// Lifecycle operating on Nodes and Secrets in `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            nodes: Api::namespaced(client.clone(), namespace),
            secrets: Api::namespaced(client, namespace),
        }
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), ControllerError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        match self.secrets.create(&PostParams::default(), secret).await {
            Ok(_) => {
                info!("Created BMC secret {}", name);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("BMC secret {} exists, updating", name);
                self.secrets
                    .patch(&name, &PatchParams::default(), &Patch::Merge(secret))
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Points an existing Node at the new owner. A Node still being deleted
    /// cannot be reused until it is gone.
    async fn rebind_node(&self, node: &Node) -> Result<(), ControllerError> {
        let name = node.metadata.name.clone().unwrap_or_default();
        let Some(existing) = self.nodes.get_opt(&name).await? else {
            return Err(ControllerError::Reconciliation(format!(
                "Node {} disappeared while being created",
                name
            )));
        };

        if existing.metadata.deletion_timestamp.is_some() {
            return Err(ControllerError::Reconciliation(format!(
                "Node {} is still being deleted",
                name
            )));
        }

        let labels_match = node.metadata.labels.iter().flatten().all(|(k, v)| {
            existing.metadata.labels.as_ref().and_then(|l| l.get(k)) == Some(v)
        });
        if existing.spec == node.spec && labels_match {
            debug!("Node {} already exists", name);
            return Ok(());
        }

        info!(
            "Rebinding Node {} from cloud {} group {} to cloud {} group {}",
            name, existing.spec.node_pool, existing.spec.group_name, node.spec.node_pool, node.spec.group_name
        );
        let patch = serde_json::json!({
            "metadata": { "labels": node.metadata.labels },
            "spec": node.spec,
        });
        self.nodes
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl NodeLifecycle for KubeNodeLifecycle {
    async fn provision(&self, request: ProvisionRequest<'_>) -> Result<(), ControllerError> {
        let ProvisionRequest {
            cloud_id,
            node_name,
            group_name,
            hw_profile,
            info,
        } = request;

        let secret = build_bmc_secret(cloud_id, node_name, info)?;
        self.apply_secret(&secret).await?;

        let mut node = Node::new(
            node_name,
            NodeSpec {
                node_pool: cloud_id.to_string(),
                group_name: group_name.to_string(),
                hw_profile: hw_profile.to_string(),
            },
        );
        node.metadata.labels = Some(ownership_labels(cloud_id));

        match self.nodes.create(&PostParams::default(), &node).await {
            Ok(_) => info!("Created Node {} for cloud {} group {}", node_name, cloud_id, group_name),
            Err(kube::Error::Api(ae)) if ae.code == 409 => self.rebind_node(&node).await?,
            Err(e) => return Err(e.into()),
        }

        let patch = serde_json::json!({ "status": build_node_status(node_name, info) });
        self.nodes
            .patch_status(node_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("Provisioned Node {}", node_name);

        Ok(())
    }

    async fn deprovision(&self, node_name: &str) -> Result<(), ControllerError> {
        let secret_name = bmc_secret_name(node_name);
        match self.secrets.delete(&secret_name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted BMC secret {}", secret_name),
            Err(kube::Error::Api(ae)) if ae.code == 404 => debug!("BMC secret {} already gone", secret_name),
            Err(e) => return Err(e.into()),
        }

        match self.nodes.delete(node_name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted Node {}", node_name),
            Err(kube::Error::Api(ae)) if ae.code == 404 => debug!("Node {} already gone", node_name),
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    async fn is_provisioned(
        &self,
        node_name: &str,
        cloud_id: &str,
        group_name: &str,
    ) -> Result<bool, ControllerError> {
        Ok(self
            .nodes
            .get_opt(node_name)
            .await?
            .is_some_and(|node| node.is_provisioned_for(cloud_id, group_name)))
    }
}

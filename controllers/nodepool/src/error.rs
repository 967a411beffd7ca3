//! Controller-specific error types.
//!
//! Inventory and Kubernetes failures are wrapped as-is; the remaining
//! variants cover what only this controller can get wrong.

use inventory::InventoryError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the NodePool Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Inventory read, write or allocation error
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// BMC credentials in the inventory are not valid base64
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

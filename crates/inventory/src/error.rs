//! Inventory errors

use thiserror::Error;

/// Errors that can occur when reading, writing or allocating from the inventory
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Referenced document or catalog entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Catalog section is missing or malformed
    #[error("Parse error: {0}")]
    Parse(String),

    /// YAML serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Compare-and-write lost against a concurrent writer
    #[error("Conflicting update: {0}")]
    Conflict(String),

    /// Not enough free nodes of a hardware profile
    #[error("not enough free resources for hardware profile {profile}: requested={requested}, available={available}")]
    InsufficientResources {
        /// Hardware profile that ran short
        profile: String,
        /// Nodes asked for
        requested: usize,
        /// Free nodes of that profile
        available: usize,
    },
}

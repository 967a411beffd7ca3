//! Hardware Inventory
//!
//! The emulated hardware manager keeps its whole world in one document
//! (the `nodelist` ConfigMap):
//!
//! - `resources`: the catalog of hardware profiles and faked physical nodes
//! - `allocations`: the ledger of which nodes are bound to which cloud/group
//!
//! This crate reads and writes that document with optimistic concurrency and
//! implements the allocation rules on top of it.
//!
//! # Example
//!
//! ```no_run
//! use inventory::{AllocationEngine, ConfigMapStore, EngineSettings};
//! use std::sync::Arc;
//!
//! # async fn example(client: kube::Client, group: crds::NodeGroup) -> Result<(), inventory::InventoryError> {
//! let store = Arc::new(ConfigMapStore::new(client, "oran-hwmgr"));
//! let engine = AllocationEngine::new(store, EngineSettings::default());
//!
//! engine.check_feasibility(std::slice::from_ref(&group)).await?;
//! if let Some(node) = engine.allocate_one("cloud-1", &group).await? {
//!     println!("allocated {}", node.node_name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod allocation;
pub mod configmap;
pub mod engine;
pub mod error;
pub mod models;
pub mod store;
#[cfg(feature = "test-util")]
pub mod mock;

pub use configmap::{ConfigMapStore, NODELIST_CONFIGMAP};
pub use engine::{AllocatedNode, AllocationEngine, EngineSettings};
pub use error::InventoryError;
pub use models::*;
pub use store::{Document, DocumentStore, Inventory, Snapshot, ALLOCATIONS_KEY, RESOURCES_KEY};
#[cfg(feature = "test-util")]
pub use mock::MockDocumentStore;

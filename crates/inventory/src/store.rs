//! Versioned document store
//!
//! The inventory lives in a single key-value document. `DocumentStore`
//! abstracts where that document is kept so the allocation engine can run
//! against a ConfigMap in production and an in-memory fake in tests.

use crate::error::InventoryError;
use crate::models::{Allocations, Resources};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Document key holding the hardware catalog
pub const RESOURCES_KEY: &str = "resources";

/// Document key holding the allocation ledger
pub const ALLOCATIONS_KEY: &str = "allocations";

/// A key-value document plus the version it was read at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    /// Raw string values by key
    pub data: BTreeMap<String, String>,

    /// Opaque version used for compare-and-write (`None` skips the check)
    pub version: Option<String>,
}

/// Trait for versioned document storage
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Human-readable location of the document, for logs
    fn location(&self) -> String;

    /// Reads the current document.
    ///
    /// Returns `InventoryError::NotFound` if the document does not exist.
    async fn read(&self) -> Result<Document, InventoryError>;

    /// Writes `document` if the stored version still equals `document.version`.
    ///
    /// Returns `InventoryError::Conflict` if another writer got there first.
    async fn write(&self, document: &Document) -> Result<(), InventoryError>;
}

/// Parsed inventory at a point in time
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Hardware catalog
    pub resources: Resources,
    /// Allocation ledger
    pub allocations: Allocations,
    /// Raw document the snapshot was parsed from
    pub document: Document,
}

/// Reads and writes the inventory sections of a document
#[derive(Clone)]
pub struct Inventory {
    store: Arc<dyn DocumentStore>,
}

impl Inventory {
    /// Wraps a document store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Loads and parses the catalog and ledger.
    ///
    /// A missing or malformed `allocations` section is not an error: it is the
    /// normal state before the first allocation, so it reads as an empty ledger.
    pub async fn load(&self) -> Result<Snapshot, InventoryError> {
        let document = self.store.read().await?;

        let raw = document
            .data
            .get(RESOURCES_KEY)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| InventoryError::Parse(format!(
                "{} has no {} section",
                self.store.location(),
                RESOURCES_KEY
            )))?;
        let resources: Resources = serde_yaml::from_str(raw).map_err(|e| {
            InventoryError::Parse(format!(
                "unable to parse {} from {}: {}",
                RESOURCES_KEY,
                self.store.location(),
                e
            ))
        })?;

        let allocations = match document.data.get(ALLOCATIONS_KEY) {
            Some(raw) if !raw.trim().is_empty() => match serde_yaml::from_str::<Allocations>(raw) {
                Ok(allocations) => allocations,
                Err(e) => {
                    info!("Unable to parse allocations from {}, treating as empty: {}", self.store.location(), e);
                    Allocations::default()
                }
            },
            _ => {
                debug!("No allocations in {} yet", self.store.location());
                Allocations::default()
            }
        };

        Ok(Snapshot {
            resources,
            allocations,
            document,
        })
    }

    /// Serializes the snapshot's ledger and writes it back with a version check.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), InventoryError> {
        let mut document = snapshot.document.clone();
        document
            .data
            .insert(ALLOCATIONS_KEY.to_string(), serde_yaml::to_string(&snapshot.allocations)?);
        self.store.write(&document).await
    }
}

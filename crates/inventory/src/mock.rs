//! Mock document store for unit testing
//!
//! Keeps the document in memory with an integer version. It can be told to
//! lose the next N compare-and-writes, or to let a competing writer land a
//! real change between a read and the next write.

use crate::error::InventoryError;
use crate::store::{Document, DocumentStore, ALLOCATIONS_KEY, RESOURCES_KEY};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MockState {
    data: Option<BTreeMap<String, String>>,
    version: u64,
    pending_conflicts: u32,
    interleaved: Option<(String, String)>,
    writes: u32,
    conflicts: u32,
}

/// Mock document store for testing
#[derive(Debug, Clone, Default)]
pub struct MockDocumentStore {
    state: Arc<Mutex<MockState>>,
}

impl MockDocumentStore {
    /// Creates a store whose document does not exist
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding only a `resources` section
    pub fn with_resources(resources_yaml: &str) -> Self {
        let store = Self::new();
        store.set_value(RESOURCES_KEY, resources_yaml);
        store
    }

    /// Sets a key as an out-of-band writer would (bumps the version)
    pub fn set_value(&self, key: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        state.version += 1;
    }

    /// Current value of a key
    pub fn value(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.data.as_ref().and_then(|d| d.get(key).cloned())
    }

    /// Raw `allocations` section
    pub fn allocations_yaml(&self) -> Option<String> {
        self.value(ALLOCATIONS_KEY)
    }

    /// Makes the next `count` writes fail as if another writer won the race
    pub fn inject_conflicts(&self, count: u32) {
        self.state.lock().unwrap().pending_conflicts = count;
    }

    /// Applies `key = value` as another writer right before the next write
    /// lands, so that write loses on the version check
    pub fn interleave_write(&self, key: &str, value: &str) {
        self.state.lock().unwrap().interleaved = Some((key.to_string(), value.to_string()));
    }

    /// Number of successful writes
    pub fn write_count(&self) -> u32 {
        self.state.lock().unwrap().writes
    }

    /// Number of rejected writes
    pub fn conflict_count(&self) -> u32 {
        self.state.lock().unwrap().conflicts
    }
}

#[async_trait::async_trait]
impl DocumentStore for MockDocumentStore {
    fn location(&self) -> String {
        "mock document".to_string()
    }

    async fn read(&self) -> Result<Document, InventoryError> {
        let state = self.state.lock().unwrap();
        match &state.data {
            Some(data) => Ok(Document {
                data: data.clone(),
                version: Some(state.version.to_string()),
            }),
            None => Err(InventoryError::NotFound(self.location())),
        }
    }

    async fn write(&self, document: &Document) -> Result<(), InventoryError> {
        let mut state = self.state.lock().unwrap();
        if state.data.is_none() {
            return Err(InventoryError::NotFound(self.location()));
        }

        if let Some((key, value)) = state.interleaved.take() {
            if let Some(data) = state.data.as_mut() {
                data.insert(key, value);
            }
            state.version += 1;
        }

        if state.pending_conflicts > 0 {
            // Someone else wrote in between
            state.pending_conflicts -= 1;
            state.version += 1;
            state.conflicts += 1;
            return Err(InventoryError::Conflict(format!("version is now {}", state.version)));
        }

        if let Some(version) = &document.version {
            if *version != state.version.to_string() {
                state.conflicts += 1;
                return Err(InventoryError::Conflict(format!(
                    "expected version {}, found {}",
                    version, state.version
                )));
            }
        }

        state.data = Some(document.data.clone());
        state.version += 1;
        state.writes += 1;
        Ok(())
    }
}

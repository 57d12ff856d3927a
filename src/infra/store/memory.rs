//! In-memory identity store.

use std::collections::HashMap;

use crate::core::{IdentityStore, TaskIdentity, TaskPoolError, UnitRecord};

/// Identity store kept in process memory, for development and testing.
///
/// A registry takes its store by value. To keep records across registries
/// (e.g. to exercise a restart without touching disk), wrap the store in
/// `Arc<parking_lot::Mutex<_>>` and hand each registry a clone of the handle.
#[derive(Debug, Clone)]
pub struct InMemoryIdentityStore<T> {
    records: HashMap<TaskIdentity, UnitRecord<T>>,
}

impl<T> InMemoryIdentityStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Number of identities with a record.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record has been written.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T> Default for InMemoryIdentityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> IdentityStore<T> for InMemoryIdentityStore<T> {
    fn get(&self, identity: &TaskIdentity) -> Result<Option<UnitRecord<T>>, TaskPoolError> {
        Ok(self.records.get(identity).cloned())
    }

    fn put(&mut self, identity: &TaskIdentity, record: UnitRecord<T>) -> Result<(), TaskPoolError> {
        self.records.insert(identity.clone(), record);
        Ok(())
    }
}

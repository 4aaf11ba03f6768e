use std::collections::BTreeMap;

use vigil_core::{Status, StatusRecord};

use crate::{PersistenceError, StatusStore};

/// Volatile store for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStatusStore {
    records: BTreeMap<String, StatusRecord>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl StatusStore for MemoryStatusStore {
    fn get(&self, resident_id: &str) -> Option<StatusRecord> {
        self.records.get(resident_id).cloned()
    }

    fn put(&mut self, resident_id: &str, status: Status) -> Result<(), PersistenceError> {
        self.records
            .insert(resident_id.to_string(), StatusRecord::new(resident_id, status));
        Ok(())
    }

    fn snapshot(&self) -> BTreeMap<String, StatusRecord> {
        self.records.clone()
    }
}

pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;
use vigil_core::{Status, StatusRecord};

pub use file::FileStatusStore;
pub use memory::MemoryStatusStore;

/// The snapshot could not be written.  The in-memory record has already been
/// updated when this is returned.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode state snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Last confirmed status per resident.
///
/// `put` replaces the whole record for the id.  Implementations that persist
/// must write the full snapshot, not a delta, before returning `Ok`.
pub trait StatusStore: Send {
    fn get(&self, resident_id: &str) -> Option<StatusRecord>;

    fn put(&mut self, resident_id: &str, status: Status) -> Result<(), PersistenceError>;

    /// Copy of every record, ordered by resident id.
    fn snapshot(&self) -> BTreeMap<String, StatusRecord>;
}

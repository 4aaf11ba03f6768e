use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use vigil_core::{Status, StatusRecord, format_utc_iso};

use crate::{PersistenceError, StatusStore};

/// On-disk shape of one resident entry: `{"status": "...", "timestamp": "..."}`.
///
/// Only `status` has to be valid.  Older writers put free-form dates such as
/// `Mon 01/15/2024` in `timestamp`, so it is read as raw JSON and parsed
/// separately.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    status: Status,
    #[serde(default)]
    timestamp: Value,
}

/// Store backed by a single flat JSON object, rewritten wholesale on every
/// `put`.
#[derive(Debug)]
pub struct FileStatusStore {
    path: PathBuf,
    records: BTreeMap<String, StatusRecord>,
}

impl FileStatusStore {
    /// Load the snapshot at `path`.
    ///
    /// A missing file is a cold start.  An unreadable or corrupt file is
    /// logged and treated as empty; individual malformed entries are skipped
    /// so one bad record does not discard the others.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path);
        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The snapshot exactly as it is written to disk.
    pub fn render(&self) -> Result<String, PersistenceError> {
        let entries: BTreeMap<&str, StoredEntry> = self
            .records
            .iter()
            .map(|(id, record)| {
                (
                    id.as_str(),
                    StoredEntry {
                        status: record.status,
                        timestamp: Value::String(format_utc_iso(record.observed_at)),
                    },
                )
            })
            .collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    fn persist(&self) -> Result<(), PersistenceError> {
        let rendered = self.render()?;

        write_atomically(&self.path, rendered.as_bytes()).map_err(|source| {
            PersistenceError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }
}

impl StatusStore for FileStatusStore {
    fn get(&self, resident_id: &str) -> Option<StatusRecord> {
        self.records.get(resident_id).cloned()
    }

    fn put(&mut self, resident_id: &str, status: Status) -> Result<(), PersistenceError> {
        let mut record = StatusRecord::new(resident_id, status);
        // Millisecond precision keeps memory equal to what a reload yields.
        record.observed_at = record.observed_at.trunc_subsecs(3);
        self.records.insert(resident_id.to_string(), record);
        self.persist()
    }

    fn snapshot(&self) -> BTreeMap<String, StatusRecord> {
        self.records.clone()
    }
}

fn load_records(path: &Path) -> BTreeMap<String, StatusRecord> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no state file yet, starting empty");
            return BTreeMap::new();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read state file, starting empty");
            return BTreeMap::new();
        }
    };

    let object = match serde_json::from_str::<serde_json::Map<String, Value>>(&raw) {
        Ok(object) => object,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "corrupt state file, starting empty");
            return BTreeMap::new();
        }
    };

    let fallback = file_modified_at(path);
    let mut records = BTreeMap::new();
    for (resident_id, value) in object {
        match serde_json::from_value::<StoredEntry>(value) {
            Ok(entry) => {
                let observed_at = parse_timestamp(&entry.timestamp).unwrap_or_else(|| {
                    warn!(
                        resident = %resident_id,
                        timestamp = %entry.timestamp,
                        "unparseable timestamp in state entry, using file modification time"
                    );
                    fallback
                });
                records.insert(
                    resident_id.clone(),
                    StatusRecord {
                        resident_id,
                        status: entry.status,
                        observed_at,
                    },
                );
            }
            Err(err) => {
                warn!(
                    resident = %resident_id,
                    error = %err,
                    path = %path.display(),
                    "skipping malformed state entry"
                );
            }
        }
    }

    info!(path = %path.display(), residents = records.len(), "loaded resident state");
    records
}

fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    let raw = raw.as_str()?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

fn file_modified_at(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Write to a `.tmp` sibling, fsync, then rename over `path` so a crash never
/// leaves a half-written snapshot behind.
fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "state.json".to_string());
        path.with_file_name(format!("{filename}.tmp"))
    };

    let write_result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.flush()?;
        file.sync_all()
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

//! Reading and (optionally) regenerating the local notification snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::{Map, Value, json};
use thiserror::Error;
use vigil_core::{ExtractionError, Status, extract_from_local_document, now_utc_iso};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("local snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("local snapshot {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("local snapshot {path}: {source}")]
    Extraction {
        path: PathBuf,
        #[source]
        source: ExtractionError,
    },
}

/// Status encoded in the notification file at `path`.
pub fn read_local_status(path: &Path) -> Result<Status, SnapshotError> {
    let doc = read_document(path)?;
    extract_from_local_document(&doc).map_err(|source| SnapshotError::Extraction {
        path: path.to_path_buf(),
        source,
    })
}

/// Rewrite the notification file with a random presence status, fresh
/// timestamps and matching vital signs.  Other fields are preserved.  A
/// missing file is created.
pub fn regenerate(path: &Path) -> Result<Status, SnapshotError> {
    let mut doc = match fs::metadata(path) {
        Ok(_) => read_document(path)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Value::Object(Map::new()),
        Err(source) => {
            return Err(SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut rng = rand::thread_rng();
    let status = *Status::PRESENCE
        .choose(&mut rng)
        .unwrap_or(&Status::Absent);
    let now = now_utc_iso();

    let Some(root) = doc.as_object_mut() else {
        return Err(SnapshotError::Extraction {
            path: path.to_path_buf(),
            source: ExtractionError::MissingField("Resident"),
        });
    };
    let resident = root
        .entry("Resident")
        .or_insert_with(|| Value::Object(Map::new()));
    if !resident.is_object() {
        *resident = Value::Object(Map::new());
    }
    if let Some(resident) = resident.as_object_mut() {
        resident.insert("Status".to_string(), json!(status.label()));
        resident.insert("Timestamp".to_string(), json!(now));
    }
    root.insert("VitalSigns".to_string(), vital_signs(status, &mut rng));
    root.insert("Timestamp".to_string(), json!(now));

    let rendered = serde_json::to_string_pretty(&doc).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let io_err = |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    fs::write(path, rendered).map_err(io_err)?;
    Ok(status)
}

/// Vital signs are only sampled while the resident is in bed.
fn vital_signs(status: Status, rng: &mut impl Rng) -> Value {
    if status != Status::PresentBed {
        return json!({
            "Heart": { "Value": 0, "Limit": 0 },
            "Breath": { "Value": 0, "Limit": 0 },
            "Temperature": { "Value": 0, "Limit": 0 }
        });
    }

    let temperature = (rng.gen_range(36.1..=37.5_f64) * 10.0).round() / 10.0;
    json!({
        "Heart": { "Value": rng.gen_range(60..=100), "Limit": 0 },
        "Breath": { "Value": rng.gen_range(12..=20), "Limit": 0 },
        "Temperature": { "Value": temperature, "Limit": 0 }
    })
}

fn read_document(path: &Path) -> Result<Value, SnapshotError> {
    let raw = fs::read_to_string(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })
}

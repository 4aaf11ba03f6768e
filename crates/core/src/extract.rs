//! Status extraction from the two independent sources.
//!
//! The local notification file carries the status at `Resident.Status`.  The
//! portal payload is a map keyed by sensor/resident id whose entries hold the
//! same notification document serialised as a string under `notification`.

use serde_json::Value;
use thiserror::Error;

use crate::status::Status;

/// Why a status could not be determined.
///
/// Kept separate from [`Status::Unknown`]: an `Unknown` status was reported
/// by the sensor, an `ExtractionError` means nothing usable was reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("field `{0}` missing from notification document")]
    MissingField(&'static str),

    #[error("resident `{0}` not found in portal payload")]
    ResidentNotFound(String),

    #[error("resident `{0}` has no notification data")]
    MissingNotification(String),

    #[error("invalid notification JSON for resident `{resident_id}`: {reason}")]
    InvalidNotificationJson { resident_id: String, reason: String },

    #[error("resident status missing from notification for `{0}`")]
    MissingResidentStatus(String),

    #[error("unrecognized status value `{0}`")]
    UnrecognizedStatus(String),
}

/// Read `Resident.Status` from a locally held notification document.
pub fn extract_from_local_document(doc: &Value) -> Result<Status, ExtractionError> {
    let resident = doc
        .get("Resident")
        .ok_or(ExtractionError::MissingField("Resident"))?;
    let raw = resident
        .get("Status")
        .and_then(Value::as_str)
        .ok_or(ExtractionError::MissingField("Resident.Status"))?;
    parse_status(raw)
}

/// Read the status of `resident_id` from the portal's sensor payload.
pub fn extract_from_api_payload(
    payload: &Value,
    resident_id: &str,
) -> Result<Status, ExtractionError> {
    let entry = payload
        .get(resident_id)
        .ok_or_else(|| ExtractionError::ResidentNotFound(resident_id.to_string()))?;

    // The portal sends `null` or `""` for sensors without a recent
    // notification; both count as missing.
    let raw_notification = entry
        .get("notification")
        .and_then(Value::as_str)
        .filter(|raw| !raw.trim().is_empty())
        .ok_or_else(|| ExtractionError::MissingNotification(resident_id.to_string()))?;

    let notification: Value = serde_json::from_str(raw_notification).map_err(|err| {
        ExtractionError::InvalidNotificationJson {
            resident_id: resident_id.to_string(),
            reason: err.to_string(),
        }
    })?;

    let raw = notification
        .get("Resident")
        .and_then(|resident| resident.get("Status"))
        .and_then(Value::as_str)
        .ok_or_else(|| ExtractionError::MissingResidentStatus(resident_id.to_string()))?;
    parse_status(raw)
}

fn parse_status(raw: &str) -> Result<Status, ExtractionError> {
    Status::from_label(raw).ok_or_else(|| ExtractionError::UnrecognizedStatus(raw.to_string()))
}

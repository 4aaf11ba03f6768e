use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence / vital state of a resident as reported by the sensor feed.
///
/// Both the locally generated notification file and the portal API are
/// mapped into this vocabulary before they are compared.
///
/// | Status               | Meaning                                   |
/// |----------------------|-------------------------------------------|
/// | `S_ABSENT`           | Nobody detected in the apartment          |
/// | `S_PRESENT_ROOM`     | Resident present in the living area       |
/// | `S_PRESENT_BED`      | Resident in bed (vital signs are sampled) |
/// | `S_PRESENT_BATHROOM` | Resident in the bathroom                  |
/// | `S_UNKNOWN`          | Sensor reported an indeterminate state    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "S_ABSENT")]
    Absent,
    #[serde(rename = "S_PRESENT_ROOM")]
    PresentRoom,
    #[serde(rename = "S_PRESENT_BED")]
    PresentBed,
    #[serde(rename = "S_PRESENT_BATHROOM")]
    PresentBathroom,
    #[serde(rename = "S_UNKNOWN")]
    Unknown,
}

impl Status {
    /// Presence states a sensor can legitimately emit. `Unknown` is excluded.
    pub const PRESENCE: [Status; 4] = [
        Status::Absent,
        Status::PresentRoom,
        Status::PresentBed,
        Status::PresentBathroom,
    ];

    /// Wire label used in notification files, the portal payload and the
    /// persisted state file.
    pub fn label(self) -> &'static str {
        match self {
            Self::Absent => "S_ABSENT",
            Self::PresentRoom => "S_PRESENT_ROOM",
            Self::PresentBed => "S_PRESENT_BED",
            Self::PresentBathroom => "S_PRESENT_BATHROOM",
            Self::Unknown => "S_UNKNOWN",
        }
    }

    /// Parse a wire label. Surrounding whitespace is ignored; matching is
    /// case-sensitive because the feed always emits upper case.
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim() {
            "S_ABSENT" => Some(Self::Absent),
            "S_PRESENT_ROOM" => Some(Self::PresentRoom),
            "S_PRESENT_BED" => Some(Self::PresentBed),
            "S_PRESENT_BATHROOM" => Some(Self::PresentBathroom),
            "S_UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Last confirmed status of one resident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub resident_id: String,
    pub status: Status,
    pub observed_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(resident_id: impl Into<String>, status: Status) -> Self {
        Self {
            resident_id: resident_id.into(),
            status,
            observed_at: Utc::now(),
        }
    }
}

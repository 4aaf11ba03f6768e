pub mod extract;
pub mod status;
pub mod time;

pub use extract::{ExtractionError, extract_from_api_payload, extract_from_local_document};
pub use status::{Status, StatusRecord};
pub use time::{format_utc_iso, now_utc_iso};

use thiserror::Error;
use vigil_core::ExtractionError;

use crate::portal::PortalError;
use crate::snapshot::SnapshotError;
use crate::transfer::TransferError;

/// Coarse failure class of a cycle, used for log routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Upload, download or API call failed.
    TransientIo,
    /// Malformed or missing status fields in either source.
    Extraction,
    /// No session, or the portal rejected it.
    Authentication,
}

/// Why a reconciliation cycle could not complete its checks.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("no authenticated portal session")]
    MissingSession,

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("remote file {0} missing after sync")]
    RemoteFileMissing(String),

    #[error(transparent)]
    Portal(#[from] PortalError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    LocalSnapshot(#[from] SnapshotError),
}

impl CycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingSession => ErrorKind::Authentication,
            Self::Portal(PortalError::Unauthenticated(_)) => ErrorKind::Authentication,
            Self::Portal(PortalError::Decode(_)) => ErrorKind::Extraction,
            Self::Portal(_) => ErrorKind::TransientIo,
            Self::Transfer(_) | Self::RemoteFileMissing(_) => ErrorKind::TransientIo,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::LocalSnapshot(SnapshotError::Io { .. }) => ErrorKind::TransientIo,
            Self::LocalSnapshot(_) => ErrorKind::Extraction,
        }
    }
}

use crate::types::CollectionKind;
use thiserror::Error;

/// Every error surfaced by the desk.
///
/// The Display string is what the operator sees; nothing else crosses the
/// presentation boundary.
#[derive(Error, Debug)]
pub enum DeskError {
    #[error("Failed to fetch {kind}: {message}")]
    Fetch { kind: CollectionKind, message: String },

    #[error("Failed to delete {kind} {identity}: {message}")]
    Delete {
        kind:     CollectionKind,
        identity: String,
        message:  String,
    },

    #[error("Request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No {kind} item with id '{id}' in the current snapshot")]
    UnknownItem { kind: CollectionKind, id: String },

    #[error("Session torn down")]
    TornDown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeskError {
    /// Wrap any failure of a collection read as a FetchFailure.
    pub fn fetch(kind: CollectionKind, source: DeskError) -> Self {
        match source {
            e @ DeskError::Fetch { .. } | e @ DeskError::TornDown => e,
            other => DeskError::Fetch {
                kind,
                message: other.to_string(),
            },
        }
    }

    /// Wrap any failure of a delete request as a DeleteFailure.
    pub fn delete(kind: CollectionKind, identity: impl ToString, source: DeskError) -> Self {
        match source {
            e @ DeskError::Delete { .. } | e @ DeskError::TornDown => e,
            other => DeskError::Delete {
                kind,
                identity: identity.to_string(),
                message: other.to_string(),
            },
        }
    }
}

pub type DeskResult<T> = Result<T, DeskError>;

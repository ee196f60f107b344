use crate::status::UpdateStatus;
use crate::types::LogicalId;

/// Result alias used across the revision engine.
pub type Result<T, E = UpdateError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    #[error("No update with id {logical_id}")]
    NotFound { logical_id: LogicalId },
    #[error("No published update")]
    NoPublishedUpdate,
    #[error("Cannot change status {from} to status {to}")]
    InvalidTransition { from: UpdateStatus, to: UpdateStatus },
    #[error("Unknown update status '{0}'")]
    UnknownStatusLiteral(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Revision {revision_number} of update {logical_id} already exists")]
    DuplicateRevision {
        logical_id: LogicalId,
        revision_number: u32,
    },
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode revision: {0}")]
    Encoding(String),
    #[error("Failed to decode revision: {0}")]
    Decoding(#[from] minicbor::decode::Error),
}

/// Upstream field checks on an [`crate::revision::UpdateDraft`].
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Field '{0}' must not be blank")]
    Blank(&'static str),
    #[error("A scheduled update requires a scheduled date")]
    MissingScheduledDate,
    #[error("'{0}' is not a valid update id")]
    MalformedLogicalId(String),
}

impl UpdateError {
    /// HTTP status the transport layer answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            UpdateError::UnknownStatusLiteral(_)
            | UpdateError::InvalidTransition { .. }
            | UpdateError::Validation(_) => 400,
            UpdateError::NotFound { .. } => 404,
            UpdateError::NoPublishedUpdate => 204,
            UpdateError::DuplicateRevision { .. } => 409,
            UpdateError::Storage(_) | UpdateError::Encoding(_) | UpdateError::Decoding(_) => 500,
        }
    }
}

//! Error types shared by the store, the ingestion pipelines and the views.

use thiserror::Error;

/// Failures raised by a document-store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("document encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A single operation was rejected by the collection (type mismatch,
    /// duplicate `_id`, ...).
    #[error("write to `{collection}` rejected: {message}")]
    Rejected { collection: String, message: String },

    /// An ordered bulk write stopped at `failed_index`. The `applied`
    /// operations before it remain committed.
    #[error(
        "bulk write to `{collection}` stopped at operation {failed_index} ({applied} applied): {message}"
    )]
    Bulk {
        collection: String,
        applied: usize,
        failed_index: usize,
        message: String,
    },

    #[error("collection `{0}` lock poisoned")]
    Poisoned(String),
}

impl StoreError {
    /// Number of operations that were committed before the failure.
    pub fn applied(&self) -> usize {
        match self {
            StoreError::Bulk { applied, .. } => *applied,
            _ => 0,
        }
    }
}

/// Failures raised while turning feed records into store writes.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("feed payload is malformed: {0}")]
    Feed(String),

    #[error("record encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// `true` for errors caused by the shape of the input rather than the backend.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            IngestError::MissingField(_) | IngestError::InvalidField { .. } | IngestError::Feed(_)
        )
    }
}

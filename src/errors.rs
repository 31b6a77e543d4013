use thiserror::Error;

use crate::document::WriteOutcome;
use crate::transaction::record::TransactionStatus;

/// Status codes the store answers with while it is overloaded or briefly
/// unavailable. Requests failing with one of these may be re-issued.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Returns `true` if `status` belongs to [`RETRYABLE_STATUS_CODES`].
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

#[derive(Error, Debug)]
pub enum CouchError {
    /// Network unreachable, no response, or a retryable status code.
    #[error("Transient error: {reason} (status {status:?})")]
    Transient { reason: String, status: Option<u16> },

    /// The retry executor gave up. Wraps the last transient failure.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<CouchError>,
    },

    #[error("Unexpected status code {status}: {reason}")]
    UnexpectedStatus { status: u16, reason: String },

    #[error("Document not found: {id} ({reason})")]
    NotFound { id: String, reason: String },

    /// The transaction record could not be persisted. Nothing else was written.
    #[error("Transaction setup failed: {reason}")]
    TransactionSetup {
        reason: String,
        outcome: Option<WriteOutcome>,
        #[source]
        source: Option<Box<CouchError>>,
    },

    /// Supplied revisions disagreed with the stored ones. Nothing was written.
    #[error("Version conflict on documents: {}", ids.join(", "))]
    VersionConflict { ids: Vec<String> },

    /// One or more documents in a bulk write failed.
    #[error("Bulk operation failed for {} documents", failed.len())]
    BulkOperation { failed: Vec<WriteOutcome> },

    /// A failed transaction was compensated. `status` tells whether the
    /// compensation itself succeeded.
    #[error("Transaction failed and was compensated ({status}): {cause}")]
    Rollback {
        status: TransactionStatus,
        #[source]
        cause: Box<CouchError>,
        outcomes: Vec<WriteOutcome>,
        compensation_error: Option<Box<CouchError>>,
    },

    #[error("Duplicate document ids in transaction: {}", ids.join(", "))]
    DuplicateIds { ids: Vec<String> },

    #[error("No documents provided")]
    NoDocs,

    #[error("Invalid document: {reason}")]
    InvalidDocument { reason: String },

    #[error("Stream parsing error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The row consumer of a streamed query failed.
    #[error("Row callback failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
}

impl CouchError {
    /// Builds a transient error for a response carrying `status`.
    pub fn retryable_status(reason: impl Into<String>, status: u16) -> Self {
        CouchError::Transient {
            reason: reason.into(),
            status: Some(status),
        }
    }

    /// Builds a transient error for a request that never got an answer.
    pub fn no_response() -> Self {
        CouchError::Transient {
            reason: "no response".to_string(),
            status: Some(503),
        }
    }

    /// Returns `true` for failures the retry executor may re-issue.
    pub fn is_transient(&self) -> bool {
        matches!(self, CouchError::Transient { .. })
    }

    /// Returns `true` if this error was produced after retries ran out.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, CouchError::RetriesExhausted { .. })
    }

    /// The HTTP status associated with the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CouchError::Transient { status, .. } => *status,
            CouchError::UnexpectedStatus { status, .. } => Some(*status),
            CouchError::RetriesExhausted { source, .. } => source.status(),
            CouchError::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CouchError>;

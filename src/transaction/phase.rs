use std::sync::Arc;

use crate::document::WriteOutcome;
use crate::transaction::record::TransactionStatus;

/// A step of the transaction protocol, reported to an optional hook.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionPhase {
    /// The pending record was written.
    Created { record_id: String },
    /// The snapshot of current revisions was taken.
    RevisionsFetched { found: usize, not_found: usize },
    /// The supplied revisions matched the snapshot.
    RevisionsChecked,
    /// The data write is about to be submitted.
    Started,
    UpdatesApplied { outcomes: Vec<WriteOutcome> },
    Completed,
    /// Compensating writes were submitted.
    RolledBack {
        status: TransactionStatus,
        outcomes: Vec<WriteOutcome>,
    },
    /// The terminal status was written to the record.
    StatusRecorded { status: TransactionStatus, persisted: bool },
}

/// Observer of [`TransactionPhase`] transitions.
pub type PhaseHook = Arc<dyn Fn(&TransactionPhase) + Send + Sync>;

use ahash::AHashMap as HashMap;

use crate::bulk::Snapshot;
use crate::document::{Document, WriteOutcome};
use crate::logger::Logger;

/// The outcomes of an applied bulk write, sorted for compensation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Successful writes to documents that existed in the snapshot.
    pub updated: Vec<WriteOutcome>,
    /// Successful writes that created new documents.
    pub created: Vec<WriteOutcome>,
    pub failed: Vec<WriteOutcome>,
}

impl ApplyReport {
    /// Sorts `outcomes` using the snapshot taken before the write.
    ///
    /// Outcomes are matched to documents by their `id`; an outcome without
    /// an id cannot be compensated and is skipped.
    pub fn classify(outcomes: &[WriteOutcome], snapshot: &Snapshot, logger: &Logger) -> Self {
        let mut report = ApplyReport::default();
        for outcome in outcomes {
            let Some(id) = outcome.id.as_deref() else {
                logger.warn(format_args!("Skipping write outcome without id: {:?}", outcome));
                continue;
            };
            if !outcome.is_ok() {
                report.failed.push(outcome.clone());
            } else if snapshot.not_found.contains_key(id) {
                report.created.push(outcome.clone());
            } else if snapshot.found.contains_key(id) {
                report.updated.push(outcome.clone());
            } else {
                logger.warn(format_args!(
                    "Document {} was written but is missing from the snapshot",
                    id
                ));
            }
        }
        report
    }

    /// Rebuilds the report of a write whose response was lost.
    ///
    /// `before` is the snapshot taken ahead of the write, `after` a fresh
    /// read of the same ids. A document counts as written when its revision
    /// moved; it was created when it had no live body before. Documents
    /// whose revision did not move are left out.
    pub fn reconcile(docs: &[Document], before: &Snapshot, after: &Snapshot) -> Self {
        let mut report = ApplyReport::default();
        for doc in docs {
            let Some(current) = after.rev_of(&doc.id) else {
                continue;
            };
            if before.rev_of(&doc.id).as_deref() == Some(current.as_str()) {
                continue;
            }
            let outcome = WriteOutcome::success(&doc.id, current);
            if before.found.contains_key(&doc.id) {
                report.updated.push(outcome);
            } else {
                report.created.push(outcome);
            }
        }
        report
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Builds the writes that undo the successful part of `report`.
///
/// Updated documents get their snapshot body back under the revision the
/// failed transaction just produced. Created documents are tombstoned under
/// their new revision.
pub fn plan_compensation(
    report: &ApplyReport,
    snapshot: &Snapshot,
    submitted: &HashMap<&str, &Document>,
) -> Vec<Document> {
    let mut writes = Vec::with_capacity(report.updated.len() + report.created.len());
    for outcome in &report.updated {
        let (Some(id), Some(rev)) = (outcome.id.as_deref(), outcome.rev.as_ref()) else {
            continue;
        };
        if let Some(before) = snapshot.found.get(id) {
            let mut restore = before.clone();
            restore.rev = Some(rev.clone());
            writes.push(restore);
        }
    }
    for outcome in &report.created {
        let (Some(id), Some(rev)) = (outcome.id.as_deref(), outcome.rev.as_ref()) else {
            continue;
        };
        if let Some(doc) = submitted.get(id) {
            writes.push((*doc).clone().into_tombstone(rev.clone()));
        }
    }
    writes
}

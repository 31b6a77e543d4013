use std::sync::Arc;

use ahash::AHashMap as HashMap;

use crate::bulk::{BulkDictionaryResolver, BulkWriter, Snapshot};
use crate::conflict::detection::{detect_conflicts, duplicate_ids};
use crate::document::{Document, WriteOutcome};
use crate::errors::{CouchError, Result};
use crate::logger::Logger;
use crate::retry::RetryExecutor;
use crate::transaction::compensation::{ApplyReport, plan_compensation};
use crate::transaction::phase::{PhaseHook, TransactionPhase};
use crate::transaction::record::{TransactionRecord, TransactionStatus};
use crate::transport::CouchTransport;

/// Writes several documents so that either all of them succeed or the
/// successful ones are compensated.
///
/// The store only checks revisions per document, so the coordinator
/// emulates a multi-document transaction:
///
/// 1. write a `pending` [`TransactionRecord`];
/// 2. snapshot the current revisions of all target documents;
/// 3. abort with [`CouchError::VersionConflict`] if any supplied revision
///    is stale, before anything is written;
/// 4. submit all documents in one bulk write;
/// 5. on any failed document, restore updated documents from the snapshot
///    and tombstone created ones, then fail with [`CouchError::Rollback`].
///    When the write itself fails, the ids are read again to find out what
///    the store applied before compensating;
/// 6. record the terminal status.
///
/// Writers that bypass the coordinator are not isolated against, and a
/// transaction id should be used once: after step 4 the store has changed
/// and the snapshot is no longer valid.
pub struct TransactionCoordinator<T: CouchTransport> {
    transport: Arc<T>,
    resolver: BulkDictionaryResolver<T>,
    writer: BulkWriter<T>,
    retry: RetryExecutor,
    logger: Logger,
    hook: Option<PhaseHook>,
}

impl<T: CouchTransport> TransactionCoordinator<T> {
    /// Creates a coordinator.
    ///
    /// # Arguments
    ///
    /// * `transport` - The store to write to.
    /// * `retry` - Retries the record writes and the snapshot reads. Data
    ///   writes are never retried by the coordinator.
    /// * `logger` - Receives progress and failure messages.
    pub fn new(transport: Arc<T>, retry: RetryExecutor, logger: Logger) -> Self {
        Self {
            resolver: BulkDictionaryResolver::new(Arc::clone(&transport), logger.clone()),
            writer: BulkWriter::new(Arc::clone(&transport), logger.clone()),
            transport,
            retry,
            logger,
            hook: None,
        }
    }

    /// Reports every protocol step to `hook`.
    pub fn with_phase_hook(mut self, hook: PhaseHook) -> Self {
        self.hook = Some(hook);
        self
    }

    fn emit(&self, phase: impl FnOnce() -> TransactionPhase) {
        if let Some(hook) = &self.hook {
            hook(&phase());
        }
    }

    /// Runs the transaction `transaction_id` over `docs`.
    ///
    /// # Returns
    ///
    /// The per-document outcomes of the data write when every document was
    /// written.
    ///
    /// # Errors
    ///
    /// * [`CouchError::DuplicateIds`] / [`CouchError::InvalidDocument`] -
    ///   rejected input, nothing written.
    /// * [`CouchError::TransactionSetup`] - the record could not be written.
    /// * [`CouchError::VersionConflict`] - stale revisions, nothing written.
    /// * [`CouchError::Rollback`] - the write failed and was compensated;
    ///   its `status` is `RolledBack` or `RollbackFailed`.
    /// * Errors of the snapshot read are returned as they are.
    pub async fn execute(&self, transaction_id: &str, docs: Vec<Document>) -> Result<Vec<WriteOutcome>> {
        self.logger.info(format_args!(
            "Starting bulk save transaction {} for {} documents",
            transaction_id,
            docs.len()
        ));
        for doc in &docs {
            doc.validate()?;
        }
        let duplicates = duplicate_ids(&docs);
        if !duplicates.is_empty() {
            return Err(CouchError::DuplicateIds { ids: duplicates });
        }

        let mut record = TransactionRecord::new(transaction_id, docs.clone());
        self.create_record(&mut record).await?;
        self.emit(|| TransactionPhase::Created {
            record_id: record.id.clone(),
        });

        let ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
        let snapshot = self.retry.execute(|| self.resolver.resolve(&ids)).await?;
        self.logger.debug(format_args!(
            "Fetched current revisions of {} documents",
            snapshot.found.len()
        ));
        self.emit(|| TransactionPhase::RevisionsFetched {
            found: snapshot.found.len(),
            not_found: snapshot.not_found.len(),
        });

        let conflicts = detect_conflicts(&docs, &snapshot);
        if !conflicts.is_empty() {
            for conflict in &conflicts {
                self.logger.warn(format_args!(
                    "Revision conflict on {}: supplied {:?}, stored {:?}",
                    conflict.id, conflict.supplied, conflict.stored
                ));
            }
            return Err(CouchError::VersionConflict {
                ids: conflicts.into_iter().map(|c| c.id).collect(),
            });
        }
        self.emit(|| TransactionPhase::RevisionsChecked);

        self.logger.info(format_args!("Transaction {} started", record.id));
        self.emit(|| TransactionPhase::Started);
        let outcomes = match self.writer.write(&docs).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                self.logger.error(format_args!(
                    "Transaction write failed, attempting rollback: {}",
                    err
                ));
                // The store may have applied the batch before the failure.
                let after = match self.retry.execute(|| self.resolver.resolve(&ids)).await {
                    Ok(after) => after,
                    Err(read_err) => {
                        self.logger.error(format_args!(
                            "Could not determine what transaction {} wrote: {}",
                            record.id, read_err
                        ));
                        return Err(self
                            .conclude(
                                &mut record,
                                TransactionStatus::RollbackFailed,
                                err,
                                Vec::new(),
                                Some(Box::new(read_err)),
                            )
                            .await);
                    }
                };
                let report = ApplyReport::reconcile(&docs, &snapshot, &after);
                return Err(self.roll_back(&mut record, &report, &snapshot, &docs, err).await);
            }
        };
        self.emit(|| TransactionPhase::UpdatesApplied {
            outcomes: outcomes.clone(),
        });

        let report = ApplyReport::classify(&outcomes, &snapshot, &self.logger);
        if report.has_failures() {
            self.logger.error(format_args!(
                "Transaction {} failed for {} documents, attempting rollback",
                record.id,
                report.failed.len()
            ));
            let cause = CouchError::BulkOperation {
                failed: report.failed.clone(),
            };
            return Err(self.roll_back(&mut record, &report, &snapshot, &docs, cause).await);
        }

        record.advance(TransactionStatus::Completed);
        self.logger.info(format_args!("Transaction {} completed", record.id));
        self.emit(|| TransactionPhase::Completed);
        self.record_status(&mut record).await;
        Ok(outcomes)
    }

    async fn create_record(&self, record: &mut TransactionRecord) -> Result<()> {
        let doc = record.to_document()?;
        let outcome = self
            .retry
            .execute(|| self.transport.put_document(&doc))
            .await
            .map_err(|err| CouchError::TransactionSetup {
                reason: "failed to create transaction document".to_string(),
                outcome: None,
                source: Some(Box::new(err)),
            })?;
        if !outcome.is_ok() {
            return Err(CouchError::TransactionSetup {
                reason: outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "failed to create transaction document".to_string()),
                outcome: Some(outcome),
                source: None,
            });
        }
        self.logger.debug(format_args!("Transaction document {} created", record.id));
        record.rev = outcome.rev;
        Ok(())
    }

    /// Compensates the successful writes in `report` and builds the error
    /// returned to the caller.
    async fn roll_back(
        &self,
        record: &mut TransactionRecord,
        report: &ApplyReport,
        snapshot: &Snapshot,
        docs: &[Document],
        cause: CouchError,
    ) -> CouchError {
        let submitted: HashMap<&str, &Document> =
            docs.iter().map(|d| (d.id.as_str(), d)).collect();
        let compensation = plan_compensation(report, snapshot, &submitted);
        self.logger.info(format_args!(
            "Compensating {} documents of transaction {}",
            compensation.len(),
            record.id
        ));

        let (status, outcomes, compensation_error) = match self.writer.write(&compensation).await {
            Ok(outcomes) => {
                let status = if outcomes.iter().all(WriteOutcome::is_ok) {
                    TransactionStatus::RolledBack
                } else {
                    TransactionStatus::RollbackFailed
                };
                (status, outcomes, None)
            }
            Err(err) => {
                self.logger.error(format_args!("Compensating write failed: {}", err));
                (TransactionStatus::RollbackFailed, Vec::new(), Some(Box::new(err)))
            }
        };
        self.conclude(record, status, cause, outcomes, compensation_error).await
    }

    /// Records the outcome of a rollback and builds the caller's error.
    async fn conclude(
        &self,
        record: &mut TransactionRecord,
        status: TransactionStatus,
        cause: CouchError,
        outcomes: Vec<WriteOutcome>,
        compensation_error: Option<Box<CouchError>>,
    ) -> CouchError {
        self.logger.warn(format_args!(
            "Transaction {} rolled back with status {}",
            record.id, status
        ));
        self.emit(|| TransactionPhase::RolledBack {
            status,
            outcomes: outcomes.clone(),
        });

        record.advance(status);
        self.record_status(record).await;
        CouchError::Rollback {
            status,
            cause: Box::new(cause),
            outcomes,
            compensation_error,
        }
    }

    /// Persists the record's status. Failures are logged, not returned:
    /// the outcome of the data writes is already decided.
    async fn record_status(&self, record: &mut TransactionRecord) {
        let status = record.status;
        let persisted = match record.to_document() {
            Ok(doc) => match self
                .retry
                .execute(|| self.transport.put_document(&doc))
                .await
            {
                Ok(outcome) if outcome.is_ok() => {
                    record.rev = outcome.rev;
                    true
                }
                Ok(outcome) => {
                    self.logger.error(format_args!(
                        "Failed to update transaction status to {}: {:?}",
                        status, outcome.error
                    ));
                    false
                }
                Err(err) => {
                    self.logger.error(format_args!(
                        "Failed to update transaction status to {}: {}",
                        status, err
                    ));
                    false
                }
            },
            Err(err) => {
                self.logger.error(format_args!(
                    "Could not serialize transaction record: {}",
                    err
                ));
                false
            }
        };
        self.emit(|| TransactionPhase::StatusRecorded { status, persisted });
    }
}

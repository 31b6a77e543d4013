use std::sync::Arc;

use crate::bulk::BulkDictionaryResolver;
use crate::document::{Document, WriteOutcome};
use crate::errors::{CouchError, Result};
use crate::logger::Logger;
use crate::transport::CouchTransport;

/// Submits document mutations in batches.
pub struct BulkWriter<T: CouchTransport> {
    transport: Arc<T>,
    logger: Logger,
}

impl<T: CouchTransport> BulkWriter<T> {
    pub fn new(transport: Arc<T>, logger: Logger) -> Self {
        Self { transport, logger }
    }

    /// Writes `docs` in one round trip.
    ///
    /// # Returns
    ///
    /// One outcome per document, in the order submitted. An empty `docs`
    /// is a successful no-op and does not touch the network.
    ///
    /// # Errors
    ///
    /// Transport failures are returned as they are: `Transient` ones for an
    /// outer retry executor to handle, fatal ones without any partial
    /// result.
    pub async fn write(&self, docs: &[Document]) -> Result<Vec<WriteOutcome>> {
        if docs.is_empty() {
            self.logger.debug(format_args!("Bulk write called with no documents, nothing to do"));
            return Ok(Vec::new());
        }
        self.logger.info(format_args!("Starting bulk save of {} documents", docs.len()));
        let outcomes = self.transport.write_bulk(docs).await?;
        if outcomes.len() != docs.len() {
            self.logger.warn(format_args!(
                "Bulk save returned {} outcomes for {} documents",
                outcomes.len(),
                docs.len()
            ));
        }
        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        if failed > 0 {
            self.logger.warn(format_args!(
                "Bulk save finished with {} of {} documents failed",
                failed,
                docs.len()
            ));
        }
        Ok(outcomes)
    }

    /// Like [`write`](Self::write), but an empty `docs` is a caller error.
    pub async fn write_nonempty(&self, docs: &[Document]) -> Result<Vec<WriteOutcome>> {
        if docs.is_empty() {
            self.logger.warn(format_args!("bulk save called with empty docs array"));
            return Err(CouchError::NoDocs);
        }
        self.write(docs).await
    }

    /// Deletes every existing document among `ids` in one batch.
    ///
    /// Ids that are missing, already deleted, or hold a malformed document
    /// are skipped. Returns an empty list when nothing was left to delete.
    pub async fn remove(
        &self,
        resolver: &BulkDictionaryResolver<T>,
        ids: &[String],
    ) -> Result<Vec<WriteOutcome>> {
        self.logger.info(format_args!("Starting bulk remove for {} documents", ids.len()));
        let snapshot = resolver.resolve(ids).await?;
        let tombstones: Vec<Document> = ids
            .iter()
            .filter_map(|id| snapshot.found.get(id))
            .filter_map(|doc| match &doc.rev {
                Some(rev) => Some(doc.clone().into_tombstone(rev.clone())),
                None => {
                    self.logger.warn(format_args!("Document {} has no revision, skipping", doc.id));
                    None
                }
            })
            .collect();
        self.write(&tombstones).await
    }
}

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::bulk::Snapshot;
use crate::errors::Result;
use crate::logger::Logger;
use crate::row::{Row, ValidatedRow, ViewQueryResponse};
use crate::transport::CouchTransport;

/// Fetches many documents in one round trip.
pub struct BulkDictionaryResolver<T: CouchTransport> {
    transport: Arc<T>,
    logger: Logger,
}

impl<T: CouchTransport> BulkDictionaryResolver<T> {
    pub fn new(transport: Arc<T>, logger: Logger) -> Self {
        Self { transport, logger }
    }

    /// Reads `ids` with their documents and returns the response unchanged.
    pub async fn bulk_get_raw(&self, ids: &[String]) -> Result<ViewQueryResponse> {
        if ids.is_empty() {
            return Ok(ViewQueryResponse::default());
        }
        self.logger.info(format_args!("Getting {} documents in bulk", ids.len()));
        self.transport.bulk_get(ids, true).await
    }

    /// Reads `ids` and deserializes each document into `D`.
    ///
    /// A document that does not fit `D` does not fail the call; its row is
    /// returned without a doc and with `error` describing the mismatch.
    pub async fn bulk_get_validated<D: DeserializeOwned>(
        &self,
        ids: &[String],
    ) -> Result<Vec<ValidatedRow<D>>> {
        let response = self.bulk_get_raw(ids).await?;
        let rows = response
            .rows
            .into_iter()
            .map(|row| {
                let (doc, error) = match row.doc_as::<D>() {
                    Some(Ok(doc)) => (Some(doc), row.error.clone()),
                    Some(Err(e)) => {
                        self.logger.warn(format_args!(
                            "Invalid document structure for row {:?}: {}",
                            row.id, e
                        ));
                        (None, Some(format!("invalid_doc: {}", e)))
                    }
                    None => (None, row.error.clone()),
                };
                ValidatedRow {
                    id: row.id,
                    key: row.key,
                    value: row.value,
                    doc,
                    error,
                }
            })
            .collect();
        Ok(rows)
    }

    /// Reads `ids` and partitions the rows into a [`Snapshot`].
    ///
    /// Rows with an error, without a document, or with a document that
    /// fails validation go to `not_found` under their key (or id). All
    /// other rows go to `found` under the document's id.
    /// An empty `ids` returns an empty snapshot without a round trip.
    pub async fn resolve(&self, ids: &[String]) -> Result<Snapshot> {
        let response = self.bulk_get_raw(ids).await?;
        let snapshot = self.partition(response.rows);
        self.logger.debug(format_args!(
            "Resolved {} found and {} missing documents",
            snapshot.found.len(),
            snapshot.not_found.len()
        ));
        Ok(snapshot)
    }

    fn partition(&self, rows: Vec<Row>) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for row in rows {
            let parsed = if row.has_doc() { row.document() } else { None };
            match parsed {
                // Validated documents always carry a non-empty id.
                Some(Ok(doc)) => {
                    snapshot.found.insert(doc.id.clone(), doc);
                }
                other => {
                    if let Some(Err(e)) = other {
                        self.logger.warn(format_args!(
                            "Treating row {:?} as not found, document is invalid: {}",
                            row.id, e
                        ));
                    }
                    match row.key_string().or_else(|| row.id.clone()) {
                        Some(key) => {
                            snapshot.not_found.insert(key, row);
                        }
                        None => self
                            .logger
                            .warn(format_args!("Dropping row without key or id: {:?}", row)),
                    }
                }
            }
        }
        snapshot
    }
}

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, WriteOutcome};
use crate::errors::Result;
use crate::row::ViewQueryResponse;

/// The raw body of a streamed query response, chunk by chunk.
pub type RowByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Options of a view query.
///
/// `key`, `startkey` and `endkey` are JSON values and are encoded as JSON on
/// the wire. `keys` is sent in the query string when it fits, otherwise in
/// the request body; callers do not need to care which.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewQueryOptions {
    pub key: Option<Value>,
    pub startkey: Option<Value>,
    pub endkey: Option<Value>,
    pub keys: Option<Vec<Value>>,
    pub reduce: Option<bool>,
    pub group: Option<bool>,
    pub group_level: Option<u32>,
    pub stale: Option<String>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub descending: Option<bool>,
    /// Include the full document body in each row.
    pub include_docs: Option<bool>,
}

impl ViewQueryOptions {
    pub fn include_docs(mut self) -> Self {
        self.include_docs = Some(true);
        self
    }

    pub fn with_keys(mut self, keys: Vec<Value>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// The request/response plumbing the core components are built on.
///
/// Implementations map each call to one round trip against the store and
/// report failures as [`CouchError`](crate::CouchError) values: network
/// problems and retryable status codes as `Transient`, anything else the
/// store rejects outright as a fatal variant. Document-level failures
/// (conflicts, missing documents) are not errors at this level; they are
/// carried inside the returned outcomes and rows.
///
/// Implementations must be `Send` and `Sync`.
pub trait CouchTransport: Send + Sync {
    /// Creates or updates a single document.
    ///
    /// # Returns
    ///
    /// The store's outcome for the document. A rejected write (e.g. a
    /// revision conflict) is an outcome with `error` set, not an `Err`.
    fn put_document(&self, doc: &Document) -> impl Future<Output = Result<WriteOutcome>> + Send;

    /// Reads the given ids in one round trip.
    ///
    /// # Returns
    ///
    /// One row per requested id; missing documents appear as rows with
    /// `error: "not_found"`, deleted ones with a `null` doc.
    fn bulk_get(
        &self,
        ids: &[String],
        include_docs: bool,
    ) -> impl Future<Output = Result<ViewQueryResponse>> + Send;

    /// Submits all documents in one batch.
    ///
    /// # Returns
    ///
    /// One outcome per submitted document, in submission order.
    fn write_bulk(&self, docs: &[Document]) -> impl Future<Output = Result<Vec<WriteOutcome>>> + Send;

    /// Starts a view query and hands back the response body as a stream.
    ///
    /// `view` is a path relative to the database, such as `_all_docs` or
    /// `_design/app/_view/by_type`.
    fn open_query_stream(
        &self,
        view: &str,
        options: &ViewQueryOptions,
    ) -> impl Future<Output = Result<RowByteStream>> + Send;
}

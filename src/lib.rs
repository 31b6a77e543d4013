//! Compensating multi-document transactions, bulk operations and streaming
//! view queries for CouchDB.
//!
//! The store only guarantees atomicity per document. [`Couch::bulk_save_transaction`]
//! writes a set of documents all-or-nothing by recording the transaction,
//! checking revisions up front, and undoing partial writes with compensating
//! writes. [`Couch::query_stream`] delivers the rows of a view one by one
//! while the response is still arriving.

pub mod bulk;
pub mod config;
pub mod conflict;
pub mod couch;
pub mod document;
pub mod errors;
#[cfg(feature = "http")]
pub mod http;
pub mod logger;
pub mod retry;
pub mod row;
pub mod stream;
pub mod transaction;
pub mod transport;

// Re-export key types and structs for easier access
pub use bulk::{BulkDictionaryResolver, BulkWriter, Snapshot};
pub use config::{CouchConfig, RebindOptions};
pub use couch::Couch;
pub use document::{Document, WriteOutcome};
pub use errors::{CouchError, Result};
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use logger::{LogSink, Logger, PartialLogger};
pub use retry::{RetryExecutor, RetryPolicy, with_retry};
pub use row::{Row, ValidatedRow, ViewQueryResponse};
pub use stream::{RowStreamProcessor, Settlement};
pub use transaction::{
    PhaseHook, TransactionCoordinator, TransactionPhase, TransactionRecord, TransactionStatus,
};
pub use transport::{CouchTransport, RowByteStream, ViewQueryOptions};

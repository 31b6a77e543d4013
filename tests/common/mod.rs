//! Common utilities for sofabed integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::stream;
use parking_lot::Mutex;
use serde_json::{Value, json};
use sofabed::{
    Couch, CouchConfig, CouchError, CouchTransport, Document, Logger, Result, Row,
    RowByteStream, ViewQueryOptions, ViewQueryResponse, WriteOutcome,
};

// --- MockCouch ---

/// The transport calls a [`MockCouch`] counts and can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Put,
    BulkGet,
    WriteBulk,
    Query,
}

#[derive(Debug, Clone)]
struct Stored {
    generation: u64,
    rev: String,
    doc: Document,
}

#[derive(Default)]
struct State {
    docs: HashMap<String, Stored>,
    rev_counter: u64,
    calls: HashMap<Op, usize>,
    /// Upcoming transient failures per operation.
    transient: HashMap<Op, u32>,
    /// Ids whose writes are rejected by `write_bulk`.
    fail_ids: HashSet<String>,
    /// Puts beyond this many are rejected.
    accepted_puts: Option<usize>,
    /// `write_bulk` calls (1-based) that fail with a fatal error.
    failing_write_calls: HashSet<usize>,
    /// `write_bulk` calls that apply their documents and then lose the response.
    lost_write_responses: HashSet<usize>,
    /// `bulk_get` calls (1-based) that fail with a fatal error.
    failing_read_calls: HashSet<usize>,
    query_body: Option<Vec<u8>>,
    chunk_size: usize,
    /// Number of chunks delivered before the stream breaks.
    break_stream_after: Option<usize>,
}

/// An in-memory database implementing `CouchTransport`.
///
/// Revisions follow the store's `N-hash` form and are checked on every
/// write: updating a document requires its current revision, creating one
/// requires no revision, and deletions leave tombstones.
pub struct MockCouch {
    state: Mutex<State>,
}

impl Default for MockCouch {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCouch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                chunk_size: 7,
                ..Default::default()
            }),
        }
    }

    /// Stores `doc` directly, ignoring revisions. Returns the new revision.
    pub fn insert(&self, doc: Document) -> String {
        let mut state = self.state.lock();
        let generation = state.docs.get(&doc.id).map_or(0, |s| s.generation) + 1;
        Self::store(&mut state, doc, generation)
    }

    fn store(state: &mut State, mut doc: Document, generation: u64) -> String {
        state.rev_counter += 1;
        let rev = format!("{}-{:08x}", generation, state.rev_counter * 2_654_435_761 % 0xffff_ffff);
        doc.rev = Some(rev.clone());
        state.docs.insert(
            doc.id.clone(),
            Stored {
                generation,
                rev: rev.clone(),
                doc,
            },
        );
        rev
    }

    /// The live document stored under `id`.
    pub fn doc(&self, id: &str) -> Option<Document> {
        let state = self.state.lock();
        state
            .docs
            .get(id)
            .filter(|s| !s.doc.deleted)
            .map(|s| s.doc.clone())
    }

    pub fn rev(&self, id: &str) -> Option<String> {
        self.state.lock().docs.get(id).map(|s| s.rev.clone())
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.state
            .lock()
            .docs
            .get(id)
            .is_some_and(|s| s.doc.deleted)
    }

    /// Ids of all live documents, sorted.
    pub fn live_ids(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut ids: Vec<String> = state
            .docs
            .values()
            .filter(|s| !s.doc.deleted)
            .map(|s| s.doc.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    /// The next `times` calls of `op` fail with a 503.
    pub fn fail_next(&self, op: Op, times: u32) {
        self.state.lock().transient.insert(op, times);
    }

    /// Writes of `id` through `write_bulk` are rejected as forbidden.
    pub fn fail_id(&self, id: &str) {
        self.state.lock().fail_ids.insert(id.to_string());
    }

    /// Only the first `count` single-document writes succeed.
    pub fn accept_puts(&self, count: usize) {
        self.state.lock().accepted_puts = Some(count);
    }

    /// The `call`-th `write_bulk` (counting from 1) fails with a 400.
    pub fn fail_write_call(&self, call: usize) {
        self.state.lock().failing_write_calls.insert(call);
    }

    /// The `call`-th `write_bulk` applies its documents, then reports that no
    /// response arrived.
    pub fn lose_write_response(&self, call: usize) {
        self.state.lock().lost_write_responses.insert(call);
    }

    /// The `call`-th `bulk_get` (counting from 1) fails with a 400.
    pub fn fail_read_call(&self, call: usize) {
        self.state.lock().failing_read_calls.insert(call);
    }

    /// Serves `body` for every query, split into `chunk_size` byte chunks.
    pub fn serve_query(&self, body: impl Into<Vec<u8>>, chunk_size: usize) {
        let mut state = self.state.lock();
        state.query_body = Some(body.into());
        state.chunk_size = chunk_size.max(1);
    }

    /// Breaks query streams with a network error after `chunks` chunks.
    pub fn break_stream_after(&self, chunks: usize) {
        self.state.lock().break_stream_after = Some(chunks);
    }

    fn begin(&self, op: Op) -> Result<()> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        match state.transient.get_mut(&op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(CouchError::retryable_status("service unavailable", 503))
            }
            _ => Ok(()),
        }
    }

    fn apply(state: &mut State, doc: &Document) -> WriteOutcome {
        let current = state.docs.get(&doc.id).cloned();
        let generation = match (&current, doc.rev.as_deref()) {
            (Some(stored), Some(rev)) if stored.rev == rev => stored.generation,
            (Some(stored), None) if stored.doc.deleted => stored.generation,
            (None, None) => 0,
            _ => {
                return WriteOutcome::failure(&doc.id, "conflict", "Document update conflict.");
            }
        };
        let rev = Self::store(state, doc.clone(), generation + 1);
        WriteOutcome::success(&doc.id, rev)
    }

    fn row(state: &State, id: &str, include_docs: bool) -> Row {
        match state.docs.get(id) {
            None => Row {
                key: Some(json!(id)),
                error: Some("not_found".to_string()),
                ..Default::default()
            },
            Some(stored) if stored.doc.deleted => Row {
                id: Some(id.to_string()),
                key: Some(json!(id)),
                value: Some(json!({ "rev": stored.rev, "deleted": true })),
                doc: include_docs.then_some(Value::Null),
                error: None,
            },
            Some(stored) => Row {
                id: Some(id.to_string()),
                key: Some(json!(id)),
                value: Some(json!({ "rev": stored.rev })),
                doc: include_docs.then(|| json!(stored.doc)),
                error: None,
            },
        }
    }

    fn all_docs_body(state: &State, include_docs: bool) -> Vec<u8> {
        let mut ids: Vec<&String> = state
            .docs
            .iter()
            .filter(|(_, s)| !s.doc.deleted)
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        let rows: Vec<Row> = ids
            .iter()
            .map(|id| Self::row(state, id, include_docs))
            .collect();
        json!({ "total_rows": rows.len(), "offset": 0, "rows": rows })
            .to_string()
            .into_bytes()
    }
}

impl CouchTransport for MockCouch {
    async fn put_document(&self, doc: &Document) -> Result<WriteOutcome> {
        tokio::task::yield_now().await;
        self.begin(Op::Put)?;
        let mut state = self.state.lock();
        let calls = state.calls[&Op::Put];
        if state.accepted_puts.is_some_and(|accepted| calls > accepted) {
            return Ok(WriteOutcome::failure(&doc.id, "forbidden", "writes disabled"));
        }
        Ok(Self::apply(&mut state, doc))
    }

    async fn bulk_get(&self, ids: &[String], include_docs: bool) -> Result<ViewQueryResponse> {
        tokio::task::yield_now().await;
        self.begin(Op::BulkGet)?;
        let state = self.state.lock();
        if state.failing_read_calls.contains(&state.calls[&Op::BulkGet]) {
            return Err(CouchError::UnexpectedStatus {
                status: 400,
                reason: "bad request".to_string(),
            });
        }
        Ok(ViewQueryResponse {
            total_rows: Some(state.docs.len() as u64),
            offset: Some(0),
            rows: ids
                .iter()
                .map(|id| Self::row(&state, id, include_docs))
                .collect(),
            ..Default::default()
        })
    }

    async fn write_bulk(&self, docs: &[Document]) -> Result<Vec<WriteOutcome>> {
        tokio::task::yield_now().await;
        self.begin(Op::WriteBulk)?;
        let mut state = self.state.lock();
        let call = state.calls[&Op::WriteBulk];
        if state.failing_write_calls.contains(&call) {
            return Err(CouchError::UnexpectedStatus {
                status: 400,
                reason: "bad request".to_string(),
            });
        }
        let outcomes: Vec<WriteOutcome> = docs
            .iter()
            .map(|doc| {
                if state.fail_ids.contains(&doc.id) {
                    WriteOutcome::failure(&doc.id, "forbidden", "rejected by validation")
                } else {
                    Self::apply(&mut state, doc)
                }
            })
            .collect();
        if state.lost_write_responses.contains(&call) {
            return Err(CouchError::no_response());
        }
        Ok(outcomes)
    }

    async fn open_query_stream(&self, _view: &str, options: &ViewQueryOptions) -> Result<RowByteStream> {
        tokio::task::yield_now().await;
        self.begin(Op::Query)?;
        let state = self.state.lock();
        let body = match &state.query_body {
            Some(body) => body.clone(),
            None => Self::all_docs_body(&state, options.include_docs.unwrap_or(false)),
        };
        let mut items: Vec<Result<Vec<u8>>> = body
            .chunks(state.chunk_size)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        if let Some(after) = state.break_stream_after {
            items.truncate(after);
            items.push(Err(CouchError::no_response()));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

// --- Helper Functions ---

pub const DB_URL: &str = "http://localhost:5984/sofabed_test";

/// A configuration with short delays so retries stay fast.
pub fn fast_config() -> CouchConfig {
    let mut config = CouchConfig::new(DB_URL);
    config.initial_delay_ms = 10;
    config.max_delay_ms = 100;
    config
}

/// A `Couch` handle over a fresh mock.
pub fn setup_couch() -> (Arc<MockCouch>, Couch<MockCouch>) {
    setup_couch_with(fast_config())
}

pub fn setup_couch_with(config: CouchConfig) -> (Arc<MockCouch>, Couch<MockCouch>) {
    let mock = Arc::new(MockCouch::new());
    let couch = Couch::from_shared(Arc::clone(&mock), config, Logger::noop()).unwrap();
    (mock, couch)
}

/// A document with a single `data` field.
pub fn data_doc(id: &str, data: &str) -> Document {
    Document::new(id).with_field("data", data)
}

/// Collects everything logged through the returned logger.
pub fn capturing_logger() -> (Logger, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let logger = Logger::from_fn(move |level, message| {
        sink.lock().push(format!("{level}: {message}"));
    });
    (logger, lines)
}

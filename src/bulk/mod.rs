//! Batched reads and writes.

use ahash::AHashMap as HashMap;

use crate::document::Document;
use crate::row::Row;

/// This module contains the bulk read that partitions rows into found and missing documents.
pub mod resolver;
/// This module contains the batched writer and the bulk delete built on it.
pub mod writer;

pub use resolver::BulkDictionaryResolver;
pub use writer::BulkWriter;

/// Documents as they were at the start of a transaction attempt.
///
/// `found` is keyed by document id, `not_found` by the requested key.
/// Built once and never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub found: HashMap<String, Document>,
    pub not_found: HashMap<String, Row>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.found.is_empty() && self.not_found.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.found.contains_key(id) || self.not_found.contains_key(id)
    }

    /// The revision stored under `id`, including the revision of a
    /// tombstone reported in a row's `value`.
    pub fn rev_of(&self, id: &str) -> Option<String> {
        if let Some(doc) = self.found.get(id) {
            return doc.rev.clone();
        }
        self.not_found
            .get(id)
            .and_then(|row| row.value.as_ref())
            .and_then(|value| value.get("rev"))
            .and_then(|rev| rev.as_str())
            .map(str::to_string)
    }
}

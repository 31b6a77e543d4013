use ahash::AHashSet as HashSet;

use crate::bulk::Snapshot;
use crate::document::Document;

/// Represents the type of conflict detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    /// The supplied revision differs from the stored one.
    StaleRevision,
    /// A revision was supplied for a document that does not exist.
    MissingDocument,
}

/// A document whose supplied revision does not match the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub id: String,
    pub kind: ConflictType,
    pub supplied: Option<String>,
    pub stored: Option<String>,
}

/// Compares the revisions supplied with `docs` against `snapshot`.
///
/// A document conflicts when its id was found with a different revision
/// (exact string comparison), or when its id was not found but it carries a
/// revision anyway. Documents absent from both maps are not checked.
///
/// # Returns
///
/// The conflicts in submission order; empty when the write may proceed.
pub fn detect_conflicts(docs: &[Document], snapshot: &Snapshot) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for doc in docs {
        if let Some(found) = snapshot.found.get(&doc.id) {
            if found.rev != doc.rev {
                conflicts.push(Conflict {
                    id: doc.id.clone(),
                    kind: ConflictType::StaleRevision,
                    supplied: doc.rev.clone(),
                    stored: found.rev.clone(),
                });
            }
        } else if snapshot.not_found.contains_key(&doc.id) && doc.rev.is_some() {
            conflicts.push(Conflict {
                id: doc.id.clone(),
                kind: ConflictType::MissingDocument,
                supplied: doc.rev.clone(),
                stored: None,
            });
        }
    }
    conflicts
}

/// Returns every id that occurs more than once in `docs`, once each.
pub fn duplicate_ids(docs: &[Document]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut duplicates = Vec::new();
    for doc in docs {
        if !seen.insert(doc.id.as_str()) && reported.insert(doc.id.as_str()) {
            duplicates.push(doc.id.clone());
        }
    }
    duplicates
}

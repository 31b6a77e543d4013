use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{CouchError, Result};

/// A document as stored in the database.
///
/// `rev` is the store's opaque revision token. It is assigned on every
/// successful write and must be supplied on the next write to the same id;
/// `None` means "create new". All application fields live in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Document {
    /// Creates a document with no revision, i.e. one that does not exist yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            deleted: false,
            fields: Map::new(),
        }
    }

    /// Sets the revision this write is based on.
    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    /// Adds or replaces an application field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Turns this document into a tombstone based on `rev`.
    pub fn into_tombstone(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self.deleted = true;
        self
    }

    /// Checks the structural requirements the store places on a document.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(CouchError::InvalidDocument {
                reason: "document id must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Parses and validates a document body received from the store.
    pub fn from_value(value: Value) -> Result<Self> {
        let doc: Document = serde_json::from_value(value)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Deserializes the whole document, system fields included, into `D`.
    pub fn to_typed<D: serde::de::DeserializeOwned>(&self) -> Result<D> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }
}

/// The store's answer for a single submitted document.
///
/// One outcome is produced per submitted document, in submission order.
/// A conflict is reported as `error: Some("conflict")`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// One-word reason, e.g. `conflict`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WriteOutcome {
    pub fn success(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            ok: Some(true),
            id: Some(id.into()),
            rev: Some(rev.into()),
            error: None,
            reason: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ok: None,
            id: Some(id.into()),
            rev: None,
            error: Some(error.into()),
            reason: Some(reason.into()),
        }
    }

    /// An outcome is successful when the store reported no error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.ok != Some(false)
    }

    pub fn is_conflict(&self) -> bool {
        self.error.as_deref() == Some("conflict")
    }
}

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::errors::Result;

/// A single row of a view or `_all_docs` response.
///
/// `doc` is kept as raw JSON so that a malformed body does not reject the
/// whole response; callers validate it with [`Row::document`] or
/// [`Row::doc_as`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    /// Usually `not_found`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Row {
    /// Returns `true` when the row carries a usable document body.
    pub fn has_doc(&self) -> bool {
        self.error.is_none() && matches!(self.doc, Some(ref doc) if !doc.is_null())
    }

    /// The row key as a map key: strings verbatim, anything else as JSON.
    pub fn key_string(&self) -> Option<String> {
        match &self.key {
            Some(Value::String(key)) => Some(key.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }

    /// Parses the row's document, if present.
    pub fn document(&self) -> Option<Result<Document>> {
        match &self.doc {
            Some(doc) if !doc.is_null() => Some(Document::from_value(doc.clone())),
            _ => None,
        }
    }

    /// Deserializes the row's document into `D`, if present.
    pub fn doc_as<D: DeserializeOwned>(&self) -> Option<Result<D>> {
        match &self.doc {
            Some(doc) if !doc.is_null() => {
                Some(serde_json::from_value(doc.clone()).map_err(Into::into))
            }
            _ => None,
        }
    }
}

/// A row whose document has been validated against `D`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRow<D> {
    pub id: Option<String>,
    pub key: Option<Value>,
    pub value: Option<Value>,
    pub doc: Option<D>,
    pub error: Option<String>,
}

/// The envelope of a view or `_all_docs` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewQueryResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_seq: Option<Value>,
}

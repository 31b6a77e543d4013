use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::errors::Result;

/// Prefix of the ids under which transaction records are stored.
pub const TRANSACTION_ID_PREFIX: &str = "txn:";

/// Progress of a transaction as recorded in the store.
///
/// Moves only forward: `Pending` to exactly one of the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    RolledBack,
    /// Compensation itself failed; the store may hold partial writes.
    RollbackFailed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::RolledBack => "rolled_back",
            TransactionStatus::RollbackFailed => "rollback_failed",
        };
        f.write_str(name)
    }
}

/// The document that makes a transaction observable to other readers.
///
/// Stored under `txn:<transaction id>` and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: TransactionStatus,
    pub changes: Vec<Document>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(transaction_id: &str, changes: Vec<Document>) -> Self {
        Self {
            id: format!("{TRANSACTION_ID_PREFIX}{transaction_id}"),
            rev: None,
            kind: "transaction".to_string(),
            status: TransactionStatus::Pending,
            changes,
            timestamp: Utc::now(),
        }
    }

    /// Moves the record to a terminal status.
    ///
    /// A terminal record keeps its status; the transition is ignored and
    /// `false` returned.
    pub fn advance(&mut self, status: TransactionStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    pub fn to_document(&self) -> Result<Document> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }
}

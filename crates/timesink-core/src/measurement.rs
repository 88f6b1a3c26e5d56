//! Measurement records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One uniquely identified series of a data type.
///
/// `end = None` marks the record active; at most one active record exists per
/// `(data_type, identifier)`. Closing and rewriting records is done by
/// external tooling, never by the ingestion worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub identifier: String,
    pub start: i64,
    pub end: Option<i64>,
    pub last_updated: i64,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl Measurement {
    /// A fresh active record first sighted at `start`.
    pub fn new_active(identifier: &str, start: i64, meta: Map<String, Value>) -> Self {
        Self {
            identifier: identifier.to_string(),
            start,
            end: None,
            last_updated: start,
            meta,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end.is_none()
    }
}

//! Worker error types.
//!
//! Backend calls return values, and the worker classifies them at the batch
//! boundary: a transient failure rejects the batch back onto the queue for
//! redelivery, while malformed input is handled at the item level (logged and
//! skipped) and never fails a batch.

use thiserror::Error;
use timesink_backend::BackendError;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The batch failed for a reason redelivery can fix: store or lock
    /// trouble, a failed registry refresh, a missing metadata document.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Invalid configuration at startup; fatal.
    #[error("configuration error: {0}")]
    Config(String),
}

impl WorkerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkerError::Transient(_))
    }
}

impl From<BackendError> for WorkerError {
    fn from(error: BackendError) -> Self {
        WorkerError::Transient(error.to_string())
    }
}

//! Error types for backend operations.
//!
//! Every backend failure is reported as a value; the worker classifies them
//! at the batch boundary (backend failures are transient there, so the broker
//! redelivers the batch).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Document store query or write failed.
    #[error("store error: {0}")]
    Store(String),

    /// Key-value cache operation failed.
    #[error("cache error: {0}")]
    Cache(String),

    /// Lock not acquired within the configured retry budget.
    #[error("lock '{key}' not acquired after {attempts} attempts")]
    LockTimeout { key: String, attempts: u32 },

    /// Queue transport failure (recv, ack, reject, or channel setup).
    #[error("queue error: {0}")]
    Queue(String),

    /// Ack or reject referenced a delivery tag the channel does not know.
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    /// Value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! Timesink Ingestion Worker
//!
//! One of N parallel worker processes forming the write path of the
//! time-series store. Each worker consumes batched measurement updates from a
//! durable queue and commits them idempotently:
//!
//! - **Registry** caches data-type descriptors, refreshable from the store.
//! - **Decoder** classifies and validates batch items into typed messages.
//! - **Coalescer** groups messages by target bucket.
//! - **Measurement upserter** ensures an active measurement record exists per
//!   series, gated by the cache.
//! - **Value-type reconciler** keeps each type's metadata document advertising
//!   every value type seen.
//! - **Data/event bucket writers** mutate buckets under distributed locks,
//!   reconciling overlapping buckets when a sampling interval changes.
//! - **Consumer loop** acks applied batches, requeues transient failures,
//!   drops malformed payloads, and reconnects on transport errors.
//!
//! Inter-worker coordination rides entirely on the lock service and the
//! store's atomic updates; within a process there is a single consumer task.

pub mod coalesce;
pub mod config;
pub mod data_writer;
pub mod decoder;
pub mod error;
pub mod event_writer;
pub mod measurements;
pub mod metadata;
pub mod registry;
pub mod worker;

pub use coalesce::{CoalescedBatch, MeasurementSeed};
pub use config::{MemcacheConfig, MongoConfig, RabbitConfig, RedisConfig, WorkerConfig};
pub use data_writer::DataDocumentWriter;
pub use decoder::{DecodedBatch, Decoder};
pub use error::{Result, WorkerError};
pub use event_writer::EventDocumentWriter;
pub use measurements::MeasurementUpserter;
pub use metadata::ValueTypeReconciler;
pub use registry::DataTypeRegistry;
pub use worker::{BatchOutcome, Worker, WorkerStats};

use timesink_backend::LockService;

/// Release a lock, logging instead of failing: the lock's TTL is the
/// backstop, so a failed release never aborts a batch.
pub(crate) async fn release_quietly(locks: &dyn LockService, key: &str) {
    if let Err(error) = locks.release(key).await {
        tracing::warn!(lock = %key, error = %error, "failed to release lock");
    }
}

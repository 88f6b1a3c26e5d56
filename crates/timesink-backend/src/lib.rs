//! Timesink Backend Seams
//!
//! The ingestion worker talks to four external collaborators: a
//! document-oriented store, a key-value cache, a distributed lock service,
//! and a message queue. Each is a trait here, implemented in memory for the
//! embedded backend and the test suite; wire clients plug in behind the same
//! traits.
//!
//! All implementations are `Send + Sync` and shared via `Arc<dyn …>`.

pub mod broker;
pub mod cache;
pub mod error;
pub mod lock;
pub mod store;

pub use broker::{Delivery, MemoryQueue, MessageQueue, QueueOptions};
pub use cache::{CacheStats, KeyValueCache, MemoryCache};
pub use error::{BackendError, Result};
pub use lock::{LockOptions, LockService, MemoryLockService};
pub use store::{DocumentStore, MemoryStore};

//! Distributed lock service trait and in-memory implementation.
//!
//! Bucket mutations are serialized across workers by a lock keyed on the
//! bucket's cache key. A lock carries a TTL so a crashed holder cannot wedge
//! the pipeline; release is explicit and a failed release is the caller's
//! problem to log, not retry.

use crate::error::{BackendError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Retry budget for [`LockService::acquire`].
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// TTL stamped on the lock when acquired.
    pub ttl: Duration,
    /// Attempts before giving up.
    pub retries: u32,
    /// Sleep between attempts.
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            retries: 10,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[async_trait]
pub trait LockService: Send + Sync {
    /// One acquisition attempt; `true` when the lock was granted.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Release a held lock. Releasing an absent (expired) lock is not an
    /// error.
    async fn release(&self, key: &str) -> Result<()>;

    /// Acquire with retries; [`BackendError::LockTimeout`] on exhaustion,
    /// which callers treat as batch-transient.
    async fn acquire(&self, key: &str, options: &LockOptions) -> Result<()> {
        for attempt in 0..options.retries {
            if self.try_acquire(key, options.ttl).await? {
                return Ok(());
            }
            if attempt + 1 < options.retries {
                tokio::time::sleep(options.retry_delay).await;
            }
        }
        Err(BackendError::LockTimeout {
            key: key.to_string(),
            attempts: options.retries,
        })
    }
}

/// In-memory lock table with TTL expiry.
#[derive(Default)]
pub struct MemoryLockService {
    held: Mutex<HashMap<String, Instant>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held (and unexpired).
    pub async fn is_held(&self, key: &str) -> bool {
        let held = self.held.lock().await;
        held.get(key).is_some_and(|expiry| *expiry > Instant::now())
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        match held.get(key) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                held.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut held = self.held.lock().await;
        held.remove(key);
        Ok(())
    }
}

//! Event-bucket writer.
//!
//! Events merge into fixed-width buckets under the bucket's lock. Identity
//! within a bucket is `(start, identifier)` with last-writer-wins, so
//! redelivered batches converge to the same event list. The cache entry is a
//! bare existence sentinel.

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::release_quietly;
use serde_json::Value;
use std::sync::Arc;
use timesink_backend::{DocumentStore, KeyValueCache, LockService};
use timesink_core::{ids, EventDocument};

pub struct EventDocumentWriter {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn KeyValueCache>,
    locks: Arc<dyn LockService>,
    config: Arc<WorkerConfig>,
}

impl EventDocumentWriter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn KeyValueCache>,
        locks: Arc<dyn LockService>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            store,
            cache,
            locks,
            config,
        }
    }

    pub async fn write_all<I>(&self, documents: I) -> Result<()>
    where
        I: IntoIterator<Item = EventDocument>,
    {
        for document in documents {
            self.write(document).await?;
        }
        Ok(())
    }

    pub async fn write(&self, document: EventDocument) -> Result<()> {
        let key = document.cache_key();
        let lock = ids::lock_key(&key);
        self.locks.acquire(&lock, &self.config.lock_options()).await?;
        let result = self.write_locked(document, &key).await;
        release_quietly(&*self.locks, &lock).await;
        result
    }

    async fn write_locked(&self, document: EventDocument, key: &str) -> Result<()> {
        let known = match self.cache.get(key).await {
            Ok(cached) => cached.is_some(),
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "cache read failed, treating as miss");
                false
            }
        };

        let existing = self
            .store
            .get_event_document(
                &document.data_type,
                &document.event_type,
                document.start,
                document.end,
            )
            .await?;

        match existing {
            None => {
                if known {
                    tracing::warn!(key = %key, "cached event bucket missing from store, recreating");
                }
                tracing::debug!(bucket = %key, events = document.events.len(), "created event bucket");
                let data_type = document.data_type.clone();
                self.store.insert_event_document(&data_type, document).await?;
            }
            Some(current) => {
                let merged = EventDocument::merge_events(current.events, document.events);
                tracing::debug!(bucket = %key, events = merged.len(), "merged event bucket");
                self.store
                    .replace_event_document_events(
                        &current.data_type,
                        &current.event_type,
                        current.start,
                        current.end,
                        merged,
                    )
                    .await?;
            }
        }

        if let Err(error) = self
            .cache
            .set(key, Value::from(1), self.config.data_cache_expiration)
            .await
        {
            tracing::warn!(key = %key, error = %error, "failed to cache event bucket");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timesink_backend::{MemoryCache, MemoryLockService, MemoryStore};
    use timesink_core::Event;

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        locks: Arc<MemoryLockService>,
        writer: EventDocumentWriter,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let locks = Arc::new(MemoryLockService::new());
        let writer = EventDocumentWriter::new(
            store.clone(),
            cache.clone(),
            locks.clone(),
            Arc::new(WorkerConfig::default()),
        );
        Fixture {
            store,
            cache,
            locks,
            writer,
        }
    }

    fn event(start: i64, identifier: &str, text: &str) -> Event {
        Event {
            start,
            end: start + 60,
            identifier: identifier.to_string(),
            affected: Value::Null,
            text: text.to_string(),
            event_type: "outage".to_string(),
        }
    }

    fn doc(events: &[Event]) -> EventDocument {
        let mut document = EventDocument::empty("interface", "outage", 0, 86_400);
        document.events = events.to_vec();
        document
    }

    #[tokio::test]
    async fn test_create_new_event_bucket() {
        let fx = fixture();
        let document = doc(&[event(100, "rtr_a", "down")]);
        let key = document.cache_key();
        fx.writer.write(document).await.unwrap();

        let stored = fx.store.event_documents("interface").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].events.len(), 1);

        // Sentinel cached, lock released
        assert_eq!(fx.cache.get(&key).await.unwrap().unwrap(), Value::from(1));
        assert!(!fx.locks.is_held(&ids::lock_key(&key)).await);
    }

    #[tokio::test]
    async fn test_merge_overwrites_on_identity() {
        let fx = fixture();
        fx.writer
            .write(doc(&[event(100, "rtr_a", "down"), event(200, "rtr_b", "flap")]))
            .await
            .unwrap();
        fx.writer
            .write(doc(&[event(100, "rtr_a", "down (updated)")]))
            .await
            .unwrap();

        let stored = fx.store.event_documents("interface").await;
        assert_eq!(stored[0].events.len(), 2);
        let updated = stored[0]
            .events
            .iter()
            .find(|e| e.identifier == "rtr_a")
            .unwrap();
        assert_eq!(updated.text, "down (updated)");
    }

    #[tokio::test]
    async fn test_idempotent_redelivery() {
        let fx = fixture();
        let document = doc(&[event(100, "rtr_a", "down"), event(300, "rtr_b", "up")]);
        fx.writer.write(document.clone()).await.unwrap();
        let after_first = fx.store.event_documents("interface").await;
        fx.writer.write(document).await.unwrap();
        let after_second = fx.store.event_documents("interface").await;
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_distinct_buckets_do_not_interact() {
        let fx = fixture();
        fx.writer
            .write(doc(&[event(100, "rtr_a", "down")]))
            .await
            .unwrap();
        let mut next_day = EventDocument::empty("interface", "outage", 86_400, 172_800);
        next_day.events = vec![event(90_000, "rtr_a", "again")];
        fx.writer.write(next_day).await.unwrap();

        let stored = fx.store.event_documents("interface").await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].events.len(), 1);
        assert_eq!(stored[1].events.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_entry_recreates_bucket() {
        let fx = fixture();
        let document = doc(&[event(100, "rtr_a", "down")]);
        // Cache says the bucket exists but the store disagrees.
        fx.cache
            .set(
                &document.cache_key(),
                Value::from(1),
                std::time::Duration::from_secs(60),
            )
            .await
            .unwrap();

        fx.writer.write(document).await.unwrap();
        assert_eq!(fx.store.event_documents("interface").await.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_contention_fails_transient() {
        let fx = fixture();
        let document = doc(&[event(100, "rtr_a", "down")]);
        assert!(fx
            .locks
            .try_acquire(
                &ids::lock_key(&document.cache_key()),
                std::time::Duration::from_secs(60)
            )
            .await
            .unwrap());

        let mut config = WorkerConfig::default();
        config.lock_retries = 2;
        config.lock_retry_delay = std::time::Duration::from_millis(1);
        let writer = EventDocumentWriter::new(
            fx.store.clone(),
            fx.cache.clone(),
            fx.locks.clone(),
            Arc::new(config),
        );
        let err = writer.write(document).await.unwrap_err();
        assert!(err.is_transient());
    }
}

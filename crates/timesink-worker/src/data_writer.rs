//! Data-bucket writer.
//!
//! Every bucket mutation runs under the bucket's distributed lock. The cache
//! answers "does this bucket already exist" (its value is the bucket's
//! value-type snapshot); on a miss the store decides. An existing bucket is
//! updated in place; a new bucket whose window overlaps older buckets (the
//! measurement's interval changed) goes through overlap reconciliation:
//! every old point is re-bucketed at the new interval, the replacement
//! buckets are created, and the old ones are deleted in one batch.

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::release_quietly;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use timesink_backend::{DocumentStore, KeyValueCache, LockService};
use timesink_core::{bucket_bounds, ids, DataDocument, DataPoint};

/// The cache value of an existing bucket: `{"value_types": {"<vt>": true}}`.
fn value_types_value(value_types: &BTreeSet<String>) -> Value {
    let mut inner = Map::new();
    for value_type in value_types {
        inner.insert(value_type.clone(), Value::Bool(true));
    }
    let mut outer = Map::new();
    outer.insert("value_types".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn value_types_from_value(value: &Value) -> Option<BTreeSet<String>> {
    Some(
        value
            .get("value_types")?
            .as_object()?
            .keys()
            .cloned()
            .collect(),
    )
}

pub struct DataDocumentWriter {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn KeyValueCache>,
    locks: Arc<dyn LockService>,
    config: Arc<WorkerConfig>,
}

impl DataDocumentWriter {
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
        I: IntoIterator<Item = DataDocument>,
    {
        for document in documents {
            self.write(document).await?;
        }
        Ok(())
    }

    /// Write one coalesced bucket under its lock.
    pub async fn write(&self, document: DataDocument) -> Result<()> {
        let key = document.cache_key();
        let lock = ids::lock_key(&key);
        self.locks.acquire(&lock, &self.config.lock_options()).await?;
        let result = self.write_locked(document, &key).await;
        // Overlap locks (taken inside) are released first; the target bucket
        // lock is always the last one out.
        release_quietly(&*self.locks, &lock).await;
        result
    }

    async fn write_locked(&self, document: DataDocument, key: &str) -> Result<()> {
        let cached = match self.cache.get(key).await {
            Ok(cached) => cached,
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "cache read failed, treating as miss");
                None
            }
        };

        let existing_value_types = match cached {
            // A cache hit means the bucket exists; its value is the stored
            // value-type snapshot.
            Some(value) => Some(value_types_from_value(&value).unwrap_or_default()),
            None => self
                .store
                .get_data_document(
                    &document.data_type,
                    &document.identifier,
                    document.start,
                    document.end,
                )
                .await?
                .map(|existing| existing.value_types),
        };

        match existing_value_types {
            Some(old_value_types) => self.update(document, key, old_value_types).await,
            None => self.create(document, key).await,
        }
    }

    /// Merge the batch's points into an existing bucket, declaring any value
    /// types the bucket has not carried before.
    async fn update(
        &self,
        document: DataDocument,
        key: &str,
        old_value_types: BTreeSet<String>,
    ) -> Result<()> {
        let added = document
            .value_types
            .difference(&old_value_types)
            .count();
        self.store
            .merge_data_document(
                &document.data_type,
                &document.id,
                &document.points,
                &document.value_types,
            )
            .await?;

        let mut merged = old_value_types;
        merged.extend(document.value_types.iter().cloned());
        self.fill_cache(key, &merged).await;

        tracing::debug!(
            bucket = %key,
            points = document.points.len(),
            new_value_types = added,
            "updated data bucket"
        );
        Ok(())
    }

    async fn create(&self, document: DataDocument, key: &str) -> Result<()> {
        let overlapping = self
            .store
            .find_overlapping_documents(
                &document.data_type,
                &document.identifier,
                document.start,
                document.end,
            )
            .await?;

        if overlapping.is_empty() {
            let data_type = document.data_type.clone();
            self.fill_cache_after_insert(&data_type, vec![document]).await?;
            tracing::debug!(bucket = %key, "created data bucket");
            return Ok(());
        }

        self.reconcile_overlaps(document, overlapping, key).await
    }

    /// The measurement's interval changed: older buckets overlap the new one.
    ///
    /// Lock every overlapped bucket (the query orders them by `(start, end)`,
    /// so all workers acquire in the same order), re-bucket their points at
    /// the new interval, create the replacements, then drop the old buckets
    /// in one batch.
    async fn reconcile_overlaps(
        &self,
        document: DataDocument,
        overlapping: Vec<DataDocument>,
        key: &str,
    ) -> Result<()> {
        let mut held = Vec::new();
        let mut result = Ok(());
        for old in &overlapping {
            let lock = ids::lock_key(&old.cache_key());
            match self.locks.acquire(&lock, &self.config.lock_options()).await {
                Ok(()) => held.push(lock),
                Err(error) => {
                    result = Err(error.into());
                    break;
                }
            }
        }

        if result.is_ok() {
            result = self.rebucket(&document, &overlapping).await;
            if result.is_ok() {
                tracing::info!(
                    bucket = %key,
                    replaced = overlapping.len(),
                    "reconciled overlapping data buckets"
                );
            }
        }

        for lock in held {
            release_quietly(&*self.locks, &lock).await;
        }
        result
    }

    async fn rebucket(
        &self,
        document: &DataDocument,
        overlapping: &[DataDocument],
    ) -> Result<()> {
        let interval = document.interval;
        // The incoming bucket's own points always win for the timestamps it
        // covers.
        let frozen: HashSet<(i64, String)> = document.point_keys();

        let mut buckets: BTreeMap<(i64, i64), DataDocument> = BTreeMap::new();
        buckets.insert((document.start, document.end), document.clone());

        for old in overlapping {
            for point in &old.points {
                // Absent samples are dropped during migration.
                let Some(value) = point.value else { continue };
                let (start, end) = bucket_bounds(point.time, interval);
                if (start, end) == (document.start, document.end)
                    && frozen.contains(&(point.time, point.value_type.clone()))
                {
                    continue;
                }
                let bucket = buckets.entry((start, end)).or_insert_with(|| {
                    DataDocument::empty(
                        &document.data_type,
                        &document.identifier,
                        interval,
                        start,
                        end,
                    )
                });
                bucket.upsert_point(DataPoint {
                    time: point.time,
                    interval,
                    value_type: point.value_type.clone(),
                    value: Some(value),
                });
            }
        }

        let new_documents: Vec<DataDocument> = buckets.into_values().collect();
        let new_ids: HashSet<String> = new_documents.iter().map(|d| d.id.clone()).collect();
        self.fill_cache_after_insert(&document.data_type, new_documents)
            .await?;

        let old_ids: Vec<String> = overlapping
            .iter()
            .map(|old| old.id.clone())
            .filter(|id| !new_ids.contains(id))
            .collect();
        self.store
            .remove_data_documents(&document.data_type, &old_ids)
            .await?;
        for id in &old_ids {
            if let Err(error) = self.cache.delete(id).await {
                tracing::warn!(key = %id, error = %error, "failed to drop stale bucket cache entry");
            }
        }
        Ok(())
    }

    /// Create buckets, then cache them. The new entries must be cached before
    /// any stale entry is deleted: a reader racing on an old bucket finds a
    /// lock in transit, and a reader on a new bucket is safe because creation
    /// precedes the cache fill.
    async fn fill_cache_after_insert(
        &self,
        data_type: &str,
        documents: Vec<DataDocument>,
    ) -> Result<()> {
        let entries: Vec<(String, Value)> = documents
            .iter()
            .map(|d| (d.cache_key(), value_types_value(&d.value_types)))
            .collect();
        self.store.insert_data_documents(data_type, documents).await?;
        if let Err(error) = self
            .cache
            .set_many(&entries, self.config.data_cache_expiration)
            .await
        {
            tracing::warn!(error = %error, "failed to cache created buckets");
        }
        Ok(())
    }

    async fn fill_cache(&self, key: &str, value_types: &BTreeSet<String>) {
        if let Err(error) = self
            .cache
            .set(
                key,
                value_types_value(value_types),
                self.config.data_cache_expiration,
            )
            .await
        {
            tracing::warn!(key = %key, error = %error, "failed to cache bucket");
        }
    }
}

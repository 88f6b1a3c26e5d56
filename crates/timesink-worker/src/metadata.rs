//! Value-type reconciler.
//!
//! Each data type's metadata document must advertise every value type its
//! buckets carry, or projections over the type break. Per batch and per data
//! type: bulk-check the cache; if anything is missing, take the metadata lock,
//! read the singleton document, declare the unknown value types in one
//! update, and bulk-fill the cache.

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::release_quietly;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use timesink_backend::{DocumentStore, KeyValueCache, LockService};
use timesink_core::{ids, ValueTypeInfo};

pub struct ValueTypeReconciler {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn KeyValueCache>,
    locks: Arc<dyn LockService>,
    config: Arc<WorkerConfig>,
}

impl ValueTypeReconciler {
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

    pub async fn ensure_all(&self, value_types: &BTreeMap<String, BTreeSet<String>>) -> Result<()> {
        for (data_type, seen) in value_types {
            self.ensure(data_type, seen).await?;
        }
        Ok(())
    }

    async fn ensure(&self, data_type: &str, seen: &BTreeSet<String>) -> Result<()> {
        if seen.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = seen
            .iter()
            .map(|value_type| ids::value_type_key(data_type, value_type))
            .collect();
        let cached = match self.cache.get_many(&keys).await {
            Ok(cached) => cached,
            Err(error) => {
                tracing::warn!(data_type = %data_type, error = %error, "cache read failed, treating as miss");
                HashMap::new()
            }
        };
        if cached.len() == keys.len() {
            return Ok(());
        }

        let lock = ids::lock_key(&ids::metadata_key(data_type));
        self.locks.acquire(&lock, &self.config.lock_options()).await?;
        let result = self.ensure_locked(data_type, seen, &keys).await;
        release_quietly(&*self.locks, &lock).await;
        result
    }

    async fn ensure_locked(
        &self,
        data_type: &str,
        seen: &BTreeSet<String>,
        keys: &[String],
    ) -> Result<()> {
        let metadata = self.store.get_metadata(data_type).await?.ok_or_else(|| {
            WorkerError::Transient(format!("no metadata document for '{}'", data_type))
        })?;

        let mut additions = BTreeMap::new();
        for value_type in seen {
            if !metadata.value_types.contains_key(value_type) {
                additions.insert(value_type.clone(), ValueTypeInfo::placeholder(value_type));
            }
        }
        if !additions.is_empty() {
            self.store
                .add_metadata_value_types(data_type, &additions)
                .await?;
            tracing::info!(
                data_type = %data_type,
                added = additions.len(),
                "declared new value types"
            );
        }

        let entries: Vec<(String, Value)> = keys
            .iter()
            .map(|key| (key.clone(), Value::from(1)))
            .collect();
        if let Err(error) = self
            .cache
            .set_many(&entries, self.config.data_cache_expiration)
            .await
        {
            tracing::warn!(data_type = %data_type, error = %error, "failed to cache value types");
        }
        Ok(())
    }
}

//! Measurement upserter.
//!
//! For each distinct series in a batch, make sure an active measurement
//! record exists. The cache gates the store work: a hit means "known to
//! exist" and costs nothing; on a miss the worker takes the measurement lock,
//! re-checks the store, and inserts the record if it is genuinely absent.

use crate::coalesce::MeasurementSeed;
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::registry::DataTypeRegistry;
use crate::release_quietly;
use serde_json::{Map, Value};
use std::sync::Arc;
use timesink_backend::{DocumentStore, KeyValueCache, LockService};
use timesink_core::{ids, Measurement};

pub struct MeasurementUpserter {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn KeyValueCache>,
    locks: Arc<dyn LockService>,
    registry: Arc<DataTypeRegistry>,
    config: Arc<WorkerConfig>,
}

impl MeasurementUpserter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn KeyValueCache>,
        locks: Arc<dyn LockService>,
        registry: Arc<DataTypeRegistry>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            store,
            cache,
            locks,
            registry,
            config,
        }
    }

    pub async fn ensure_all<'a, I>(&self, seeds: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a MeasurementSeed>,
    {
        for seed in seeds {
            self.ensure(seed).await?;
        }
        Ok(())
    }

    async fn ensure(&self, seed: &MeasurementSeed) -> Result<()> {
        let key = ids::measurement_key(&seed.data_type, &seed.identifier);
        match self.cache.get(&key).await {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "cache read failed, treating as miss");
            }
        }

        let lock = ids::lock_key(&key);
        self.locks.acquire(&lock, &self.config.lock_options()).await?;
        let result = self.ensure_locked(seed, &key).await;
        release_quietly(&*self.locks, &lock).await;
        result
    }

    async fn ensure_locked(&self, seed: &MeasurementSeed, key: &str) -> Result<()> {
        let existing = self
            .store
            .find_active_measurement(&seed.data_type, &seed.identifier)
            .await?;
        if existing.is_none() {
            let measurement =
                Measurement::new_active(&seed.identifier, seed.start, self.stored_meta(seed).await);
            self.store
                .insert_measurement(&seed.data_type, measurement)
                .await?;
            tracing::info!(
                data_type = %seed.data_type,
                identifier = %seed.identifier,
                start = seed.start,
                "created measurement record"
            );
        }

        let ttl = self.config.measurement_cache_ttl(seed.interval);
        if let Err(error) = self.cache.set(key, Value::from(1), ttl).await {
            tracing::warn!(key = %key, error = %error, "failed to cache measurement record");
        }
        Ok(())
    }

    /// Only metadata fields the data type declares required are persisted on
    /// the record.
    async fn stored_meta(&self, seed: &MeasurementSeed) -> Map<String, Value> {
        match self.registry.get(&seed.data_type).await {
            Some(data_type) => data_type.required_meta(&seed.meta),
            None => Map::new(),
        }
    }
}

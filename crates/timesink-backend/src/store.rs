//! Document store trait and in-memory implementation.
//!
//! The store holds, per data type (database), four collections:
//! `measurements`, `data`, `event`, and the singleton `metadata` document.
//! `MemoryStore` implements the trait over shared in-memory state and doubles
//! as the embedded backend and the test fixture; it additionally exposes
//! seeding and inspection helpers that are not part of the trait.

use crate::error::{BackendError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use timesink_core::{
    ids, DataDocument, DataPoint, Event, EventDocument, Measurement, TypeMetadata, ValueTypeInfo,
};
use tokio::sync::RwLock;

/// Store operations used by the ingestion worker.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of all databases, for registry refresh.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// The singleton metadata document of a database, if any.
    async fn get_metadata(&self, db: &str) -> Result<Option<TypeMetadata>>;

    /// Declare additional value types on the metadata document in one update.
    ///
    /// Fails when the metadata document does not exist.
    async fn add_metadata_value_types(
        &self,
        db: &str,
        additions: &BTreeMap<String, ValueTypeInfo>,
    ) -> Result<()>;

    /// The measurement record with `identifier` and `end = None`, if any.
    async fn find_active_measurement(
        &self,
        db: &str,
        identifier: &str,
    ) -> Result<Option<Measurement>>;

    async fn insert_measurement(&self, db: &str, measurement: Measurement) -> Result<()>;

    /// Fetch one data bucket by its exact bounds.
    async fn get_data_document(
        &self,
        db: &str,
        identifier: &str,
        start: i64,
        end: i64,
    ) -> Result<Option<DataDocument>>;

    /// All buckets of `identifier` overlapping `[start, end)` half-open,
    /// points included, ordered ascending by `(start, end)`.
    ///
    /// The ordering is the lock-acquisition order during overlap
    /// reconciliation, so it must be identical across workers.
    async fn find_overlapping_documents(
        &self,
        db: &str,
        identifier: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<DataDocument>>;

    /// Create a batch of data buckets.
    async fn insert_data_documents(&self, db: &str, documents: Vec<DataDocument>) -> Result<()>;

    /// The UPDATE path: merge `points` into an existing bucket
    /// (last-writer-wins on `(time, value_type)`) and union `value_types`
    /// into its declared set.
    async fn merge_data_document(
        &self,
        db: &str,
        id: &str,
        points: &[DataPoint],
        value_types: &std::collections::BTreeSet<String>,
    ) -> Result<()>;

    /// Delete data buckets by id in a single batch; returns how many existed.
    async fn remove_data_documents(&self, db: &str, ids: &[String]) -> Result<u64>;

    /// Fetch one event bucket by its exact bounds.
    async fn get_event_document(
        &self,
        db: &str,
        event_type: &str,
        start: i64,
        end: i64,
    ) -> Result<Option<EventDocument>>;

    async fn insert_event_document(&self, db: &str, document: EventDocument) -> Result<()>;

    /// Replace the event list of an existing event bucket.
    async fn replace_event_document_events(
        &self,
        db: &str,
        event_type: &str,
        start: i64,
        end: i64,
        events: Vec<Event>,
    ) -> Result<()>;
}

#[derive(Default)]
struct Database {
    metadata: Option<TypeMetadata>,
    measurements: Vec<Measurement>,
    data: HashMap<String, DataDocument>,
    events: HashMap<String, EventDocument>,
}

/// In-memory document store.
#[derive(Default)]
pub struct MemoryStore {
    databases: RwLock<BTreeMap<String, Database>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a database with its metadata document.
    pub async fn create_database(&self, db: &str, metadata: TypeMetadata) {
        let mut databases = self.databases.write().await;
        databases.entry(db.to_string()).or_default().metadata = Some(metadata);
    }

    /// All measurement records of a database, insertion-ordered.
    pub async fn measurements(&self, db: &str) -> Vec<Measurement> {
        let databases = self.databases.read().await;
        databases
            .get(db)
            .map(|d| d.measurements.clone())
            .unwrap_or_default()
    }

    /// All data buckets of a database, ordered by `(identifier, start)`.
    pub async fn data_documents(&self, db: &str) -> Vec<DataDocument> {
        let databases = self.databases.read().await;
        let mut documents: Vec<DataDocument> = databases
            .get(db)
            .map(|d| d.data.values().cloned().collect())
            .unwrap_or_default();
        documents.sort_by(|a, b| (&a.identifier, a.start).cmp(&(&b.identifier, b.start)));
        documents
    }

    /// All event buckets of a database, ordered by `(event_type, start)`.
    pub async fn event_documents(&self, db: &str) -> Vec<EventDocument> {
        let databases = self.databases.read().await;
        let mut documents: Vec<EventDocument> = databases
            .get(db)
            .map(|d| d.events.values().cloned().collect())
            .unwrap_or_default();
        documents.sort_by(|a, b| (&a.event_type, a.start).cmp(&(&b.event_type, b.start)));
        documents
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_databases(&self) -> Result<Vec<String>> {
        let databases = self.databases.read().await;
        Ok(databases.keys().cloned().collect())
    }

    async fn get_metadata(&self, db: &str) -> Result<Option<TypeMetadata>> {
        let databases = self.databases.read().await;
        Ok(databases.get(db).and_then(|d| d.metadata.clone()))
    }

    async fn add_metadata_value_types(
        &self,
        db: &str,
        additions: &BTreeMap<String, ValueTypeInfo>,
    ) -> Result<()> {
        let mut databases = self.databases.write().await;
        let metadata = databases
            .get_mut(db)
            .and_then(|d| d.metadata.as_mut())
            .ok_or_else(|| BackendError::Store(format!("no metadata document in '{}'", db)))?;
        for (value_type, info) in additions {
            metadata
                .value_types
                .entry(value_type.clone())
                .or_insert_with(|| info.clone());
        }
        Ok(())
    }

    async fn find_active_measurement(
        &self,
        db: &str,
        identifier: &str,
    ) -> Result<Option<Measurement>> {
        let databases = self.databases.read().await;
        Ok(databases.get(db).and_then(|d| {
            d.measurements
                .iter()
                .find(|m| m.identifier == identifier && m.is_active())
                .cloned()
        }))
    }

    async fn insert_measurement(&self, db: &str, measurement: Measurement) -> Result<()> {
        let mut databases = self.databases.write().await;
        databases
            .entry(db.to_string())
            .or_default()
            .measurements
            .push(measurement);
        Ok(())
    }

    async fn get_data_document(
        &self,
        db: &str,
        identifier: &str,
        start: i64,
        end: i64,
    ) -> Result<Option<DataDocument>> {
        let id = ids::data_document_key(db, identifier, start, end);
        let databases = self.databases.read().await;
        Ok(databases.get(db).and_then(|d| d.data.get(&id).cloned()))
    }

    async fn find_overlapping_documents(
        &self,
        db: &str,
        identifier: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<DataDocument>> {
        let databases = self.databases.read().await;
        let mut overlapping: Vec<DataDocument> = databases
            .get(db)
            .map(|d| {
                d.data
                    .values()
                    .filter(|doc| doc.identifier == identifier && doc.overlaps(start, end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        overlapping.sort_by_key(|doc| (doc.start, doc.end));
        Ok(overlapping)
    }

    async fn insert_data_documents(&self, db: &str, documents: Vec<DataDocument>) -> Result<()> {
        let mut databases = self.databases.write().await;
        let database = databases.entry(db.to_string()).or_default();
        for document in documents {
            database.data.insert(document.id.clone(), document);
        }
        Ok(())
    }

    async fn merge_data_document(
        &self,
        db: &str,
        id: &str,
        points: &[DataPoint],
        value_types: &std::collections::BTreeSet<String>,
    ) -> Result<()> {
        let mut databases = self.databases.write().await;
        let document = databases
            .get_mut(db)
            .and_then(|d| d.data.get_mut(id))
            .ok_or_else(|| BackendError::Store(format!("no data document '{}' in '{}'", id, db)))?;
        for point in points {
            document.upsert_point(point.clone());
        }
        document.value_types.extend(value_types.iter().cloned());
        Ok(())
    }

    async fn remove_data_documents(&self, db: &str, ids: &[String]) -> Result<u64> {
        let mut databases = self.databases.write().await;
        let Some(database) = databases.get_mut(db) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in ids {
            if database.data.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn get_event_document(
        &self,
        db: &str,
        event_type: &str,
        start: i64,
        end: i64,
    ) -> Result<Option<EventDocument>> {
        let id = ids::event_document_key(db, event_type, start, end);
        let databases = self.databases.read().await;
        Ok(databases.get(db).and_then(|d| d.events.get(&id).cloned()))
    }

    async fn insert_event_document(&self, db: &str, document: EventDocument) -> Result<()> {
        let mut databases = self.databases.write().await;
        databases
            .entry(db.to_string())
            .or_default()
            .events
            .insert(document.id.clone(), document);
        Ok(())
    }

    async fn replace_event_document_events(
        &self,
        db: &str,
        event_type: &str,
        start: i64,
        end: i64,
        events: Vec<Event>,
    ) -> Result<()> {
        let id = ids::event_document_key(db, event_type, start, end);
        let mut databases = self.databases.write().await;
        let document = databases
            .get_mut(db)
            .and_then(|d| d.events.get_mut(&id))
            .ok_or_else(|| {
                BackendError::Store(format!("no event document '{}' in '{}'", id, db))
            })?;
        document.events = events;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::collections::BTreeSet;

    fn point(time: i64, value_type: &str, value: Option<f64>) -> DataPoint {
        DataPoint {
            time,
            interval: 60,
            value_type: value_type.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn test_metadata_lifecycle() {
        let store = MemoryStore::new();
        assert!(store.get_metadata("cpu").await.unwrap().is_none());

        store.create_database("cpu", TypeMetadata::default()).await;
        assert!(store.get_metadata("cpu").await.unwrap().is_some());
        assert_eq!(store.list_databases().await.unwrap(), vec!["cpu"]);
    }

    #[tokio::test]
    async fn test_add_metadata_value_types() {
        let store = MemoryStore::new();
        store.create_database("cpu", TypeMetadata::default()).await;

        let mut additions = BTreeMap::new();
        additions.insert("load".to_string(), ValueTypeInfo::placeholder("load"));
        store
            .add_metadata_value_types("cpu", &additions)
            .await
            .unwrap();

        let metadata = store.get_metadata("cpu").await.unwrap().unwrap();
        assert!(metadata.value_types.contains_key("load"));

        // Re-adding does not clobber the existing descriptor
        let mut richer = BTreeMap::new();
        richer.insert(
            "load".to_string(),
            ValueTypeInfo {
                description: "different".to_string(),
                units: "x".to_string(),
            },
        );
        store.add_metadata_value_types("cpu", &richer).await.unwrap();
        let metadata = store.get_metadata("cpu").await.unwrap().unwrap();
        assert_eq!(metadata.value_types.get("load").unwrap().description, "load");
    }

    #[tokio::test]
    async fn test_add_metadata_value_types_missing_document() {
        let store = MemoryStore::new();
        let result = store
            .add_metadata_value_types("ghost", &BTreeMap::new())
            .await;
        assert!(matches!(result, Err(BackendError::Store(_))));
    }

    #[tokio::test]
    async fn test_active_measurement_lookup() {
        let store = MemoryStore::new();
        let mut closed = Measurement::new_active("m1", 100, Map::new());
        closed.end = Some(200);
        store.insert_measurement("cpu", closed).await.unwrap();
        assert!(store
            .find_active_measurement("cpu", "m1")
            .await
            .unwrap()
            .is_none());

        store
            .insert_measurement("cpu", Measurement::new_active("m1", 300, Map::new()))
            .await
            .unwrap();
        let active = store
            .find_active_measurement("cpu", "m1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.start, 300);
    }

    #[tokio::test]
    async fn test_data_document_get_by_bounds() {
        let store = MemoryStore::new();
        let doc = DataDocument::covering("cpu", "h1", 60, 61_000);
        store
            .insert_data_documents("cpu", vec![doc.clone()])
            .await
            .unwrap();

        let fetched = store
            .get_data_document("cpu", "h1", 60_000, 120_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, doc.id);
        assert!(store
            .get_data_document("cpu", "h1", 0, 60_000)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_overlapping_sorted_half_open() {
        let store = MemoryStore::new();
        let a = DataDocument::empty("cpu", "h1", 60, 60_000, 120_000);
        let b = DataDocument::empty("cpu", "h1", 60, 120_000, 180_000);
        let c = DataDocument::empty("cpu", "h1", 60, 0, 60_000);
        let other = DataDocument::empty("cpu", "h2", 60, 60_000, 120_000);
        store
            .insert_data_documents("cpu", vec![b.clone(), a.clone(), c.clone(), other])
            .await
            .unwrap();

        // [30_000, 120_000) overlaps c and a but not b (half-open)
        let overlapping = store
            .find_overlapping_documents("cpu", "h1", 30_000, 120_000)
            .await
            .unwrap();
        let starts: Vec<i64> = overlapping.iter().map(|d| d.start).collect();
        assert_eq!(starts, vec![0, 60_000]);
    }

    #[tokio::test]
    async fn test_merge_data_document_last_writer_wins() {
        let store = MemoryStore::new();
        let mut doc = DataDocument::covering("cpu", "h1", 60, 61_000);
        doc.upsert_point(point(61_000, "load", Some(1.0)));
        let id = doc.id.clone();
        store.insert_data_documents("cpu", vec![doc]).await.unwrap();

        let mut value_types = BTreeSet::new();
        value_types.insert("load".to_string());
        value_types.insert("idle".to_string());
        store
            .merge_data_document(
                "cpu",
                &id,
                &[point(61_000, "load", Some(2.0)), point(61_060, "idle", None)],
                &value_types,
            )
            .await
            .unwrap();

        let merged = store
            .get_data_document("cpu", "h1", 60_000, 120_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.points.len(), 2);
        assert_eq!(merged.points[0].value, Some(2.0));
        assert!(merged.value_types.contains("idle"));
    }

    #[tokio::test]
    async fn test_merge_missing_document_fails() {
        let store = MemoryStore::new();
        let result = store
            .merge_data_document("cpu", "nope", &[], &BTreeSet::new())
            .await;
        assert!(matches!(result, Err(BackendError::Store(_))));
    }

    #[tokio::test]
    async fn test_remove_data_documents_batch() {
        let store = MemoryStore::new();
        let a = DataDocument::empty("cpu", "h1", 60, 0, 60_000);
        let b = DataDocument::empty("cpu", "h1", 60, 60_000, 120_000);
        let ids = vec![a.id.clone(), b.id.clone(), "ghost".to_string()];
        store.insert_data_documents("cpu", vec![a, b]).await.unwrap();

        let removed = store.remove_data_documents("cpu", &ids).await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.data_documents("cpu").await.is_empty());
    }

    #[tokio::test]
    async fn test_event_document_lifecycle() {
        let store = MemoryStore::new();
        let mut doc = EventDocument::empty("interface", "outage", 0, 86_400);
        doc.events.push(Event {
            start: 100,
            end: 200,
            identifier: "rtr_a".to_string(),
            affected: serde_json::Value::Null,
            text: "down".to_string(),
            event_type: "outage".to_string(),
        });
        store
            .insert_event_document("interface", doc.clone())
            .await
            .unwrap();

        let fetched = store
            .get_event_document("interface", "outage", 0, 86_400)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.events.len(), 1);

        store
            .replace_event_document_events("interface", "outage", 0, 86_400, Vec::new())
            .await
            .unwrap();
        let emptied = store
            .get_event_document("interface", "outage", 0, 86_400)
            .await
            .unwrap()
            .unwrap();
        assert!(emptied.events.is_empty());
    }

    #[tokio::test]
    async fn test_replace_events_missing_document_fails() {
        let store = MemoryStore::new();
        let result = store
            .replace_event_document_events("interface", "outage", 0, 86_400, Vec::new())
            .await;
        assert!(matches!(result, Err(BackendError::Store(_))));
    }
}

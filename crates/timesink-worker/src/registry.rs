//! Data-type registry.
//!
//! An in-process snapshot of the known data-type descriptors, loaded from the
//! store's metadata documents. The snapshot is an `Arc<HashMap>` swapped
//! whole on refresh: readers observe either the old map or the new one, never
//! a torn view. A failed refresh leaves the registry unchanged.

use crate::error::Result;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use timesink_backend::DocumentStore;
use timesink_core::DataType;
use tokio::sync::RwLock;

type Snapshot = Arc<HashMap<String, Arc<DataType>>>;

pub struct DataTypeRegistry {
    store: Arc<dyn DocumentStore>,
    ignore: BTreeSet<String>,
    types: RwLock<Snapshot>,
}

impl DataTypeRegistry {
    /// An empty registry; descriptors load on the first refresh.
    pub fn new(store: Arc<dyn DocumentStore>, ignore: BTreeSet<String>) -> Self {
        Self {
            store,
            ignore,
            types: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<DataType>> {
        self.types.read().await.get(name).cloned()
    }

    /// The current snapshot, for inspection.
    pub async fn snapshot(&self) -> Snapshot {
        self.types.read().await.clone()
    }

    /// Reload every non-ignored database from the store and swap the map.
    ///
    /// Databases whose names begin with `_` are always skipped, as are
    /// databases without a metadata document. Any store failure surfaces and
    /// the current snapshot stays in place.
    pub async fn refresh(&self) -> Result<()> {
        let names = self.store.list_databases().await?;
        let mut types = HashMap::new();
        for name in names {
            if name.starts_with('_') || self.ignore.contains(&name) {
                continue;
            }
            match self.store.get_metadata(&name).await? {
                Some(metadata) => {
                    types.insert(
                        name.clone(),
                        Arc::new(DataType::from_metadata(&name, metadata)),
                    );
                }
                None => {
                    tracing::debug!(database = %name, "database has no metadata document, skipping");
                }
            }
        }
        tracing::debug!(data_types = types.len(), "registry refreshed");
        *self.types.write().await = Arc::new(types);
        Ok(())
    }
}

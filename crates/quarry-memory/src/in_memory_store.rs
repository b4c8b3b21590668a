use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::vector_store::{
    BoxFuture, Payload, ScoredVectorPoint, StoredPoint, VectorPoint, VectorStore,
    VectorStoreError, cosine_similarity,
};

struct Collection {
    dimension: u64,
    // Ordered so scrolls are deterministic.
    points: BTreeMap<String, (Vec<f32>, Payload)>,
}

/// Process-local [`VectorStore`] with brute-force cosine search.
///
/// Backs tests and single-process runs that need no Qdrant server.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.read().map(|c| c.len()).unwrap_or_default();
        f.debug_struct("InMemoryVectorStore")
            .field("collections", &names)
            .finish()
    }
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>, VectorStoreError> {
        self.collections
            .read()
            .map_err(|_| VectorStoreError::Connection("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>, VectorStoreError> {
        self.collections
            .write()
            .map_err(|_| VectorStoreError::Connection("in-memory store lock poisoned".into()))
    }

    fn with_collection<T>(
        &self,
        name: &str,
        missing: fn(String) -> VectorStoreError,
        f: impl FnOnce(&Collection) -> T,
    ) -> Result<T, VectorStoreError> {
        let guard = self.read()?;
        let collection = guard
            .get(name)
            .ok_or_else(|| missing(format!("{name} does not exist")))?;
        Ok(f(collection))
    }
}

impl VectorStore for InMemoryVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let name = collection.to_owned();
        Box::pin(async move {
            let mut guard = self.write()?;
            let existing = guard.entry(name.clone()).or_insert_with(|| Collection {
                dimension: vector_size,
                points: BTreeMap::new(),
            });
            if existing.dimension == vector_size {
                Ok(())
            } else {
                Err(VectorStoreError::Collection(format!(
                    "{name} holds {}-dimensional vectors, not {vector_size}",
                    existing.dimension
                )))
            }
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let exists = self.read().map(|c| c.contains_key(collection));
        Box::pin(async move { exists })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let removed = self.write().map(|mut c| {
            c.remove(collection);
        });
        Box::pin(async move { removed })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let name = collection.to_owned();
        Box::pin(async move {
            let mut guard = self.write()?;
            let target = guard
                .get_mut(&name)
                .ok_or_else(|| VectorStoreError::Upsert(format!("{name} does not exist")))?;
            let dimension = target.dimension;
            if let Some(bad) = points.iter().find(|p| p.vector.len() as u64 != dimension) {
                return Err(VectorStoreError::Upsert(format!(
                    "point {} has {} dimensions, {name} expects {dimension}",
                    bad.id,
                    bad.vector.len()
                )));
            }
            target
                .points
                .extend(points.into_iter().map(|p| (p.id, (p.vector, p.payload))));
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        score_threshold: Option<f32>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let hits = self.with_collection(collection, VectorStoreError::Search, |c| {
            let floor = score_threshold.unwrap_or(f32::NEG_INFINITY);
            let mut hits: Vec<ScoredVectorPoint> = c
                .points
                .iter()
                .filter_map(|(id, (stored, payload))| {
                    let score = cosine_similarity(&vector, stored);
                    (score >= floor).then(|| ScoredVectorPoint {
                        id: id.clone(),
                        score,
                        payload: payload.clone(),
                    })
                })
                .collect();
            // Ties keep id order; the sort is stable over the BTreeMap walk.
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            hits
        });
        Box::pin(async move { hits })
    }

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let name = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut guard = self.write()?;
            let target = guard
                .get_mut(&name)
                .ok_or_else(|| VectorStoreError::Delete(format!("{name} does not exist")))?;
            for id in &ids {
                target.points.remove(id);
            }
            Ok(())
        })
    }

    fn scroll_all(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<Vec<StoredPoint>, VectorStoreError>> {
        let points = self.with_collection(collection, VectorStoreError::Scroll, |c| {
            c.points
                .iter()
                .map(|(id, (_, payload))| StoredPoint {
                    id: id.clone(),
                    payload: payload.clone(),
                })
                .collect()
        });
        Box::pin(async move { points })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let count = self
            .read()
            .map(|c| c.get(collection).map_or(0, |c| c.points.len() as u64));
        Box::pin(async move { count })
    }
}

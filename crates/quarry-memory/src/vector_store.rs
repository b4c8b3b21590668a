use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// JSON document stored next to a vector.
pub type Payload = HashMap<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("vector store unreachable: {0}")]
    Connection(String),
    #[error("collection {0}")]
    Collection(String),
    #[error("upsert failed: {0}")]
    Upsert(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("delete failed: {0}")]
    Delete(String),
    #[error("scroll failed: {0}")]
    Scroll(String),
    #[error("payload conversion failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// A search hit. `score` is the cosine similarity to the query vector.
#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// A stored point without its vector, as returned by [`VectorStore::scroll_all`].
#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub id: String,
    pub payload: Payload,
}

/// Collection-scoped vector storage with cosine similarity search.
///
/// A collection's dimension is fixed when it is created; writing a vector of
/// another length is an error.
pub trait VectorStore: Send + Sync {
    /// Create `collection` unless it already exists.
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    /// Drop `collection` and every point in it. Missing collections are fine.
    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Insert or replace points by id.
    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Up to `limit` nearest points, best first. Points scoring below
    /// `score_threshold` are dropped.
    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        score_threshold: Option<f32>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Every point in the collection with its payload.
    fn scroll_all(&self, collection: &str)
    -> BoxFuture<'_, Result<Vec<StoredPoint>, VectorStoreError>>;

    /// Number of points; zero for a missing collection.
    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>>;
}

/// Cosine of the angle between `a` and `b`. Zero when either is a zero
/// vector or the lengths differ.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut aa, mut bb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        aa += x * x;
        bb += y * y;
    }
    if aa == 0.0 || bb == 0.0 {
        return 0.0;
    }
    dot / (aa.sqrt() * bb.sqrt())
}

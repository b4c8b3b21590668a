//! Qdrant-backed [`VectorStore`].
//!
//! Qdrant only accepts UUID or integer point ids, so callers pass UUID
//! strings as [`VectorPoint::id`] and keep their own identifiers in the
//! payload.

use std::collections::HashMap;

use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, PointId,
    PointStruct, PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder, point_id::PointIdOptions, value::Kind,
};
use qdrant_client::{Qdrant, QdrantError};

use crate::vector_store::{
    BoxFuture, Payload, ScoredVectorPoint, StoredPoint, VectorPoint, VectorStore,
    VectorStoreError,
};

const SCROLL_PAGE: u32 = 256;

/// gRPC client for one Qdrant server.
#[derive(Clone)]
pub struct QdrantOps {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantOps").finish_non_exhaustive()
    }
}

impl QdrantOps {
    /// Build a client for `url`. No request is sent until first use.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError::Connection`] if the URL is rejected.
    pub fn new(url: &str) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Connection(format!("{url}: {e}")))?;
        Ok(Self { client })
    }
}

fn mapped(kind: fn(String) -> VectorStoreError) -> impl Fn(QdrantError) -> VectorStoreError {
    move |e| kind(e.to_string())
}

impl VectorStore for QdrantOps {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let exists = self
                .client
                .collection_exists(&collection)
                .await
                .map_err(mapped(VectorStoreError::Connection))?;
            if exists {
                return Ok(());
            }
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
                )
                .await
                .map_err(mapped(VectorStoreError::Collection))?;
            tracing::info!(collection, vector_size, "qdrant collection created");
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .collection_exists(&collection)
                .await
                .map_err(mapped(VectorStoreError::Connection))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let exists = self
                .client
                .collection_exists(&collection)
                .await
                .map_err(mapped(VectorStoreError::Connection))?;
            if exists {
                self.client
                    .delete_collection(&collection)
                    .await
                    .map_err(mapped(VectorStoreError::Collection))?;
            }
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if points.is_empty() {
                return Ok(());
            }
            let points = points
                .into_iter()
                .map(|p| Ok(PointStruct::new(p.id, p.vector, to_qdrant_payload(p.payload)?)))
                .collect::<Result<Vec<_>, VectorStoreError>>()?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, points).wait(true))
                .await
                .map_err(mapped(VectorStoreError::Upsert))?;
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
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut request =
                SearchPointsBuilder::new(&collection, vector, limit).with_payload(true);
            if let Some(threshold) = score_threshold {
                request = request.score_threshold(threshold);
            }
            let response = self
                .client
                .search_points(request)
                .await
                .map_err(mapped(VectorStoreError::Search))?;
            Ok(response
                .result
                .into_iter()
                .map(|p| ScoredVectorPoint {
                    id: point_id_string(p.id),
                    score: p.score,
                    payload: from_qdrant_payload(p.payload),
                })
                .collect())
        })
    }

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&collection)
                        .points(PointsIdsList { ids })
                        .wait(true),
                )
                .await
                .map_err(mapped(VectorStoreError::Delete))?;
            Ok(())
        })
    }

    fn scroll_all(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<Vec<StoredPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut points = Vec::new();
            let mut offset: Option<PointId> = None;
            loop {
                let mut request = ScrollPointsBuilder::new(&collection)
                    .with_payload(true)
                    .with_vectors(false)
                    .limit(SCROLL_PAGE);
                if let Some(next) = offset.take() {
                    request = request.offset(next);
                }
                let page = self
                    .client
                    .scroll(request)
                    .await
                    .map_err(mapped(VectorStoreError::Scroll))?;
                points.extend(page.result.into_iter().map(|p| StoredPoint {
                    id: point_id_string(p.id),
                    payload: from_qdrant_payload(p.payload),
                }));
                let Some(next) = page.next_page_offset else {
                    break;
                };
                offset = Some(next);
            }
            tracing::debug!(collection, points = points.len(), "qdrant scroll complete");
            Ok(points)
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let exists = self
                .client
                .collection_exists(&collection)
                .await
                .map_err(mapped(VectorStoreError::Connection))?;
            if !exists {
                return Ok(0);
            }
            let response = self
                .client
                .count(CountPointsBuilder::new(&collection).exact(true))
                .await
                .map_err(mapped(VectorStoreError::Scroll))?;
            Ok(response.result.map_or(0, |r| r.count))
        })
    }
}

fn to_qdrant_payload(
    payload: Payload,
) -> Result<HashMap<String, qdrant_client::qdrant::Value>, VectorStoreError> {
    serde_json::from_value(serde_json::Value::Object(payload.into_iter().collect()))
        .map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

fn from_qdrant_payload(payload: HashMap<String, qdrant_client::qdrant::Value>) -> Payload {
    payload
        .into_iter()
        .filter_map(|(k, v)| Some((k, to_json(v)?)))
        .collect()
}

fn to_json(value: qdrant_client::qdrant::Value) -> Option<serde_json::Value> {
    use serde_json::Value as Json;

    Some(match value.kind? {
        Kind::NullValue(_) => Json::Null,
        Kind::BoolValue(b) => Json::Bool(b),
        Kind::IntegerValue(i) => Json::from(i),
        Kind::DoubleValue(d) => Json::Number(serde_json::Number::from_f64(d)?),
        Kind::StringValue(s) => Json::String(s),
        Kind::ListValue(list) => Json::Array(list.values.into_iter().filter_map(to_json).collect()),
        Kind::StructValue(fields) => Json::Object(
            fields
                .fields
                .into_iter()
                .filter_map(|(k, v)| Some((k, to_json(v)?)))
                .collect(),
        ),
    })
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

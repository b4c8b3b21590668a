//! Hybrid retrieval: query expansion, vector and BM25 search, rank fusion.
//!
//! Search never fails at the boundary. A backend that errors or times out is
//! reported in [`SearchResponse::errors`] and the other backend's hits are
//! still fused and returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use quarry_llm::EmbeddingProvider;
use quarry_memory::VectorStore;
use serde::Serialize;

use crate::chunker::Chunk;
use crate::expansion::expand_query;
use crate::fusion::reciprocal_rank_fusion;
use crate::keyword::KeywordIndexes;
use crate::points::chunk_from_payload;

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for vector hits.
    pub vector_score_threshold: f32,
    pub rrf_k: usize,
    /// Each backend fetches `top_k * candidate_multiplier` hits per variant.
    pub candidate_multiplier: usize,
    pub expand_queries: bool,
    pub max_query_variants: usize,
    /// Deadline for each embedder or store call.
    pub timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_score_threshold: 0.3,
            rrf_k: 60,
            candidate_multiplier: 2,
            expand_queries: true,
            max_query_variants: 8,
            timeout: Duration::from_secs(10),
        }
    }
}

/// A fused search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub chunk: Chunk,
    /// Best cosine similarity across query variants, 0 when only keyword
    /// search found the chunk.
    pub vector_score: f32,
    /// Best BM25 score across query variants.
    pub keyword_score: f32,
    /// Reciprocal rank fusion score.
    pub hybrid_score: f32,
}

/// A backend failure observed during one search.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SearchError {
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("vector search failed: {0}")]
    VectorStore(String),
    #[error("keyword search failed: {0}")]
    KeywordIndex(String),
    #[error("{0} timed out")]
    Timeout(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub errors: Vec<SearchError>,
}

impl SearchResponse {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }
}

struct Candidate {
    chunk: Chunk,
    vector_score: f32,
    keyword_score: f32,
}

#[derive(Default)]
struct Candidates {
    by_id: HashMap<String, Candidate>,
    /// Ranked id lists in fusion order.
    lists: Vec<Vec<String>>,
}

impl Candidates {
    fn push_list(&mut self, hits: Vec<(Chunk, f32)>, vector: bool) {
        let mut ids = Vec::with_capacity(hits.len());
        for (chunk, score) in hits {
            let entry = self.by_id.entry(chunk.id.clone()).or_insert_with(|| Candidate {
                chunk,
                vector_score: 0.0,
                keyword_score: 0.0,
            });
            if vector {
                entry.vector_score = entry.vector_score.max(score);
            } else {
                entry.keyword_score = entry.keyword_score.max(score);
            }
            ids.push(entry.chunk.id.clone());
        }
        self.lists.push(ids);
    }
}

/// Vector plus keyword search over one collection, fused with RRF.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    keyword: Arc<KeywordIndexes>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        keyword: Arc<KeywordIndexes>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            keyword,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Search `collection` for `query`, returning at most `top_k` results
    /// best first.
    ///
    /// With `expand`, synonym variants of the query are searched as well and
    /// all of their ranked lists take part in fusion.
    pub async fn search(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        expand: bool,
    ) -> SearchResponse {
        let mut response = SearchResponse::default();
        if query.trim().is_empty() || top_k == 0 {
            return response;
        }
        let started = Instant::now();

        match tokio::time::timeout(self.config.timeout, self.store.collection_exists(collection))
            .await
        {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                tracing::debug!(collection, "search on unknown collection");
                return response;
            }
            Ok(Err(e)) => {
                tracing::warn!(collection, "vector store unreachable: {e}");
                response.errors.push(SearchError::VectorStore(e.to_string()));
                return response;
            }
            Err(_) => {
                response
                    .errors
                    .push(SearchError::Timeout("collection lookup".into()));
                return response;
            }
        }

        let variants = if expand {
            expand_query(query, self.config.max_query_variants)
        } else {
            vec![query.to_owned()]
        };
        let limit = top_k.saturating_mul(self.config.candidate_multiplier.max(1));

        let vector_lists = self
            .vector_lists(&variants, collection, limit, &mut response.errors)
            .await;
        let keyword_lists = self
            .keyword_lists(&variants, collection, limit, &mut response.errors)
            .await;

        let mut vector_lists = vector_lists.map(Vec::into_iter);
        let mut keyword_lists = keyword_lists.map(Vec::into_iter);
        let mut candidates = Candidates::default();
        for _ in &variants {
            if let Some(hits) = vector_lists.as_mut().and_then(Iterator::next) {
                candidates.push_list(hits, true);
            }
            if let Some(hits) = keyword_lists.as_mut().and_then(Iterator::next) {
                candidates.push_list(hits, false);
            }
        }

        let fused = reciprocal_rank_fusion(&candidates.lists, self.config.rrf_k);
        response.results = fused
            .into_iter()
            .take(top_k)
            .filter_map(|(id, hybrid_score)| {
                let candidate = candidates.by_id.remove(&id)?;
                Some(SearchResult {
                    chunk: candidate.chunk,
                    vector_score: candidate.vector_score,
                    keyword_score: candidate.keyword_score,
                    hybrid_score,
                })
            })
            .collect();

        tracing::debug!(
            collection,
            variants = variants.len(),
            results = response.results.len(),
            errors = response.errors.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "hybrid search finished"
        );
        response
    }

    /// One ranked vector hit list per variant, or `None` when vector search
    /// is unavailable for this query.
    async fn vector_lists(
        &self,
        variants: &[String],
        collection: &str,
        limit: usize,
        errors: &mut Vec<SearchError>,
    ) -> Option<Vec<Vec<(Chunk, f32)>>> {
        let vectors = match tokio::time::timeout(
            self.config.timeout,
            self.embedder.embed(variants.to_vec()),
        )
        .await
        {
            Ok(Ok(vectors)) if vectors.len() == variants.len() => vectors,
            Ok(Ok(vectors)) => {
                errors.push(SearchError::Embedding(format!(
                    "expected {} query vectors, got {}",
                    variants.len(),
                    vectors.len()
                )));
                return None;
            }
            Ok(Err(e)) => {
                tracing::warn!(collection, "query embedding failed: {e}");
                errors.push(SearchError::Embedding(e.to_string()));
                return None;
            }
            Err(_) => {
                tracing::warn!(collection, "query embedding timed out");
                errors.push(SearchError::Timeout("query embedding".into()));
                return None;
            }
        };

        let limit = u64::try_from(limit).unwrap_or(u64::MAX);
        let threshold = Some(self.config.vector_score_threshold);
        let searches = vectors.into_iter().map(|vector| {
            tokio::time::timeout(
                self.config.timeout,
                self.store.search(collection, vector, limit, threshold),
            )
        });

        let mut lists = Vec::with_capacity(variants.len());
        let mut failed = false;
        for outcome in join_all(searches).await {
            match outcome {
                Ok(Ok(points)) => lists.push(
                    points
                        .into_iter()
                        .filter_map(|p| Some((chunk_from_payload(&p.payload)?, p.score)))
                        .collect(),
                ),
                Ok(Err(e)) => {
                    if !failed {
                        tracing::warn!(collection, "vector search failed: {e}");
                        errors.push(SearchError::VectorStore(e.to_string()));
                    }
                    failed = true;
                }
                Err(_) => {
                    if !failed {
                        errors.push(SearchError::Timeout("vector search".into()));
                    }
                    failed = true;
                }
            }
        }
        (!failed).then_some(lists)
    }

    async fn keyword_lists(
        &self,
        variants: &[String],
        collection: &str,
        limit: usize,
        errors: &mut Vec<SearchError>,
    ) -> Option<Vec<Vec<(Chunk, f32)>>> {
        let index = match tokio::time::timeout(
            self.config.timeout,
            self.keyword.get_or_build(collection, self.store.as_ref()),
        )
        .await
        {
            Ok(Ok(index)) => index,
            Ok(Err(e)) => {
                tracing::warn!(collection, "keyword index unavailable: {e}");
                errors.push(SearchError::KeywordIndex(e.to_string()));
                return None;
            }
            Err(_) => {
                errors.push(SearchError::Timeout("keyword index build".into()));
                return None;
            }
        };
        Some(variants.iter().map(|v| index.search(v, limit)).collect())
    }
}

//! Second-stage re-ranking, confidence, explanations and diversification.
//!
//! Every method degrades to basic re-ranking (the fused retrieval score)
//! when the signal it needs is missing, fails or times out, so `rerank`
//! always returns the input results in some order.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use quarry_llm::{EmbeddingProvider, RelevanceScorer};
use quarry_memory::cosine_similarity;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::retriever::SearchResult;

const CODE_EXTENSIONS: &[&str] = &["py", "js", "ts", "java", "cpp", "c", "go", "rs"];

const FEATURE_WEIGHTS: &[(&str, f32)] = &[
    ("exact_match", 0.30),
    ("keyword_density", 0.20),
    ("position_bonus", 0.15),
    ("length_bonus", 0.10),
    ("file_type_bonus", 0.15),
    ("vector_score", 0.10),
];

const CROSS_ENCODER_WEIGHT: f32 = 0.4;
const SEMANTIC_WEIGHT: f32 = 0.3;
const FEATURE_WEIGHT: f32 = 0.3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankMethod {
    CrossEncoder,
    SemanticSimilarity,
    FeatureBased,
    #[default]
    Hybrid,
    /// Keep the retrieval order. Also the fallback of every other method.
    Basic,
}

impl RerankMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CrossEncoder => "cross_encoder",
            Self::SemanticSimilarity => "semantic_similarity",
            Self::FeatureBased => "feature_based",
            Self::Hybrid => "hybrid",
            Self::Basic => "basic",
        }
    }
}

impl std::fmt::Display for RerankMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RerankMethod {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "cross_encoder" => Ok(Self::CrossEncoder),
            "semantic_similarity" | "semantic" => Ok(Self::SemanticSimilarity),
            "feature_based" | "features" => Ok(Self::FeatureBased),
            "hybrid" => Ok(Self::Hybrid),
            "basic" => Ok(Self::Basic),
            other => Err(IndexError::Other(format!("unknown rerank method: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RerankConfig {
    pub method: RerankMethod,
    pub diversity_threshold: f32,
    pub max_results: usize,
    /// Chunk length in characters that earns the full length bonus.
    pub optimal_length: usize,
    /// Deadline for each scorer or embedder call.
    pub timeout: Duration,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            method: RerankMethod::Hybrid,
            diversity_threshold: 0.7,
            max_results: 10,
            optimal_length: 200,
            timeout: Duration::from_secs(10),
        }
    }
}

/// A search result with its second-stage score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankedResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub rerank_score: f32,
    pub confidence: f32,
    /// Signals that produced `rerank_score`.
    pub features: BTreeMap<String, f32>,
    /// Method that actually produced the score.
    pub method: RerankMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingExplanation {
    pub final_score: f32,
    pub confidence: f32,
    pub reasoning: Vec<String>,
}

/// Confidence in a score given the size of the result set it came from.
///
/// The score is clamped into `[0, 1]` and damped as the result set grows
/// toward 100 entries. The output always lies in `[0.1, 1.0]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn confidence(score: f32, result_count: usize) -> f32 {
    let normalized = if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    };
    let result_factor = 1.0 - (result_count as f32 / 100.0).min(1.0);
    (normalized * (0.7 + 0.3 * result_factor)).clamp(0.1, 1.0)
}

/// Hand-crafted relevance features of `result` for `query`, each in `[0, 1]`
/// except `vector_score`, which is passed through.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn relevance_features(
    query: &str,
    result: &SearchResult,
    optimal_length: usize,
) -> BTreeMap<String, f32> {
    let chunk = &result.chunk;
    let query_lower = query.trim().to_lowercase();
    let content_lower = chunk.content.to_lowercase();

    let exact_match = if !query_lower.is_empty() && content_lower.contains(&query_lower) {
        1.0
    } else {
        0.0
    };

    let query_words: Vec<&str> = query_lower.split_whitespace().collect();
    let content_words: HashSet<&str> = content_lower.split_whitespace().collect();
    let keyword_density = if query_words.is_empty() || content_words.is_empty() {
        0.0
    } else {
        let hits = query_words
            .iter()
            .filter(|w| content_words.contains(*w))
            .count();
        hits as f32 / query_words.len() as f32
    };

    let position_bonus = (1.0 - chunk.start_line as f32 / 1000.0).max(0.0);

    let length = chunk.content.chars().count() as f32;
    let optimal = optimal_length.max(1) as f32;
    let length_bonus = if length == 0.0 {
        0.0
    } else if length <= optimal {
        length / optimal
    } else {
        optimal / length
    };

    let extension = chunk
        .file_path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    let file_type_bonus = if CODE_EXTENSIONS.contains(&extension.as_str()) {
        1.0
    } else {
        0.8
    };

    BTreeMap::from([
        ("exact_match".to_owned(), exact_match),
        ("keyword_density".to_owned(), keyword_density),
        ("position_bonus".to_owned(), position_bonus),
        ("length_bonus".to_owned(), length_bonus),
        ("file_type_bonus".to_owned(), file_type_bonus),
        ("vector_score".to_owned(), result.vector_score),
    ])
}

fn weighted_feature_score(features: &BTreeMap<String, f32>) -> f32 {
    FEATURE_WEIGHTS
        .iter()
        .map(|(name, weight)| features.get(*name).copied().unwrap_or(0.0) * weight)
        .sum()
}

/// Word-set Jaccard similarity of two texts.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let words_a: HashSet<&str> = a_lower.split_whitespace().collect();
    let words_b: HashSet<&str> = b_lower.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f32 / union as f32
}

struct Scored {
    score: f32,
    features: BTreeMap<String, f32>,
}

/// Re-ranks retrieval results with optional model-backed signals.
pub struct Reranker {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
    config: RerankConfig,
}

impl Reranker {
    #[must_use]
    pub fn new(config: RerankConfig) -> Self {
        Self {
            embedder: None,
            scorer: None,
            config,
        }
    }

    /// Enables `semantic_similarity` and embedding-based diversification.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Enables `cross_encoder`.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    /// Re-score `results` for `query` with `method` and return the best
    /// `top_k`, highest `rerank_score` first.
    pub async fn rerank(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        top_k: usize,
        method: RerankMethod,
    ) -> Vec<RerankedResult> {
        if results.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let scored = match self.score(query, &results, method).await {
            Ok(scored) => Some((scored, method)),
            Err(reason) => {
                if method != RerankMethod::Basic {
                    tracing::warn!(method = method.as_str(), "falling back to basic rerank: {reason}");
                }
                None
            }
        };

        let total = results.len();
        let mut reranked: Vec<RerankedResult> = match scored {
            Some((scored, method)) => results
                .into_iter()
                .zip(scored)
                .map(|(result, s)| RerankedResult {
                    result,
                    rerank_score: s.score,
                    confidence: confidence(s.score, total),
                    features: s.features,
                    method,
                })
                .collect(),
            None => results.into_iter().map(|r| basic(r, total)).collect(),
        };

        reranked.sort_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));
        reranked.truncate(top_k);
        tracing::debug!(
            method = method.as_str(),
            candidates = total,
            returned = reranked.len(),
            "rerank finished"
        );
        reranked
    }

    /// One score per result, in input order. `Err` means "use basic".
    async fn score(
        &self,
        query: &str,
        results: &[SearchResult],
        method: RerankMethod,
    ) -> Result<Vec<Scored>, String> {
        match method {
            RerankMethod::Basic => Err("basic requested".into()),
            RerankMethod::CrossEncoder => {
                let scores = self.cross_encoder_scores(query, results).await?;
                Ok(single_signal(scores, "cross_encoder_score"))
            }
            RerankMethod::SemanticSimilarity => {
                let scores = self.semantic_scores(query, results).await?;
                Ok(single_signal(scores, "semantic_similarity"))
            }
            RerankMethod::FeatureBased => Ok(self.feature_scores(query, results)),
            RerankMethod::Hybrid => self.hybrid_scores(query, results).await,
        }
    }

    async fn cross_encoder_scores(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<Vec<f32>, String> {
        let Some(scorer) = &self.scorer else {
            return Err("no relevance scorer configured".into());
        };
        if results.len() < 2 {
            return Err("nothing to reorder".into());
        }
        let documents = results.iter().map(|r| r.chunk.content.clone()).collect();
        let scores = tokio::time::timeout(self.config.timeout, scorer.score(query, documents))
            .await
            .map_err(|_| "relevance scoring timed out".to_owned())?
            .map_err(|e| e.to_string())?;
        if scores.len() != results.len() {
            return Err(format!(
                "scorer returned {} scores for {} documents",
                scores.len(),
                results.len()
            ));
        }
        Ok(scores)
    }

    async fn semantic_scores(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<Vec<f32>, String> {
        let Some(embedder) = &self.embedder else {
            return Err("no embedding provider configured".into());
        };
        if results.len() < 2 {
            return Err("nothing to reorder".into());
        }
        let mut texts = Vec::with_capacity(results.len() + 1);
        texts.push(query.to_owned());
        texts.extend(results.iter().map(|r| r.chunk.content.clone()));

        let vectors = tokio::time::timeout(self.config.timeout, embedder.embed(texts))
            .await
            .map_err(|_| "embedding timed out".to_owned())?
            .map_err(|e| e.to_string())?;
        let Some((query_vector, documents)) = vectors.split_first() else {
            return Err("embedder returned no vectors".into());
        };
        if documents.len() != results.len() {
            return Err(format!(
                "embedder returned {} vectors for {} documents",
                documents.len(),
                results.len()
            ));
        }
        Ok(documents
            .iter()
            .map(|doc| cosine_similarity(query_vector, doc))
            .collect())
    }

    fn feature_scores(&self, query: &str, results: &[SearchResult]) -> Vec<Scored> {
        results
            .iter()
            .map(|r| {
                let features = relevance_features(query, r, self.config.optimal_length);
                Scored {
                    score: weighted_feature_score(&features),
                    features,
                }
            })
            .collect()
    }

    /// Weighted average of the available signals. Signals without a
    /// configured model are left out and the weights re-normalized; a
    /// configured signal that fails sends the whole rerank to basic.
    async fn hybrid_scores(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<Vec<Scored>, String> {
        let multiple = results.len() > 1;
        let cross = if self.scorer.is_some() && multiple {
            Some(self.cross_encoder_scores(query, results).await?)
        } else {
            None
        };
        let semantic = if self.embedder.is_some() && multiple {
            Some(self.semantic_scores(query, results).await?)
        } else {
            None
        };

        let mut scored = self.feature_scores(query, results);
        for (idx, s) in scored.iter_mut().enumerate() {
            let mut total = s.score * FEATURE_WEIGHT;
            let mut weights = FEATURE_WEIGHT;
            if let Some(cross) = &cross {
                total += cross[idx] * CROSS_ENCODER_WEIGHT;
                weights += CROSS_ENCODER_WEIGHT;
                s.features.insert("cross_encoder_score".into(), cross[idx]);
            }
            if let Some(semantic) = &semantic {
                total += semantic[idx] * SEMANTIC_WEIGHT;
                weights += SEMANTIC_WEIGHT;
                s.features.insert("semantic_similarity".into(), semantic[idx]);
            }
            s.score = total / weights;
        }
        Ok(scored)
    }

    /// Why `result` ranked where it did, one sentence per strong signal.
    #[must_use]
    pub fn explain(&self, result: &RerankedResult) -> RankingExplanation {
        let reasoning = result
            .features
            .iter()
            .filter_map(|(name, value)| {
                let reason = match name.as_str() {
                    "exact_match" if *value > 0.5 => "Contains exact query match",
                    "keyword_density" if *value > 0.7 => "High keyword density",
                    "semantic_similarity" if *value > 0.8 => "High semantic similarity",
                    "cross_encoder_score" if *value > 0.7 => "High relevance according to the scoring model",
                    "vector_score" if *value > 0.7 => "High vector similarity",
                    "position_bonus" if *value > 0.8 => "Found early in document",
                    "file_type_bonus" if *value > 0.9 => "Preferred file type (code)",
                    _ => return None,
                };
                Some(reason.to_owned())
            })
            .collect();
        RankingExplanation {
            final_score: result.rerank_score,
            confidence: result.confidence,
            reasoning,
        }
    }

    /// Drop results too similar to a higher-ranked one.
    ///
    /// The first result is kept unless `max_results` is zero. Each later
    /// result is kept only if its content similarity to every kept result is
    /// below `threshold`, until `max_results` are kept. Similarity is the cosine of content
    /// embeddings, or word Jaccard when no embedder is configured or
    /// embedding fails.
    pub async fn diversify(
        &self,
        results: Vec<RerankedResult>,
        threshold: f32,
        max_results: usize,
    ) -> Vec<RerankedResult> {
        if max_results == 0 {
            return Vec::new();
        }
        if results.len() <= 1 {
            return results;
        }
        let embeddings = self.content_embeddings(&results).await;
        let similarity = |i: usize, j: usize| match &embeddings {
            Some(vectors) => cosine_similarity(&vectors[i], &vectors[j]),
            None => jaccard_similarity(&results[i].result.chunk.content, &results[j].result.chunk.content),
        };

        let mut kept = vec![0usize];
        for candidate in 1..results.len() {
            if kept.len() >= max_results {
                break;
            }
            if kept.iter().all(|&k| similarity(candidate, k) < threshold) {
                kept.push(candidate);
            }
        }

        tracing::debug!(before = results.len(), after = kept.len(), "results diversified");
        let kept: HashSet<usize> = kept.into_iter().collect();
        results
            .into_iter()
            .enumerate()
            .filter_map(|(idx, r)| kept.contains(&idx).then_some(r))
            .collect()
    }

    async fn content_embeddings(&self, results: &[RerankedResult]) -> Option<Vec<Vec<f32>>> {
        let embedder = self.embedder.as_ref()?;
        let texts = results.iter().map(|r| r.result.chunk.content.clone()).collect();
        match tokio::time::timeout(self.config.timeout, embedder.embed(texts)).await {
            Ok(Ok(vectors)) if vectors.len() == results.len() => Some(vectors),
            Ok(Ok(_)) => {
                tracing::warn!("embedding count mismatch, diversifying by word overlap");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!("content embedding failed, diversifying by word overlap: {e}");
                None
            }
            Err(_) => {
                tracing::warn!("content embedding timed out, diversifying by word overlap");
                None
            }
        }
    }
}

fn single_signal(scores: Vec<f32>, feature: &str) -> Vec<Scored> {
    scores
        .into_iter()
        .map(|score| Scored {
            score,
            features: BTreeMap::from([(feature.to_owned(), score)]),
        })
        .collect()
}

fn basic(result: SearchResult, total: usize) -> RerankedResult {
    let score = result.hybrid_score;
    RerankedResult {
        features: BTreeMap::from([
            ("vector_score".to_owned(), result.vector_score),
            ("keyword_score".to_owned(), result.keyword_score),
            ("hybrid_score".to_owned(), score),
        ]),
        result,
        rerank_score: score,
        confidence: confidence(score, total),
        method: RerankMethod::Basic,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use quarry_llm::mock::{MockEmbedder, MockRelevanceScorer};

    use super::*;
    use crate::chunker::{Chunk, ChunkMetadata, ChunkType};
    use crate::languages::detect_language;

    fn hit(path: &str, start_line: usize, content: &str, vector: f32, hybrid: f32) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: format!("{path}:lines:0:{start_line}-{start_line}"),
                file_path: path.to_owned(),
                start_line,
                end_line: start_line,
                content: content.to_owned(),
                chunk_type: ChunkType::Lines,
                language: detect_language(std::path::Path::new(path)),
                metadata: ChunkMetadata::default(),
            },
            vector_score: vector,
            keyword_score: 0.0,
            hybrid_score: hybrid,
        }
    }

    fn sample() -> Vec<SearchResult> {
        vec![
            hit("notes.md", 900, "unrelated prose about gardening", 0.2, 0.03),
            hit("auth.py", 1, "def parse token(raw): return decode(raw)", 0.8, 0.02),
            hit("util.py", 400, "def helper(): pass", 0.4, 0.01),
        ]
    }

    #[test]
    fn features_follow_definitions() {
        let r = hit("src/main.rs", 250, &"x".repeat(400), 0.6, 0.0);
        let f = relevance_features("parse token", &r, 200);
        assert!(f["exact_match"].abs() < f32::EPSILON);
        assert!((f["position_bonus"] - 0.75).abs() < 1e-6);
        assert!((f["length_bonus"] - 0.5).abs() < 1e-6);
        assert!((f["file_type_bonus"] - 1.0).abs() < f32::EPSILON);
        assert!((f["vector_score"] - 0.6).abs() < f32::EPSILON);

        let md = hit("README.md", 5000, "", 0.0, 0.0);
        let f = relevance_features("parse", &md, 200);
        assert!(f["position_bonus"].abs() < f32::EPSILON);
        assert!(f["length_bonus"].abs() < f32::EPSILON);
        assert!((f["file_type_bonus"] - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn keyword_density_counts_query_words() {
        let r = hit("a.py", 1, "Parse the TOKEN now", 0.0, 0.0);
        let f = relevance_features("parse token header", &r, 200);
        assert!((f["keyword_density"] - 2.0 / 3.0).abs() < 1e-6);
        assert!(f["exact_match"].abs() < f32::EPSILON);
        let f = relevance_features("the token", &r, 200);
        assert!((f["exact_match"] - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn feature_based_prefers_matching_code() {
        let reranker = Reranker::new(RerankConfig::default());
        let out = reranker
            .rerank("parse token", sample(), 10, RerankMethod::FeatureBased)
            .await;
        assert_eq!(out[0].result.chunk.file_path, "auth.py");
        assert_eq!(out[0].method, RerankMethod::FeatureBased);
        let expected = weighted_feature_score(&out[0].features);
        assert!((out[0].rerank_score - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn basic_keeps_retrieval_order() {
        let reranker = Reranker::new(RerankConfig::default());
        let out = reranker
            .rerank("parse token", sample(), 2, RerankMethod::Basic)
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].result.chunk.file_path, "notes.md");
        assert!((out[0].rerank_score - 0.03).abs() < f32::EPSILON);
        assert_eq!(out[0].features.len(), 3);
    }

    #[tokio::test]
    async fn missing_scorer_degrades_to_basic() {
        let reranker = Reranker::new(RerankConfig::default());
        let out = reranker
            .rerank("parse token", sample(), 10, RerankMethod::CrossEncoder)
            .await;
        assert!(out.iter().all(|r| r.method == RerankMethod::Basic));
        assert!((out[0].rerank_score - out[0].result.hybrid_score).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn cross_encoder_scores_directly() {
        let reranker = Reranker::new(RerankConfig::default())
            .with_scorer(Arc::new(MockRelevanceScorer::default()));
        let out = reranker
            .rerank("parse token", sample(), 10, RerankMethod::CrossEncoder)
            .await;
        assert_eq!(out[0].result.chunk.file_path, "auth.py");
        assert!((out[0].rerank_score - 1.0).abs() < f32::EPSILON);
        assert_eq!(out[0].features["cross_encoder_score"], out[0].rerank_score);
    }

    #[tokio::test]
    async fn single_result_is_not_rescored_by_models() {
        let reranker = Reranker::new(RerankConfig::default())
            .with_scorer(Arc::new(MockRelevanceScorer::default()));
        let out = reranker
            .rerank("parse", vec![sample().remove(1)], 10, RerankMethod::CrossEncoder)
            .await;
        assert_eq!(out[0].method, RerankMethod::Basic);
    }

    #[tokio::test]
    async fn semantic_similarity_uses_embeddings() {
        let reranker = Reranker::new(RerankConfig::default())
            .with_embedder(Arc::new(MockEmbedder::default()));
        let out = reranker
            .rerank("unrelated gardening", sample(), 10, RerankMethod::SemanticSimilarity)
            .await;
        assert_eq!(out[0].result.chunk.file_path, "notes.md");
        assert_eq!(out[0].method, RerankMethod::SemanticSimilarity);
        assert!(out[0].features.contains_key("semantic_similarity"));
    }

    #[tokio::test]
    async fn hybrid_with_features_only_equals_feature_score() {
        let reranker = Reranker::new(RerankConfig::default());
        let hybrid = reranker
            .rerank("parse token", sample(), 10, RerankMethod::Hybrid)
            .await;
        let features = reranker
            .rerank("parse token", sample(), 10, RerankMethod::FeatureBased)
            .await;
        for (h, f) in hybrid.iter().zip(&features) {
            assert_eq!(h.result.chunk.id, f.result.chunk.id);
            assert!((h.rerank_score - f.rerank_score).abs() < 1e-6);
            assert_eq!(h.method, RerankMethod::Hybrid);
        }
    }

    #[tokio::test]
    async fn hybrid_weights_all_signals() {
        let reranker = Reranker::new(RerankConfig::default())
            .with_scorer(Arc::new(MockRelevanceScorer::default()))
            .with_embedder(Arc::new(MockEmbedder::default()));
        let out = reranker
            .rerank("parse token", sample(), 10, RerankMethod::Hybrid)
            .await;
        for r in &out {
            let f = &r.features;
            let expected = 0.4 * f["cross_encoder_score"]
                + 0.3 * f["semantic_similarity"]
                + 0.3 * weighted_feature_score(f);
            assert!((r.rerank_score - expected).abs() < 1e-5);
        }
        assert_eq!(out[0].result.chunk.file_path, "auth.py");
    }

    #[tokio::test]
    async fn failing_signal_sends_hybrid_to_basic() {
        let reranker = Reranker::new(RerankConfig::default())
            .with_scorer(Arc::new(MockRelevanceScorer { fail: true }));
        let out = reranker
            .rerank("parse token", sample(), 10, RerankMethod::Hybrid)
            .await;
        assert!(out.iter().all(|r| r.method == RerankMethod::Basic));
        assert_eq!(out[0].result.chunk.file_path, "notes.md");
    }

    #[tokio::test]
    async fn slow_embedder_times_out_to_basic() {
        let reranker = Reranker::new(RerankConfig {
            timeout: Duration::from_millis(10),
            ..RerankConfig::default()
        })
        .with_embedder(Arc::new(
            MockEmbedder::default().with_delay(Duration::from_millis(200)),
        ));
        let out = reranker
            .rerank("parse", sample(), 10, RerankMethod::SemanticSimilarity)
            .await;
        assert!(out.iter().all(|r| r.method == RerankMethod::Basic));
    }

    #[tokio::test]
    async fn empty_input_and_zero_top_k() {
        let reranker = Reranker::new(RerankConfig::default());
        assert!(reranker.rerank("q", Vec::new(), 5, RerankMethod::Hybrid).await.is_empty());
        assert!(reranker.rerank("q", sample(), 0, RerankMethod::Hybrid).await.is_empty());
    }

    #[test]
    fn confidence_shrinks_with_result_count() {
        assert!((confidence(1.0, 0) - 1.0).abs() < 1e-6);
        assert!((confidence(1.0, 100) - 0.7).abs() < 1e-6);
        assert!((confidence(1.0, 500) - 0.7).abs() < 1e-6);
        assert!(confidence(0.8, 10) > confidence(0.8, 50));
        assert!((confidence(0.0, 3) - 0.1).abs() < f32::EPSILON);
        assert!((confidence(f32::NAN, 3) - 0.1).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn explanation_lists_strong_signals() {
        let reranker = Reranker::new(RerankConfig::default());
        let out = reranker
            .rerank("parse token", sample(), 10, RerankMethod::FeatureBased)
            .await;
        let explanation = reranker.explain(&out[0]);
        assert_eq!(explanation.final_score, out[0].rerank_score);
        assert!(
            explanation
                .reasoning
                .contains(&"Preferred file type (code)".to_owned())
        );
        assert!(
            explanation
                .reasoning
                .contains(&"High vector similarity".to_owned())
        );
        assert!(
            explanation
                .reasoning
                .contains(&"Contains exact query match".to_owned())
        );
        assert!(
            !explanation
                .reasoning
                .contains(&"High keyword density".to_owned())
        );
    }

    fn reranked(path: &str, content: &str, score: f32) -> RerankedResult {
        let result = hit(path, 1, content, 0.0, score);
        basic(result, 3)
    }

    #[tokio::test]
    async fn diversify_drops_near_duplicates() {
        let reranker = Reranker::new(RerankConfig::default());
        let results = vec![
            reranked("a.py", "def load config from path", 0.9),
            reranked("b.py", "def load config from path", 0.8),
            reranked("c.py", "totally different words here", 0.7),
        ];
        let out = reranker.diversify(results, 0.7, 10).await;
        let paths: Vec<&str> = out.iter().map(|r| r.result.chunk.file_path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "c.py"]);
    }

    #[tokio::test]
    async fn diversify_respects_max_results() {
        let reranker = Reranker::new(RerankConfig::default());
        let results = vec![
            reranked("a.py", "alpha", 0.9),
            reranked("b.py", "beta", 0.8),
            reranked("c.py", "gamma", 0.7),
        ];
        assert_eq!(reranker.diversify(results, 0.7, 2).await.len(), 2);
    }

    #[tokio::test]
    async fn diversify_with_embeddings_and_fallback() {
        let results = vec![
            reranked("a.py", "load config path", 0.9),
            reranked("b.py", "path config load", 0.8),
            reranked("c.py", "render template", 0.7),
        ];
        let with_embedder = Reranker::new(RerankConfig::default())
            .with_embedder(Arc::new(MockEmbedder::default()));
        assert_eq!(with_embedder.diversify(results.clone(), 0.7, 10).await.len(), 2);

        let failing = Reranker::new(RerankConfig::default())
            .with_embedder(Arc::new(MockEmbedder::failing()));
        assert_eq!(failing.diversify(results, 0.7, 10).await.len(), 2);
    }

    #[tokio::test]
    async fn diversify_single_result_untouched() {
        let reranker = Reranker::new(RerankConfig::default());
        let one = vec![reranked("a.py", "x", 0.5)];
        assert_eq!(reranker.diversify(one.clone(), 0.0, 1).await, one);
    }

    #[tokio::test]
    async fn diversify_with_zero_cap_keeps_nothing() {
        let reranker = Reranker::new(RerankConfig::default());
        let results = vec![reranked("a.py", "alpha", 0.9), reranked("b.py", "beta", 0.8)];
        assert!(reranker.diversify(results, 0.7, 0).await.is_empty());
        let one = vec![reranked("a.py", "x", 0.5)];
        assert!(reranker.diversify(one, 0.7, 0).await.is_empty());
    }

    #[test]
    fn method_names_round_trip() {
        for m in [
            RerankMethod::CrossEncoder,
            RerankMethod::SemanticSimilarity,
            RerankMethod::FeatureBased,
            RerankMethod::Hybrid,
            RerankMethod::Basic,
        ] {
            assert_eq!(m.as_str().parse::<RerankMethod>().unwrap(), m);
        }
        assert_eq!("cross-encoder".parse::<RerankMethod>().unwrap(), RerankMethod::CrossEncoder);
        assert!("bogus".parse::<RerankMethod>().is_err());
    }

    proptest! {
        #[test]
        fn confidence_always_bounded(score in proptest::num::f32::ANY, count in 0usize..10_000) {
            let c = confidence(score, count);
            prop_assert!((0.1..=1.0).contains(&c));
        }

        #[test]
        fn diversified_pairs_below_threshold(
            contents in proptest::collection::vec("[a-d]{1,2}( [a-d]{1,2}){0,4}", 2..10),
            threshold in 0.1f32..0.9,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let results: Vec<RerankedResult> = contents
                .iter()
                .enumerate()
                .map(|(i, c)| reranked(&format!("f{i}.py"), c, 1.0))
                .collect();
            let reranker = Reranker::new(RerankConfig::default());
            let out = rt.block_on(reranker.diversify(results.clone(), threshold, 100));
            prop_assert_eq!(&out[0], &results[0]);
            for (i, a) in out.iter().enumerate() {
                for b in out.iter().skip(i + 1) {
                    prop_assert!(
                        jaccard_similarity(&a.result.chunk.content, &b.result.chunk.content) < threshold
                    );
                }
            }
        }
    }
}

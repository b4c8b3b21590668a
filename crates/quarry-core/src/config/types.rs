use std::time::Duration;

use quarry_index::{
    ChangePolicy, ChunkerConfig, IndexerConfig, RerankConfig, RerankMethod, RetrievalConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub vector_store: VectorStoreConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalSection,
    pub rerank: RerankSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Ledger and job database. `":memory:"` keeps everything in process.
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/quarry.db".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Qdrant,
    Memory,
}

impl std::str::FromStr for VectorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown vector backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub backend: VectorBackend,
    /// Qdrant gRPC endpoint.
    pub url: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Qdrant,
            url: "http://localhost:6334".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Any OpenAI-compatible `/embeddings` endpoint.
    #[default]
    OpenAi,
    /// Deterministic offline embedder, available with the `mock` feature.
    Mock,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Requested output dimension for models that support shortening.
    pub dimensions: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::OpenAi,
            base_url: "https://api.openai.com/v1".into(),
            model: "text-embedding-3-small".into(),
            api_key: None,
            dimensions: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size: u64,
    pub batch_size: usize,
    pub vector_size: Option<u64>,
    pub change_policy: ChangePolicy,
    pub embed_timeout_secs: u64,
    pub store_timeout_secs: u64,
    /// Finished jobs older than this are pruned at startup.
    pub job_retention_hours: u64,
    pub chunking: ChunkerConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            max_file_size: 1_048_576,
            batch_size: 64,
            vector_size: None,
            change_policy: ChangePolicy::ContentHash,
            embed_timeout_secs: 30,
            store_timeout_secs: 15,
            job_retention_hours: 24,
            chunking: ChunkerConfig::default(),
        }
    }
}

impl IndexConfig {
    #[must_use]
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            max_file_size: self.max_file_size,
            batch_size: self.batch_size,
            vector_size: self.vector_size,
            change_policy: self.change_policy,
            embed_timeout: Duration::from_secs(self.embed_timeout_secs),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            chunker: self.chunking.clone(),
            ..IndexerConfig::default()
        }
    }

    #[must_use]
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_hours.saturating_mul(3600))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub vector_score_threshold: f32,
    pub rrf_k: usize,
    pub candidate_multiplier: usize,
    pub expand_queries: bool,
    pub max_query_variants: usize,
    pub timeout_secs: u64,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            vector_score_threshold: 0.3,
            rrf_k: 60,
            candidate_multiplier: 2,
            expand_queries: true,
            max_query_variants: 8,
            timeout_secs: 10,
        }
    }
}

impl RetrievalSection {
    #[must_use]
    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            vector_score_threshold: self.vector_score_threshold,
            rrf_k: self.rrf_k,
            candidate_multiplier: self.candidate_multiplier,
            expand_queries: self.expand_queries,
            max_query_variants: self.max_query_variants,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RerankSection {
    pub method: RerankMethod,
    pub diversity_threshold: f32,
    pub max_results: usize,
    pub optimal_length: usize,
    pub timeout_secs: u64,
}

impl Default for RerankSection {
    fn default() -> Self {
        Self {
            method: RerankMethod::Hybrid,
            diversity_threshold: 0.7,
            max_results: 10,
            optimal_length: 200,
            timeout_secs: 10,
        }
    }
}

impl RerankSection {
    #[must_use]
    pub fn rerank_config(&self) -> RerankConfig {
        RerankConfig {
            method: self.method,
            diversity_threshold: self.diversity_threshold,
            max_results: self.max_results,
            optimal_length: self.optimal_length,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

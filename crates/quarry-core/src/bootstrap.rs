//! Builds the indexing core from configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quarry_index::{
    HybridRetriever, IndexCoordinator, KeywordIndexes, RerankMethod, RerankedResult, Reranker,
    SearchError, SqliteStore,
};
use quarry_llm::EmbeddingProvider;
use quarry_llm::openai::OpenAiEmbedder;
use quarry_memory::{InMemoryVectorStore, QdrantOps, VectorStore};
use serde::Serialize;

use crate::config::{Config, EmbeddingBackend, VectorBackend};

/// The wired-up core: indexing, retrieval and re-ranking over shared stores.
pub struct Quarry {
    pub config: Config,
    pub coordinator: IndexCoordinator,
    pub retriever: HybridRetriever,
    pub reranker: Reranker,
    pub store: Arc<dyn VectorStore>,
    pub sqlite: Arc<SqliteStore>,
}

/// Re-ranked search output handed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResponse {
    pub results: Vec<RerankedResult>,
    pub errors: Vec<SearchError>,
}

impl Quarry {
    /// Hybrid search followed by re-ranking and, optionally, diversification.
    ///
    /// `method` defaults to the configured re-rank method.
    pub async fn search(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        expand: bool,
        method: Option<RerankMethod>,
        diversify: bool,
    ) -> RankedResponse {
        let response = self.retriever.search(query, collection, top_k, expand).await;
        let method = method.unwrap_or(self.config.rerank.method);
        let mut results = self
            .reranker
            .rerank(query, response.results, top_k, method)
            .await;
        if diversify {
            let rerank = &self.config.rerank;
            results = self
                .reranker
                .diversify(results, rerank.diversity_threshold, rerank.max_results)
                .await;
        }
        RankedResponse {
            results,
            errors: response.errors,
        }
    }

    /// Fail jobs left `queued` or `processing` by a previous process and
    /// prune finished jobs past the retention window.
    ///
    /// Only the process that owns indexing for this database should call
    /// this: a concurrent indexer's live jobs would be marked failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the job registry cannot be updated.
    pub async fn recover(&self) -> anyhow::Result<()> {
        let recovered = self
            .coordinator
            .recover_interrupted()
            .await
            .context("failed to recover interrupted jobs")?;
        let pruned = self
            .coordinator
            .cleanup_old_jobs(self.config.index.job_retention())
            .await
            .context("failed to prune old jobs")?;
        tracing::debug!(recovered, pruned, "job registry recovered");
        Ok(())
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}

/// Build every component described by `config`.
///
/// The job registry is left untouched; writers call [`Quarry::recover`]
/// before submitting work.
///
/// # Errors
///
/// Returns an error if the config is invalid or a backend cannot be opened.
pub async fn build(config: Config) -> anyhow::Result<Quarry> {
    config.validate()?;

    let sqlite = Arc::new(open_sqlite(&config.storage.sqlite_path).await?);
    let store = create_vector_store(&config)?;
    let embedder = create_embedder(&config)?;
    let keyword = Arc::new(KeywordIndexes::new());

    let coordinator = IndexCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        sqlite.clone(),
        sqlite.clone(),
        Arc::clone(&keyword),
        config.index.indexer_config(),
    );

    let retriever = HybridRetriever::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        keyword,
        config.retrieval.retrieval_config(),
    );
    let reranker = Reranker::new(config.rerank.rerank_config()).with_embedder(embedder);

    tracing::info!(
        sqlite = %config.storage.sqlite_path,
        vector_store = ?config.vector_store.backend,
        embedding = ?config.embedding.provider,
        "quarry initialized"
    );

    Ok(Quarry {
        config,
        coordinator,
        retriever,
        reranker,
        store,
        sqlite,
    })
}

async fn open_sqlite(path: &str) -> anyhow::Result<SqliteStore> {
    if path != ":memory:"
        && let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    SqliteStore::open(path)
        .await
        .with_context(|| format!("failed to open sqlite database {path}"))
}

/// # Errors
///
/// Returns an error if the Qdrant client cannot be created.
pub fn create_vector_store(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.vector_store.backend {
        VectorBackend::Memory => Ok(Arc::new(InMemoryVectorStore::new())),
        VectorBackend::Qdrant => {
            let url = &config.vector_store.url;
            let ops = QdrantOps::new(url).context("failed to create qdrant client")?;
            Ok(Arc::new(ops))
        }
    }
}

/// # Errors
///
/// Returns an error if the provider cannot be built or is not compiled in.
pub fn create_embedder(config: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let embedding = &config.embedding;
    match embedding.provider {
        EmbeddingBackend::OpenAi => {
            let embedder = OpenAiEmbedder::new(
                embedding.base_url.clone(),
                embedding.model.clone(),
                Duration::from_secs(embedding.timeout_secs),
            )
            .context("failed to build embedding client")?
            .with_api_key(embedding.api_key.clone())
            .with_dimensions(embedding.dimensions);
            Ok(Arc::new(embedder))
        }
        EmbeddingBackend::Mock => mock_embedder(config),
    }
}

#[cfg(any(test, feature = "mock"))]
fn mock_embedder(config: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let dimension = config
        .index
        .vector_size
        .and_then(|d| usize::try_from(d).ok())
        .unwrap_or(64);
    Ok(Arc::new(quarry_llm::mock::MockEmbedder::new(dimension)))
}

#[cfg(not(any(test, feature = "mock")))]
fn mock_embedder(_config: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    anyhow::bail!("the mock embedding provider requires the `mock` feature")
}

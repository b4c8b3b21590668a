//! Repository indexing core.
//!
//! Source files are split into identity-stable chunks, embedded and stored
//! in a vector store. A change ledger keeps re-indexing incremental, a
//! per-collection job queue serializes writers, and search fuses vector and
//! BM25 hits before an optional re-ranking pass.

pub mod chunker;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod expansion;
pub mod fusion;
pub mod jobs;
pub mod keyword;
pub mod languages;
pub mod points;
pub mod rerank;
pub mod retriever;
pub mod store;
pub mod tracker;

pub use chunker::{Chunk, ChunkMetadata, ChunkType, ChunkerConfig, TokenEstimator, chunk_file};
pub use coordinator::{ChangeEvent, IndexCoordinator, IndexerConfig, IndexingStats};
pub use error::{IndexError, Result};
pub use jobs::{
    InMemoryJobRegistry, IndexReport, IndexingJob, JobRegistry, JobStatus, JobType,
};
pub use keyword::KeywordIndexes;
pub use languages::{Lang, detect_language};
pub use quarry_memory::BoxFuture;
pub use rerank::{RankingExplanation, RerankConfig, RerankMethod, RerankedResult, Reranker};
pub use retriever::{HybridRetriever, RetrievalConfig, SearchError, SearchResponse, SearchResult};
pub use store::SqliteStore;
pub use tracker::{
    ChangePolicy, ChangeStatus, ChangeTracker, FileIndexRecord, InMemoryLedger, LedgerStore,
    LedgerSummary,
};

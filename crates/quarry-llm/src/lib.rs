//! Embedding and relevance-scoring providers consumed by the indexing core.

pub mod error;
pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod openai;
pub mod provider;

pub use error::LlmError;
pub use provider::{BoxFuture, EmbeddingProvider, RelevanceScorer};

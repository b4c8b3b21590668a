use std::future::Future;
use std::pin::Pin;

use crate::error::{LlmError, Result};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Batch text → vector capability.
///
/// Every vector returned by one provider has the same dimension, and the
/// output order matches the input order.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Embed a batch of texts.
    fn embed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;

    /// Embed a single text.
    fn embed_one(&self, text: &str) -> BoxFuture<'_, Result<Vec<f32>>> {
        let batch = self.embed(vec![text.to_owned()]);
        Box::pin(async move {
            batch
                .await?
                .into_iter()
                .next()
                .ok_or(LlmError::EmptyResponse {
                    provider: "embedding",
                })
        })
    }
}

/// Query/document relevance model (cross-encoder style).
///
/// Returns one score per document, in input order. Higher is more relevant.
pub trait RelevanceScorer: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, query: &str, documents: Vec<String>) -> BoxFuture<'_, Result<Vec<f32>>>;
}

//! Deterministic providers for tests and offline runs.
//!
//! `MockEmbedder` hashes lowercase word tokens into a fixed number of buckets
//! and L2-normalizes the counts, so texts sharing words have positive cosine
//! similarity and identical texts always map to identical vectors.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{LlmError, Result};
use crate::provider::{BoxFuture, EmbeddingProvider, RelevanceScorer};

#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimension: usize,
    pub fail: bool,
    /// Fail only the n-th call (0-based).
    pub fail_on_call: Option<usize>,
    pub delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            dimension: 64,
            fail: false,
            fail_on_call: None,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn fail_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `embed` calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (fnv1a(&token) % self.dimension as u64) as usize;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        "mock"
    }

    fn embed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail || self.fail_on_call == Some(call) {
                return Err(LlmError::Other("mock embedding error".into()));
            }
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        })
    }
}

/// Scores a document by the share of query words it contains.
#[derive(Debug, Clone, Default)]
pub struct MockRelevanceScorer {
    pub fail: bool,
}

impl RelevanceScorer for MockRelevanceScorer {
    fn name(&self) -> &str {
        "mock"
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, query: &str, documents: Vec<String>) -> BoxFuture<'_, Result<Vec<f32>>> {
        let query_tokens: Vec<String> = tokens(query).collect();
        Box::pin(async move {
            if self.fail {
                return Err(LlmError::Unavailable);
            }
            if query_tokens.is_empty() {
                return Ok(vec![0.0; documents.len()]);
            }
            Ok(documents
                .iter()
                .map(|doc| {
                    let doc_tokens: std::collections::HashSet<String> = tokens(doc).collect();
                    let hits = query_tokens
                        .iter()
                        .filter(|t| doc_tokens.contains(*t))
                        .count();
                    hits as f32 / query_tokens.len() as f32
                })
                .collect())
        })
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

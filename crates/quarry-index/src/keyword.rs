//! BM25 keyword index and the per-collection cache of them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use quarry_memory::{VectorStore, VectorStoreError};

use crate::chunker::Chunk;
use crate::points::chunk_from_payload;

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// Lowercase `[A-Za-z0-9_]+` runs.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

#[derive(Debug)]
struct Document {
    id: String,
    len: usize,
    tf: HashMap<String, usize>,
}

/// Okapi BM25 over an immutable document set.
#[derive(Debug, Default)]
pub struct Bm25Index {
    docs: Vec<Document>,
    df: HashMap<String, usize>,
    avgdl: f64,
}

impl Bm25Index {
    #[must_use]
    pub fn build<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let mut docs = Vec::new();
        let mut df: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for (id, text) in documents {
            let tokens = tokenize(text.as_ref());
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_default() += 1;
            }
            for term in tf.keys() {
                *df.entry(term.clone()).or_default() += 1;
            }
            total_len += tokens.len();
            docs.push(Document {
                id: id.as_ref().to_owned(),
                len: tokens.len(),
                tf,
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let avgdl = if docs.is_empty() {
            0.0
        } else {
            total_len as f64 / docs.len() as f64
        };
        Self { docs, df, avgdl }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    #[allow(clippy::cast_precision_loss)]
    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.df.get(term).copied().unwrap_or(0) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Top `top_k` documents by BM25 score, best first. Only positive scores
    /// are returned; ties keep insertion order.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn query(&self, text: &str, top_k: usize) -> Vec<(String, f32)> {
        let mut terms = tokenize(text);
        terms.sort();
        terms.dedup();
        if terms.is_empty() || self.docs.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let idf: Vec<(&str, f64)> = terms.iter().map(|t| (t.as_str(), self.idf(t))).collect();
        let avgdl = self.avgdl.max(f64::EPSILON);

        let mut scored: Vec<(usize, f64)> = self
            .docs
            .iter()
            .enumerate()
            .filter_map(|(idx, doc)| {
                let norm = K1 * (1.0 - B + B * doc.len as f64 / avgdl);
                let score: f64 = idf
                    .iter()
                    .filter_map(|(term, idf)| {
                        let tf = *doc.tf.get(*term)? as f64;
                        Some(idf * tf * (K1 + 1.0) / (tf + norm))
                    })
                    .sum();
                (score > 0.0).then_some((idx, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);
        scored
            .into_iter()
            .map(|(idx, score)| (self.docs[idx].id.clone(), score as f32))
            .collect()
    }
}

/// A collection's keyword index plus the chunks it was built from.
#[derive(Debug, Default)]
pub struct CollectionIndex {
    pub bm25: Bm25Index,
    pub chunks: HashMap<String, Chunk>,
}

impl CollectionIndex {
    #[must_use]
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        let bm25 = Bm25Index::build(chunks.iter().map(|c| (c.id.as_str(), c.content.as_str())));
        let chunks = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self { bm25, chunks }
    }

    /// BM25 hits joined with their chunks.
    #[must_use]
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(Chunk, f32)> {
        self.bm25
            .query(query, top_k)
            .into_iter()
            .filter_map(|(id, score)| Some((self.chunks.get(&id)?.clone(), score)))
            .collect()
    }
}

/// Lazily built keyword indexes, one per collection.
///
/// Indexes are rebuilt from the vector store's payloads, so they survive
/// restarts without separate persistence. Indexing jobs call
/// [`KeywordIndexes::invalidate`] after writing to a collection.
#[derive(Debug, Default)]
pub struct KeywordIndexes {
    state: RwLock<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    indexes: HashMap<String, Arc<CollectionIndex>>,
    // Bumped on every invalidation. A rebuild is cached only if the
    // generation it started under is still current.
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, collection: &str) -> u64 {
        self.generations.get(collection).copied().unwrap_or(0)
    }
}

impl KeywordIndexes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self, collection: &str) {
        if let Ok(mut state) = self.state.write() {
            state.indexes.remove(collection);
            *state.generations.entry(collection.to_owned()).or_default() += 1;
        }
    }

    #[must_use]
    pub fn is_cached(&self, collection: &str) -> bool {
        self.state
            .read()
            .is_ok_and(|state| state.indexes.contains_key(collection))
    }

    /// Cached index for `collection`, building it from the store on a miss.
    ///
    /// A build that overlaps an invalidation is returned to the caller but
    /// not cached, so writes finished during the scroll are seen by the
    /// next search.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scrolled.
    pub async fn get_or_build(
        &self,
        collection: &str,
        store: &dyn VectorStore,
    ) -> Result<Arc<CollectionIndex>, VectorStoreError> {
        let started = match self.state.read() {
            Ok(state) => {
                if let Some(index) = state.indexes.get(collection) {
                    return Ok(Arc::clone(index));
                }
                Some(state.generation(collection))
            }
            Err(_) => None,
        };

        if !store.collection_exists(collection).await? {
            return Ok(Arc::new(CollectionIndex::default()));
        }
        let points = store.scroll_all(collection).await?;
        let chunks: Vec<Chunk> = points
            .iter()
            .filter_map(|p| chunk_from_payload(&p.payload))
            .collect();
        let index = Arc::new(CollectionIndex::from_chunks(chunks));

        if let Some(started) = started
            && let Ok(mut state) = self.state.write()
        {
            if state.generation(collection) == started {
                state.indexes.insert(collection.to_owned(), Arc::clone(&index));
                tracing::debug!(
                    collection,
                    documents = index.bm25.len(),
                    "keyword index rebuilt"
                );
            } else {
                tracing::debug!(collection, "collection changed during rebuild, not caching");
            }
        }
        Ok(index)
    }
}

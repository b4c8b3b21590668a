use std::str::FromStr;

use super::Config;

/// Parse `key` into `target`, keeping the current value on bad input.
fn parse_into<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(v) = std::env::var(key) {
        match v.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("ignoring invalid {key} value: {v}"),
        }
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUARRY_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }

        parse_into("QUARRY_VECTOR_BACKEND", &mut self.vector_store.backend);
        if let Ok(v) = std::env::var("QUARRY_QDRANT_URL") {
            self.vector_store.url = v;
        }

        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v).filter(|k| !k.is_empty());
        }

        parse_into("QUARRY_INDEX_BATCH_SIZE", &mut self.index.batch_size);
        parse_into("QUARRY_INDEX_MAX_FILE_SIZE", &mut self.index.max_file_size);
        parse_into("QUARRY_INDEX_CHANGE_POLICY", &mut self.index.change_policy);
        parse_into("QUARRY_CHUNK_MAX_TOKENS", &mut self.index.chunking.max_tokens);

        parse_into(
            "QUARRY_RETRIEVAL_SCORE_THRESHOLD",
            &mut self.retrieval.vector_score_threshold,
        );
        parse_into("QUARRY_RETRIEVAL_EXPAND", &mut self.retrieval.expand_queries);

        parse_into("QUARRY_RERANK_METHOD", &mut self.rerank.method);
        parse_into(
            "QUARRY_RERANK_DIVERSITY_THRESHOLD",
            &mut self.rerank.diversity_threshold,
        );
    }
}

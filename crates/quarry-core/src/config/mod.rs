mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values the components cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.index.batch_size == 0 {
            bail!("index.batch_size must be greater than zero");
        }
        if self.index.vector_size == Some(0) {
            bail!("index.vector_size must be greater than zero");
        }
        if self.index.chunking.max_tokens == 0 {
            bail!("index.chunking.max_tokens must be greater than zero");
        }
        if self.index.chunking.sentence_overlap >= self.index.chunking.sentences_per_chunk {
            bail!("index.chunking.sentence_overlap must be smaller than sentences_per_chunk");
        }
        if self.index.chunking.window_overlap >= self.index.chunking.window_lines {
            bail!("index.chunking.window_overlap must be smaller than window_lines");
        }
        if self.retrieval.rrf_k == 0 {
            bail!("retrieval.rrf_k must be greater than zero");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.vector_score_threshold) {
            bail!("retrieval.vector_score_threshold must be within [-1, 1]");
        }
        if !(0.0..=1.0).contains(&self.rerank.diversity_threshold) {
            bail!("rerank.diversity_threshold must be within [0, 1]");
        }
        if self.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

//! Token budget: split oversized chunks along line boundaries.

use serde::{Deserialize, Serialize};

use super::Chunk;

/// How chunk size is estimated in tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenEstimator {
    /// One token per four characters, rounded up.
    #[default]
    Chars,
    /// One token per whitespace-separated word.
    Words,
}

impl TokenEstimator {
    #[must_use]
    pub fn estimate(self, text: &str) -> usize {
        match self {
            Self::Chars => text.chars().count().div_ceil(4),
            Self::Words => text.split_whitespace().count(),
        }
    }
}

impl std::str::FromStr for TokenEstimator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chars" => Ok(Self::Chars),
            "words" => Ok(Self::Words),
            other => Err(format!("unknown token estimator: {other}")),
        }
    }
}

/// Replace every chunk over `max_tokens` with sequential sub-chunks.
///
/// Sub-chunk ids append `_sub_{n}` to the parent id and carry the parent id
/// in `metadata.parent_chunk`. A single line longer than the budget is kept
/// whole.
#[must_use]
pub fn enforce_token_budget(
    chunks: Vec<Chunk>,
    max_tokens: usize,
    estimator: TokenEstimator,
) -> Vec<Chunk> {
    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if estimator.estimate(&chunk.content) <= max_tokens {
            out.push(chunk);
        } else {
            tracing::debug!(chunk = %chunk.id, max_tokens, "splitting oversized chunk");
            split(&chunk, max_tokens, estimator, &mut out);
        }
    }
    out
}

fn split(parent: &Chunk, max_tokens: usize, estimator: TokenEstimator, out: &mut Vec<Chunk>) {
    let mut current = String::new();
    let mut current_start = 0usize;
    let mut sub = 0usize;

    let mut emit = |text: &str, first: usize, last: usize| {
        if text.trim().is_empty() {
            return;
        }
        let mut metadata = parent.metadata.clone();
        metadata.parent_chunk = Some(parent.id.clone());
        out.push(Chunk {
            id: format!("{}_sub_{sub}", parent.id),
            file_path: parent.file_path.clone(),
            start_line: parent.start_line + first,
            end_line: parent.start_line + last,
            content: text.to_owned(),
            chunk_type: parent.chunk_type,
            language: parent.language,
            metadata,
        });
        sub += 1;
    };

    let lines: Vec<&str> = parent.content.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        if idx == 0 {
            current.push_str(line);
            continue;
        }
        let candidate_len = estimator.estimate(&format!("{current}\n{line}"));
        if candidate_len > max_tokens {
            emit(&current, current_start, idx - 1);
            current.clear();
            current.push_str(line);
            current_start = idx;
        } else {
            current.push('\n');
            current.push_str(line);
        }
    }
    if !lines.is_empty() {
        emit(&current, current_start, lines.len() - 1);
    }
}

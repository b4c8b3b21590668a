//! Language-aware chunking with deterministic chunk ids.
//!
//! Each language maps to a primary [`ChunkStrategy`]. A strategy either
//! produces chunks or fails with a [`ChunkError`], in which case the
//! dispatcher moves on to the strategy's fallback. Whatever survives is then
//! passed through the token budget, which splits oversized chunks along line
//! boundaries.

mod brace;
mod budget;
mod keys;
mod markdown;
mod python;
mod text;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::languages::{Lang, detect_language};

pub use budget::{TokenEstimator, enforce_token_budget};

/// Kind of structural unit a chunk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Class,
    Section,
    Semantic,
    Lines,
    Paragraph,
    File,
}

impl ChunkType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Section => "section",
            Self::Semantic => "semantic",
            Self::Lines => "lines",
            Self::Paragraph => "paragraph",
            Self::File => "file",
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional descriptive fields attached to a chunk. Empty fields are not
/// serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_async: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_number: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_chunk: Option<String>,
}

/// A contiguous, identity-stable slice of a file.
///
/// Line numbers are 1-based and inclusive. The id is derived only from the
/// file path, the symbol name or ordinal, and the line range, so chunking the
/// same content twice yields the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub chunk_type: ChunkType,
    pub language: Lang,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// BLAKE3 hex digest of the chunk content.
    #[must_use]
    pub fn content_hash(&self) -> String {
        blake3_hex(&self.content)
    }
}

/// Strategy-level failure. Consumed by the dispatcher's fallback chain and
/// never returned from [`chunk_file`].
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("no structural units found")]
    NoStructure,
    #[error("sentence boundaries unavailable")]
    NoSentenceBoundaries,
    #[error("document root is not a mapping")]
    NotAMapping,
}

/// The fixed set of chunking strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Top-level definitions from a syntax tree (Python).
    Syntax,
    /// Declarations delimited by matching braces (JavaScript, TypeScript).
    Brace,
    /// Heading-delimited sections (Markdown, plain text).
    Sections,
    /// One chunk per top-level key (YAML, JSON).
    ConfigKeys,
    /// Overlapping groups of sentences.
    Prose,
    /// Overlapping fixed-size line windows.
    Lines,
}

impl ChunkStrategy {
    /// Strategy to try when this one fails.
    #[must_use]
    pub fn fallback(self) -> Option<Self> {
        match self {
            Self::Syntax | Self::Brace => Some(Self::Prose),
            Self::ConfigKeys | Self::Prose => Some(Self::Lines),
            Self::Sections | Self::Lines => None,
        }
    }

    fn apply(self, source: &Source<'_>, config: &ChunkerConfig) -> Result<Vec<Chunk>, ChunkError> {
        match self {
            Self::Syntax => python::chunk(source, config),
            Self::Brace => brace::chunk(source),
            Self::Sections => Ok(markdown::chunk(source, config)),
            Self::ConfigKeys => keys::chunk(source),
            Self::Prose => text::chunk_sentences(source, config),
            Self::Lines => text::chunk_lines(source, config),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Brace => "brace",
            Self::Sections => "sections",
            Self::ConfigKeys => "config_keys",
            Self::Prose => "prose",
            Self::Lines => "lines",
        }
    }
}

/// Chunker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Token ceiling per chunk before line-wise splitting (default: 512).
    pub max_tokens: usize,
    /// Lines of context added around syntax-tree definitions (default: 3).
    pub context_lines: usize,
    /// Heading sections shorter than this many characters are dropped (default: 50).
    pub min_section_chars: usize,
    pub sentences_per_chunk: usize,
    pub sentence_overlap: usize,
    pub window_lines: usize,
    pub window_overlap: usize,
    pub token_estimator: TokenEstimator,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            context_lines: 3,
            min_section_chars: 50,
            sentences_per_chunk: 3,
            sentence_overlap: 1,
            window_lines: 50,
            window_overlap: 5,
            token_estimator: TokenEstimator::Chars,
        }
    }
}

/// Chunk a file. Never fails: structured strategies degrade to less
/// structured ones, and whitespace-only content yields no chunks.
#[must_use]
pub fn chunk_file(file_path: &str, content: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let lang = detect_language(Path::new(file_path));
    let source = Source::new(file_path, content, lang);
    let mut strategy = lang.strategy();

    let chunks = loop {
        match strategy.apply(&source, config) {
            Ok(chunks) => break chunks,
            Err(e) => {
                let Some(next) = strategy.fallback() else {
                    tracing::warn!(file = file_path, strategy = strategy.as_str(), "chunking failed: {e}");
                    break Vec::new();
                };
                tracing::debug!(
                    file = file_path,
                    from = strategy.as_str(),
                    to = next.as_str(),
                    "chunking fallback: {e}"
                );
                strategy = next;
            }
        }
    };

    enforce_token_budget(chunks, config.max_tokens, config.token_estimator)
}

/// File content split into lines, shared by all strategies.
pub(crate) struct Source<'a> {
    pub path: &'a str,
    pub text: &'a str,
    pub lang: Lang,
    pub lines: Vec<&'a str>,
    /// Byte offset where each line starts; the first entry is always 0.
    pub line_starts: Vec<usize>,
}

impl<'a> Source<'a> {
    pub(crate) fn new(path: &'a str, text: &'a str, lang: Lang) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            path,
            text,
            lang,
            lines: text.lines().collect(),
            line_starts,
        }
    }

    /// 1-based line containing the byte at `offset`.
    ///
    /// `offset` is a byte offset into `text`, as produced by regex and
    /// markdown parser ranges. It need not fall on a char boundary; offsets
    /// past the end resolve to the last line start.
    pub(crate) fn line_at(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }

    /// Lines `start..=end` (1-based) joined with `\n`.
    pub(crate) fn slice(&self, start: usize, end: usize) -> String {
        let end = end.min(self.lines.len());
        if start == 0 || start > end {
            return String::new();
        }
        self.lines[start - 1..end].join("\n")
    }

    /// Move `end` up past trailing blank lines, never above `start`.
    pub(crate) fn trim_end(&self, start: usize, mut end: usize) -> usize {
        end = end.min(self.lines.len());
        while end > start && self.lines[end - 1].trim().is_empty() {
            end -= 1;
        }
        end
    }

    pub(crate) fn chunk(
        &self,
        id: String,
        (start_line, end_line): (usize, usize),
        chunk_type: ChunkType,
        metadata: ChunkMetadata,
    ) -> Chunk {
        Chunk {
            id,
            file_path: self.path.to_owned(),
            start_line,
            end_line,
            content: self.slice(start_line, end_line),
            chunk_type,
            language: self.lang,
            metadata,
        }
    }
}

pub(crate) fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

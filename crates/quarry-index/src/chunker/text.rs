//! Unstructured fallbacks: sentence groups and fixed line windows.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::{Chunk, ChunkError, ChunkMetadata, ChunkType, ChunkerConfig, Source};

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("sentence pattern is valid"));

/// Byte ranges of sentences, trimmed, in document order.
fn sentences(text: &str) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        let punct = m.as_str().trim_end().len();
        push_trimmed(text, start..m.start() + punct, &mut out);
        start = m.end();
    }
    push_trimmed(text, start..text.len(), &mut out);
    out
}

fn push_trimmed(text: &str, range: Range<usize>, out: &mut Vec<Range<usize>>) {
    let slice = &text[range.clone()];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead + trail < slice.len() {
        out.push(range.start + lead..range.end - trail);
    }
}

/// Overlapping groups of sentences. Unavailable for source code and for text
/// with fewer than two sentences.
pub(super) fn chunk_sentences(
    src: &Source<'_>,
    config: &ChunkerConfig,
) -> Result<Vec<Chunk>, ChunkError> {
    if src.lang.is_code() {
        return Err(ChunkError::NoSentenceBoundaries);
    }
    let spans = sentences(src.text);
    if spans.len() < 2 {
        return Err(ChunkError::NoSentenceBoundaries);
    }

    let size = config.sentences_per_chunk.max(1);
    let step = size.saturating_sub(config.sentence_overlap).max(1);
    let mut chunks = Vec::new();

    for (ordinal, first) in (0..spans.len()).step_by(step).enumerate() {
        let last = (first + size).min(spans.len());
        let group = &spans[first..last];
        let byte_start = group[0].start;
        let byte_end = group[group.len() - 1].end;

        let start = src.line_at(byte_start);
        let end = src.line_at(byte_end.saturating_sub(1));
        let metadata = ChunkMetadata {
            sentence_count: Some(group.len()),
            chunk_index: Some(ordinal),
            ..ChunkMetadata::default()
        };
        chunks.push(Chunk {
            id: format!("{}:semantic:{ordinal}:{start}-{end}", src.path),
            file_path: src.path.to_owned(),
            start_line: start,
            end_line: end,
            content: src.text[byte_start..byte_end].to_owned(),
            chunk_type: ChunkType::Semantic,
            language: src.lang,
            metadata,
        });

        if last == spans.len() {
            break;
        }
    }
    Ok(chunks)
}

/// Fixed windows of `window_lines` lines overlapping by `window_overlap`.
pub(super) fn chunk_lines(src: &Source<'_>, config: &ChunkerConfig) -> Result<Vec<Chunk>, ChunkError> {
    let total = src.lines.len();
    let window = config.window_lines.max(1);
    let step = window.saturating_sub(config.window_overlap).max(1);
    let mut chunks = Vec::new();

    for (ordinal, offset) in (0..total).step_by(step).enumerate() {
        let start = offset + 1;
        let end = (offset + window).min(total);
        let content = src.slice(start, end);
        if !content.trim().is_empty() {
            let metadata = ChunkMetadata {
                line_count: Some(end - start + 1),
                chunk_index: Some(ordinal),
                ..ChunkMetadata::default()
            };
            let id = format!("{}:lines:{ordinal}:{start}-{end}", src.path);
            chunks.push(src.chunk(id, (start, end), ChunkType::Lines, metadata));
        }
        if end == total {
            break;
        }
    }

    if chunks.is_empty() {
        return Err(ChunkError::NoStructure);
    }
    Ok(chunks)
}

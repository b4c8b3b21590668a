//! Heading-based sectioning for Markdown and plain text.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};

use super::{Chunk, ChunkMetadata, ChunkType, ChunkerConfig, Source};

struct Heading {
    line: usize,
    level: usize,
    title: String,
}

fn headings(src: &Source<'_>) -> Vec<Heading> {
    let mut out = Vec::new();
    let mut current: Option<Heading> = None;

    for (event, range) in Parser::new(src.text).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some(Heading {
                    line: src.line_at(range.start),
                    level: level as usize,
                    title: String::new(),
                });
            }
            Event::Text(t) | Event::Code(t) => {
                if let Some(h) = current.as_mut() {
                    h.title.push_str(&t);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(h) = current.take() {
                    out.push(h);
                }
            }
            _ => {}
        }
    }
    out
}

/// Split on headings (levels 1-6). Text before the first heading becomes a
/// paragraph chunk; sections shorter than `min_section_chars` are dropped.
pub(super) fn chunk(src: &Source<'_>, config: &ChunkerConfig) -> Vec<Chunk> {
    let total = src.lines.len();
    let headings = headings(src);
    let mut chunks = Vec::new();

    let preamble_end = headings.first().map_or(total, |h| h.line - 1);
    if preamble_end >= 1 && !src.slice(1, preamble_end).trim().is_empty() {
        let start = (1..=preamble_end)
            .find(|&l| !src.lines[l - 1].trim().is_empty())
            .unwrap_or(1);
        let end = src.trim_end(start, preamble_end);
        let metadata = ChunkMetadata {
            section_number: Some(0),
            ..ChunkMetadata::default()
        };
        let id = format!("{}:paragraph:0:{start}-{end}", src.path);
        chunks.push(src.chunk(id, (start, end), ChunkType::Paragraph, metadata));
    }

    for (idx, heading) in headings.iter().enumerate() {
        let ordinal = idx + 1;
        let start = heading.line;
        let next = headings.get(idx + 1).map_or(total, |h| h.line - 1);
        let end = src.trim_end(start, next.max(start));

        let content = src.slice(start, end);
        if content.trim().chars().count() < config.min_section_chars {
            tracing::trace!(file = src.path, ordinal, "dropping short section");
            continue;
        }

        let metadata = ChunkMetadata {
            title: Some(heading.title.trim().to_owned()),
            level: Some(heading.level),
            section_number: Some(ordinal),
            ..ChunkMetadata::default()
        };
        let id = format!("{}:section:{ordinal}:{start}-{end}", src.path);
        chunks.push(src.chunk(id, (start, end), ChunkType::Section, metadata));
    }

    chunks
}

//! Declaration chunking for brace-delimited languages (JavaScript, TypeScript).
//!
//! Declarations are found line by line with regular expressions; each one
//! extends to its matching closing brace. Braces inside string literals and
//! comments are not counted.

use std::sync::LazyLock;

use regex::Regex;

use super::{Chunk, ChunkError, ChunkMetadata, ChunkType, Source};

/// Lines to include after a declaration whose block never closes.
const UNCLOSED_SPAN: usize = 5;

struct Pattern {
    regex: Regex,
    kind: &'static str,
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    let ident = r"[A-Za-z_$][\w$]*";
    [
        (
            format!(
                r"^\s*(?:export\s+)?(?:default\s+)?(?P<async>async\s+)?function\s*\*?\s*(?P<name>{ident})"
            ),
            "function",
        ),
        (
            format!(
                r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>{ident})\s*(?::[^=]+)?=\s*(?P<async>async\s+)?(?:function\b|\([^)]*\)\s*(?::\s*[^=]+)?=>|{ident}\s*=>)"
            ),
            "function",
        ),
        (
            format!(r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>{ident})"),
            "class",
        ),
        (
            format!(r"^\s*(?:export\s+)?(?:declare\s+)?interface\s+(?P<name>{ident})"),
            "interface",
        ),
        (
            format!(r"^\s*(?:export\s+)?(?:declare\s+)?type\s+(?P<name>{ident})\s*(?:<[^>]*>)?\s*="),
            "type",
        ),
    ]
    .into_iter()
    .map(|(re, kind)| Pattern {
        regex: Regex::new(&re).expect("declaration pattern is valid"),
        kind,
    })
    .collect()
});

struct Declaration<'a> {
    line: usize,
    name: &'a str,
    kind: &'static str,
    signature: &'a str,
    is_async: bool,
}

fn declaration_at<'a>(line_no: usize, line: &'a str) -> Option<Declaration<'a>> {
    PATTERNS.iter().find_map(|p| {
        let caps = p.regex.captures(line)?;
        Some(Declaration {
            line: line_no,
            name: caps.name("name")?.as_str(),
            kind: p.kind,
            signature: caps.get(0)?.as_str().trim(),
            is_async: caps.name("async").is_some(),
        })
    })
}

pub(super) fn chunk(src: &Source<'_>) -> Result<Vec<Chunk>, ChunkError> {
    let mut chunks = Vec::new();
    let mut covered_until = 0usize;

    for (idx, line) in src.lines.iter().enumerate() {
        let line_no = idx + 1;
        if line_no <= covered_until {
            continue;
        }
        let Some(decl) = declaration_at(line_no, line) else {
            continue;
        };

        let start_offset = src.line_starts.get(idx).copied().unwrap_or(src.text.len());
        let end = match block_end(src.text, start_offset) {
            BlockEnd::Offset(off) => src.line_at(off),
            BlockEnd::BeforeLine(off) => src.line_at(off).saturating_sub(1).max(decl.line),
            BlockEnd::Unclosed => decl.line + UNCLOSED_SPAN,
        }
        .min(src.lines.len());

        let chunk_type = if decl.kind == "function" {
            ChunkType::Function
        } else {
            ChunkType::Class
        };
        let metadata = ChunkMetadata {
            name: Some(decl.name.to_owned()),
            symbol_kind: Some(decl.kind.to_owned()),
            signature: Some(decl.signature.to_owned()),
            is_async: Some(decl.is_async),
            ..ChunkMetadata::default()
        };
        let id = format!(
            "{}:{}:{}:{}-{end}",
            src.path,
            chunk_type.as_str(),
            decl.name,
            decl.line
        );
        chunks.push(src.chunk(id, (decl.line, end), chunk_type, metadata));
        covered_until = end;
    }

    if chunks.is_empty() {
        return Err(ChunkError::NoStructure);
    }
    Ok(chunks)
}

#[derive(Debug, PartialEq, Eq)]
enum BlockEnd {
    /// Byte offset of the closing brace or terminating semicolon.
    Offset(usize),
    /// The declaration ended at a blank line starting at this offset.
    BeforeLine(usize),
    Unclosed,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Code,
    LineComment,
    BlockComment,
    Str(u8),
}

/// Find where the declaration starting at `start` ends.
///
/// Before any brace opens, a `;` or a blank line ends the declaration (type
/// aliases, expression-bodied arrows).
fn block_end(text: &str, start: usize) -> BlockEnd {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut opened = false;
    let mut state = Scan::Code;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            Scan::LineComment => {
                if b == b'\n' {
                    state = Scan::Code;
                    continue;
                }
            }
            Scan::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = Scan::Code;
                    i += 1;
                }
            }
            Scan::Str(quote) => {
                if b == b'\\' {
                    i += 1;
                } else if b == quote || (b == b'\n' && quote != b'`') {
                    state = Scan::Code;
                }
            }
            Scan::Code => match b {
                b'/' if next == Some(b'/') => state = Scan::LineComment,
                b'/' if next == Some(b'*') => {
                    state = Scan::BlockComment;
                    i += 1;
                }
                b'"' | b'\'' | b'`' => state = Scan::Str(b),
                b'{' => {
                    depth += 1;
                    opened = true;
                }
                b'}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        return BlockEnd::Offset(i);
                    }
                }
                b';' if !opened => return BlockEnd::Offset(i),
                b'\n' if !opened && blank_line_follows(bytes, i + 1) => {
                    return BlockEnd::BeforeLine(i + 1);
                }
                _ => {}
            },
        }
        i += 1;
    }
    BlockEnd::Unclosed
}

fn blank_line_follows(bytes: &[u8], from: usize) -> bool {
    bytes[from.min(bytes.len())..]
        .iter()
        .take_while(|&&b| b != b'\n')
        .all(u8::is_ascii_whitespace)
        && from < bytes.len()
}

//! Python chunking over a tree-sitter syntax tree.

use tree_sitter::{Node, Parser};

use super::{Chunk, ChunkError, ChunkMetadata, ChunkType, ChunkerConfig, Source};

/// One chunk per top-level function or class, padded with context lines.
pub(super) fn chunk(src: &Source<'_>, config: &ChunkerConfig) -> Result<Vec<Chunk>, ChunkError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| ChunkError::Parse(format!("set_language failed: {e}")))?;

    let tree = parser
        .parse(src.text, None)
        .ok_or_else(|| ChunkError::Parse(format!("parse failed for {}", src.path)))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(ChunkError::Parse(format!("syntax error in {}", src.path)));
    }

    let mut chunks = Vec::new();
    let child_count = u32::try_from(root.named_child_count()).unwrap_or(u32::MAX);
    for i in 0..child_count {
        let Some(child) = root.named_child(i) else {
            continue;
        };
        if let Some(chunk) = definition_chunk(src, &child, config.context_lines) {
            chunks.push(chunk);
        }
    }

    if chunks.is_empty() {
        return Err(ChunkError::NoStructure);
    }
    Ok(chunks)
}

fn definition_chunk(src: &Source<'_>, node: &Node<'_>, context: usize) -> Option<Chunk> {
    let (definition, decorators) = match node.kind() {
        "function_definition" | "class_definition" => (*node, Vec::new()),
        "decorated_definition" => {
            let definition = node.child_by_field_name("definition")?;
            (definition, decorators(node, src.text))
        }
        _ => return None,
    };

    let (chunk_type, kind) = match definition.kind() {
        "function_definition" => (ChunkType::Function, "function"),
        "class_definition" => (ChunkType::Class, "class"),
        _ => return None,
    };

    let name = definition
        .child_by_field_name("name")
        .map_or_else(|| "anonymous".to_owned(), |n| text(&n, src.text).to_owned());

    let first = node.start_position().row + 1;
    let last = node.end_position().row + 1;
    let start = first.saturating_sub(context).max(1);
    let end = (last + context).min(src.lines.len());

    let is_async = (chunk_type == ChunkType::Function).then(|| {
        definition
            .child(0)
            .is_some_and(|c| c.kind() == "async")
    });

    let metadata = ChunkMetadata {
        name: Some(name.clone()),
        symbol_kind: Some(kind.to_owned()),
        docstring: docstring(&definition, src.text),
        decorators,
        arguments: if chunk_type == ChunkType::Function {
            arguments(&definition, src.text)
        } else {
            Vec::new()
        },
        is_async,
        ..ChunkMetadata::default()
    };

    let id = format!("{}:{kind}:{name}:{start}-{end}", src.path);
    Some(src.chunk(id, (start, end), chunk_type, metadata))
}

fn text<'s>(node: &Node<'_>, source: &'s str) -> &'s str {
    &source[node.byte_range()]
}

fn decorators(node: &Node<'_>, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    for i in 0..count {
        if let Some(child) = node.named_child(i)
            && child.kind() == "decorator"
        {
            out.push(text(&child, source).trim().to_owned());
        }
    }
    out
}

fn docstring(definition: &Node<'_>, source: &str) -> Option<String> {
    let body = definition.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let count = u32::try_from(string.named_child_count()).unwrap_or(u32::MAX);
    let content = (0..count)
        .filter_map(|i| string.named_child(i))
        .find(|c| c.kind() == "string_content")
        .map_or("", |c| text(&c, source));
    let doc = content.trim();
    (!doc.is_empty()).then(|| doc.to_owned())
}

fn arguments(definition: &Node<'_>, source: &str) -> Vec<String> {
    let Some(params) = definition.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let count = u32::try_from(params.named_child_count()).unwrap_or(u32::MAX);
    (0..count)
        .filter_map(|i| params.named_child(i))
        .filter_map(|p| parameter_name(&p, source))
        .collect()
}

fn parameter_name(param: &Node<'_>, source: &str) -> Option<String> {
    match param.kind() {
        "identifier" => Some(text(param, source).to_owned()),
        "list_splat_pattern" | "dictionary_splat_pattern" => Some(text(param, source).to_owned()),
        "keyword_separator" | "positional_separator" => None,
        _ => {
            if let Some(name) = param.child_by_field_name("name") {
                return Some(text(&name, source).to_owned());
            }
            let count = u32::try_from(param.named_child_count()).unwrap_or(u32::MAX);
            (0..count)
                .filter_map(|i| param.named_child(i))
                .find(|c| matches!(c.kind(), "identifier" | "list_splat_pattern" | "dictionary_splat_pattern"))
                .map(|c| text(&c, source).to_owned())
        }
    }
}

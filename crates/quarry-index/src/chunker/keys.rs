//! One chunk per top-level key of a YAML or JSON document.

use regex::Regex;

use super::{Chunk, ChunkError, ChunkMetadata, ChunkType, Source};
use crate::languages::Lang;

pub(super) fn chunk(src: &Source<'_>) -> Result<Vec<Chunk>, ChunkError> {
    let keys = top_level_keys(src)?;

    let mut located: Vec<(usize, String, &'static str)> = keys
        .into_iter()
        .filter_map(|(key, value_type)| {
            let line = key_line(src, &key)?;
            Some((line, key, value_type))
        })
        .collect();
    located.sort_by_key(|(line, _, _)| *line);
    located.dedup_by_key(|(line, _, _)| *line);

    if located.is_empty() {
        return Err(ChunkError::NoStructure);
    }

    let total = src.lines.len();
    let chunks = located
        .iter()
        .enumerate()
        .map(|(idx, (start, key, value_type))| {
            let next = located.get(idx + 1).map_or(total, |(l, _, _)| l - 1);
            let end = src.trim_end(*start, next.max(*start));
            let metadata = ChunkMetadata {
                key: Some(key.clone()),
                value_type: Some((*value_type).to_owned()),
                ..ChunkMetadata::default()
            };
            let id = format!("{}:section:{key}:{start}-{end}", src.path);
            src.chunk(id, (*start, end), ChunkType::Section, metadata)
        })
        .collect();
    Ok(chunks)
}

fn top_level_keys(src: &Source<'_>) -> Result<Vec<(String, &'static str)>, ChunkError> {
    if src.lang == Lang::Json {
        let value: serde_json::Value =
            serde_json::from_str(src.text).map_err(|e| ChunkError::Parse(e.to_string()))?;
        let serde_json::Value::Object(map) = value else {
            return Err(ChunkError::NotAMapping);
        };
        return Ok(map
            .into_iter()
            .map(|(k, v)| (k, json_type(&v)))
            .collect());
    }

    let value: serde_yaml::Value =
        serde_yaml::from_str(src.text).map_err(|e| ChunkError::Parse(e.to_string()))?;
    let serde_yaml::Value::Mapping(map) = value else {
        return Err(ChunkError::NotAMapping);
    };
    Ok(map
        .into_iter()
        .filter_map(|(k, v)| {
            let key = match k {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key, yaml_type(&v)))
        })
        .collect())
}

/// Line on which a top-level key is defined.
///
/// YAML keys sit at column zero. JSON keys may be indented, so the
/// shallowest matching line wins.
fn key_line(src: &Source<'_>, key: &str) -> Option<usize> {
    let escaped = regex::escape(key);
    let pattern = if src.lang == Lang::Json {
        format!(r#"^(\s*)"{escaped}"\s*:"#)
    } else {
        format!(r#"^()(?:"{escaped}"|'{escaped}'|{escaped})\s*:"#)
    };
    let re = Regex::new(&pattern).ok()?;

    src.lines
        .iter()
        .enumerate()
        .filter_map(|(idx, line)| {
            let caps = re.captures(line)?;
            let indent = caps.get(1).map_or(0, |m| m.as_str().len());
            Some((indent, idx + 1))
        })
        .min()
        .map(|(_, line)| line)
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Object(_) => "mapping",
        serde_json::Value::Array(_) => "sequence",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Null => "null",
    }
}

fn yaml_type(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::Bool(_) => "boolean",
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Tagged(_) => "tagged",
    }
}

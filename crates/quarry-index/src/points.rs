//! Mapping between chunks and vector store points.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunker::{Chunk, ChunkMetadata, ChunkType};
use crate::languages::Lang;

/// Stable point id for a chunk id.
///
/// Vector stores such as Qdrant accept only UUID or integer ids, so the chunk
/// id is hashed into a UUIDv5 and kept verbatim in the payload.
#[must_use]
pub fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

#[derive(Serialize, Deserialize)]
struct ChunkPayload {
    chunk_id: String,
    content: String,
    file_path: String,
    start_line: usize,
    end_line: usize,
    chunk_type: ChunkType,
    language: Lang,
    #[serde(default)]
    metadata: ChunkMetadata,
}

/// Payload stored next to a chunk's vector.
#[must_use]
pub fn chunk_payload(chunk: &Chunk) -> HashMap<String, serde_json::Value> {
    let payload = ChunkPayload {
        chunk_id: chunk.id.clone(),
        content: chunk.content.clone(),
        file_path: chunk.file_path.clone(),
        start_line: chunk.start_line,
        end_line: chunk.end_line,
        chunk_type: chunk.chunk_type,
        language: chunk.language,
        metadata: chunk.metadata.clone(),
    };
    match serde_json::to_value(payload) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

/// Rebuild a chunk from a stored payload. `None` for foreign or damaged points.
#[must_use]
pub fn chunk_from_payload(payload: &HashMap<String, serde_json::Value>) -> Option<Chunk> {
    let object: serde_json::Map<String, serde_json::Value> =
        payload.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let p: ChunkPayload = serde_json::from_value(serde_json::Value::Object(object)).ok()?;
    Some(Chunk {
        id: p.chunk_id,
        file_path: p.file_path,
        start_line: p.start_line,
        end_line: p.end_line,
        content: p.content,
        chunk_type: p.chunk_type,
        language: p.language,
        metadata: p.metadata,
    })
}

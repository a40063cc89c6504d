//! Usage: Comment body shaping (rich-text chunks under the per-node length cap).

use crate::shared::error::AppResult;
use serde_json::{json, Value};

pub const MAX_CHUNK_CHARS: usize = 1800;

/// Splits on character boundaries after normalizing CRLF to LF.
pub fn split_text_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let cleaned = text.replace("\r\n", "\n");
    let chars: Vec<char> = cleaned.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub fn build_comment_rich_text(text: &str) -> AppResult<Vec<Value>> {
    let chunks = split_text_chunks(text, MAX_CHUNK_CHARS);
    if chunks.is_empty() {
        return Err("INVALID_INPUT: Comment text is empty.".into());
    }
    Ok(chunks
        .into_iter()
        .map(|chunk| json!({"type": "text", "text": {"content": chunk}}))
        .collect())
}

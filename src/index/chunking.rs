//! Filepath: src/index/chunking.rs
//! Deterministic line-based chunking with stable chunk IDs.

use anyhow::{Result, bail};
use sha2::{Digest, Sha256};

use crate::index::models::ChunkRecord;

pub const DEFAULT_CHUNK_LINES: usize = 200;
pub const DEFAULT_CHUNK_OVERLAP_LINES: usize = 30;

/// Split text into deterministic line chunks with overlap.
///
/// Windows advance by `chunk_lines - overlap_lines`; the final window ends
/// at the last line. Empty text yields no chunks.
pub fn chunk_text(
    path: &str,
    text: &str,
    chunk_lines: usize,
    overlap_lines: usize,
) -> Result<Vec<ChunkRecord>> {
    if chunk_lines < 1 {
        bail!("chunk_lines must be >= 1");
    }
    if overlap_lines >= chunk_lines {
        bail!("overlap_lines must be less than chunk_lines");
    }

    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let step = chunk_lines - overlap_lines;
    let mut start_index = 0usize;
    loop {
        let end_index_exclusive = (start_index + chunk_lines).min(lines.len());
        let start_line = start_index + 1;
        let end_line = end_index_exclusive;
        let window = &lines[start_index..end_index_exclusive];
        chunks.push(ChunkRecord {
            path: path.to_string(),
            start_line,
            end_line,
            chunk_id: build_chunk_id(path, start_line, end_line, window),
        });
        if end_index_exclusive == lines.len() {
            break;
        }
        start_index += step;
    }
    Ok(chunks)
}

/// Stable chunk identifier: SHA-256 over `path | start | end | joined text`.
pub fn build_chunk_id(path: &str, start_line: usize, end_line: usize, lines: &[&str]) -> String {
    let payload = lines.join("\n");
    let mut digest = Sha256::new();
    digest.update(path.as_bytes());
    digest.update(b"|");
    digest.update(start_line.to_string().as_bytes());
    digest.update(b"|");
    digest.update(end_line.to_string().as_bytes());
    digest.update(b"|");
    digest.update(payload.as_bytes());
    hex::encode(digest.finalize())
}

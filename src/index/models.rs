//! Filepath: src/index/models.rs
//! Typed models for indexing state.

use serde::{Deserialize, Serialize};

/// A file tracked by the index.
///
/// `path` is repo-relative, forward-slashed, and never contains `..`
/// segments, so records compare identically across platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    pub mtime_ns: i64,
    pub content_hash: String,
}

/// Deterministic change classification for index refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDelta {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
}

/// Deterministic chunk metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_id: String,
}

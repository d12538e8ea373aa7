//! Filepath: src/index/store.rs
//! Persistent index storage and refresh orchestration.
//!
//! Three artifacts live under `<data_dir>/index/`: `manifest.json`,
//! `files.jsonl`, and `chunks.jsonl`. Every write is replace-all through a
//! temp file + rename, so readers observe either the previous complete
//! state or the new one. A schema version mismatch is surfaced as a typed
//! error and never patched in place.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use globset::Glob;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::config::IndexSettings;
use crate::index::chunking::{DEFAULT_CHUNK_LINES, DEFAULT_CHUNK_OVERLAP_LINES, chunk_text};
use crate::index::discovery::{detect_index_delta, discover_files, record_map};
use crate::index::models::{ChunkRecord, FileRecord};
use crate::index::search::{SearchDocument, SearchHit, bm25_search};
use crate::logging::audit::utc_timestamp;
use crate::security::paths::canonical_root;

pub const INDEX_SCHEMA_VERSION: i64 = 1;

/// Raised when the stored index schema does not match the supported version.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("index schema version {found} is unsupported; expected {expected}")]
pub struct IndexSchemaUnsupported {
    pub found: i64,
    pub expected: i64,
}

/// Current index status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub index_status: String,
    pub last_refresh_timestamp: Option<String>,
    pub indexed_file_count: usize,
    pub indexed_chunk_count: usize,
}

/// Result payload of one refresh pass.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub duration_ms: u64,
    pub timestamp: String,
    pub refresh_profile: Value,
}

/// Manages the deterministic persistent index files.
pub struct IndexStore {
    repo_root: PathBuf,
    settings: IndexSettings,
    manifest_path: PathBuf,
    files_path: PathBuf,
    chunks_path: PathBuf,
    index_dir: PathBuf,
    data_dir_prefix: Option<String>,
    // Lazily built searchable documents, invalidated by manifest identity.
    search_cache_marker: Option<String>,
    search_cache: Option<Vec<SearchDocument>>,
}

impl IndexStore {
    pub fn new(repo_root: &Path, data_dir: &Path, settings: IndexSettings) -> Self {
        let repo_root = canonical_root(repo_root);
        let index_dir = data_dir.join("index");
        let data_dir_prefix = data_dir
            .strip_prefix(&repo_root)
            .ok()
            .map(|rel| {
                rel.components()
                    .map(|component| component.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .filter(|prefix| !prefix.is_empty());
        Self {
            repo_root,
            settings,
            manifest_path: index_dir.join("manifest.json"),
            files_path: index_dir.join("files.jsonl"),
            chunks_path: index_dir.join("chunks.jsonl"),
            index_dir,
            data_dir_prefix,
            search_cache_marker: None,
            search_cache: None,
        }
    }

    /// Return status derived from the manifest, if present.
    pub fn status(&self) -> IndexStatus {
        let Some(manifest) = self.read_manifest() else {
            return IndexStatus {
                index_status: "not_indexed".to_string(),
                last_refresh_timestamp: None,
                indexed_file_count: 0,
                indexed_chunk_count: 0,
            };
        };
        match manifest.get("schema_version").and_then(Value::as_i64) {
            Some(schema) if schema == INDEX_SCHEMA_VERSION => IndexStatus {
                index_status: "ready".to_string(),
                last_refresh_timestamp: manifest
                    .get("last_refresh_timestamp")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                indexed_file_count: manifest
                    .get("indexed_file_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize,
                indexed_chunk_count: manifest
                    .get("indexed_chunk_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize,
            },
            _ => IndexStatus {
                index_status: "schema_mismatch".to_string(),
                last_refresh_timestamp: None,
                indexed_file_count: 0,
                indexed_chunk_count: 0,
            },
        }
    }

    /// Refresh the index; incremental by default, full rebuild under `force`.
    ///
    /// Force additionally tolerates a schema mismatch in the prior state
    /// (that is the documented recovery path) and treats every surviving
    /// path as updated.
    pub fn refresh(&mut self, force: bool) -> Result<RefreshOutcome> {
        let started = Instant::now();

        let load_previous_started = Instant::now();
        let previous_records = if self.manifest_path.exists() {
            self.load_file_records(force)?
        } else {
            BTreeMap::new()
        };
        let load_previous_seconds = load_previous_started.elapsed().as_secs_f64();

        let discover_started = Instant::now();
        let (discovered, discovery_profile) =
            discover_files(&self.repo_root, &self.settings, &previous_records)?;
        let current_records = self.filter_internal_records(discovered);
        let discover_seconds = discover_started.elapsed().as_secs_f64();

        let (added, updated, removed) = if force {
            let previous_set: std::collections::BTreeSet<&str> =
                previous_records.keys().map(String::as_str).collect();
            let current_set: std::collections::BTreeSet<&str> = current_records
                .iter()
                .map(|record| record.path.as_str())
                .collect();
            (
                current_set.difference(&previous_set).count(),
                current_set.intersection(&previous_set).count(),
                previous_set.difference(&current_set).count(),
            )
        } else {
            let delta = detect_index_delta(&previous_records, &current_records);
            (delta.added.len(), delta.updated.len(), delta.removed.len())
        };

        let chunk_started = Instant::now();
        let chunks = self.build_chunks(&current_records)?;
        let chunk_seconds = chunk_started.elapsed().as_secs_f64();

        let timestamp = utc_timestamp();
        let manifest = json!({
            "schema_version": INDEX_SCHEMA_VERSION,
            "last_refresh_timestamp": timestamp,
            "indexed_file_count": current_records.len(),
            "indexed_chunk_count": chunks.len(),
        });

        let write_started = Instant::now();
        self.write_all(&manifest, &current_records, &chunks)?;
        let write_seconds = write_started.elapsed().as_secs_f64();

        debug!(
            added,
            updated,
            removed,
            files = current_records.len(),
            chunks = chunks.len(),
            "index refresh complete"
        );

        Ok(RefreshOutcome {
            added,
            updated,
            removed,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp,
            refresh_profile: json!({
                "load_previous_seconds": load_previous_seconds,
                "discover_seconds": discover_seconds,
                "chunk_seconds": chunk_seconds,
                "write_seconds": write_seconds,
                "discovery": serde_json::to_value(&discovery_profile)?,
            }),
        })
    }

    /// Run deterministic BM25 search over indexed chunks.
    pub fn search(
        &mut self,
        query: &str,
        top_k: usize,
        file_glob: Option<&str>,
        path_prefix: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if top_k < 1 {
            return Ok(Vec::new());
        }
        let docs = self.load_search_documents()?;
        let filtered = filter_search_documents(&docs, file_glob, path_prefix)?;
        if filtered.is_empty() {
            return Ok(Vec::new());
        }
        Ok(bm25_search(&filtered, query, top_k))
    }

    /// Indexed file records, keyed by repo-relative path.
    /// Schema mismatches surface the typed error with the recovery hint.
    pub fn indexed_file_records(&self) -> Result<BTreeMap<String, FileRecord>> {
        if !self.manifest_path.exists() {
            return Ok(BTreeMap::new());
        }
        self.load_file_records(false)
    }

    fn load_search_documents(&mut self) -> Result<Vec<SearchDocument>> {
        let marker = self.search_cache_marker();
        if let (Some(cached_marker), Some(cache)) =
            (&self.search_cache_marker, &self.search_cache)
            && *cached_marker == marker
        {
            return Ok(cache.clone());
        }

        let chunks = self.load_chunks()?;
        let mut line_cache: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut docs: Vec<SearchDocument> = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            if !line_cache.contains_key(&chunk.path) {
                let full_path = self.repo_root.join(&chunk.path);
                if !full_path.is_file() {
                    continue;
                }
                let text = std::fs::read_to_string(&full_path).unwrap_or_default();
                line_cache.insert(
                    chunk.path.clone(),
                    text.lines().map(str::to_string).collect(),
                );
            }
            let lines = &line_cache[&chunk.path];
            let start_idx = chunk.start_line.saturating_sub(1);
            let end_idx = chunk.end_line.min(lines.len());
            if start_idx >= end_idx {
                continue;
            }
            docs.push(SearchDocument {
                path: chunk.path.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                text: lines[start_idx..end_idx].join("\n"),
            });
        }

        self.search_cache = Some(docs.clone());
        self.search_cache_marker = Some(marker);
        Ok(docs)
    }

    fn search_cache_marker(&self) -> String {
        let Some(manifest) = self.read_manifest() else {
            return "not_indexed".to_string();
        };
        format!(
            "{}:{}:{}:{}",
            manifest
                .get("schema_version")
                .and_then(Value::as_i64)
                .unwrap_or(-1),
            manifest
                .get("indexed_file_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            manifest
                .get("indexed_chunk_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            manifest
                .get("last_refresh_timestamp")
                .and_then(Value::as_str)
                .unwrap_or(""),
        )
    }

    fn build_chunks(&self, records: &[FileRecord]) -> Result<Vec<ChunkRecord>> {
        let mut chunks: Vec<ChunkRecord> = Vec::new();
        for record in records {
            let full_path = self.repo_root.join(&record.path);
            let text = std::fs::read_to_string(&full_path)
                .with_context(|| format!("read {} for chunking", record.path))?;
            chunks.extend(chunk_text(
                &record.path,
                &text,
                DEFAULT_CHUNK_LINES,
                DEFAULT_CHUNK_OVERLAP_LINES,
            )?);
        }
        chunks.sort_by(|a, b| a.path.cmp(&b.path).then(a.start_line.cmp(&b.start_line)));
        Ok(chunks)
    }

    fn load_chunks(&self) -> Result<Vec<ChunkRecord>> {
        let Some(manifest) = self.read_manifest() else {
            return Ok(Vec::new());
        };
        let schema = manifest
            .get("schema_version")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        if schema != INDEX_SCHEMA_VERSION {
            return Err(IndexSchemaUnsupported {
                found: schema,
                expected: INDEX_SCHEMA_VERSION,
            }
            .into());
        }
        if !self.chunks_path.exists() {
            return Ok(Vec::new());
        }
        let mut chunks: Vec<ChunkRecord> = read_jsonl(&self.chunks_path)?
            .into_iter()
            .filter_map(|obj| serde_json::from_value::<ChunkRecord>(obj).ok())
            .collect();
        chunks.sort_by(|a, b| a.path.cmp(&b.path).then(a.start_line.cmp(&b.start_line)));
        Ok(chunks)
    }

    fn load_file_records(
        &self,
        allow_schema_mismatch: bool,
    ) -> Result<BTreeMap<String, FileRecord>> {
        let Some(manifest) = self.read_manifest() else {
            return Ok(BTreeMap::new());
        };
        let schema = manifest
            .get("schema_version")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        if schema != INDEX_SCHEMA_VERSION && !allow_schema_mismatch {
            return Err(IndexSchemaUnsupported {
                found: schema,
                expected: INDEX_SCHEMA_VERSION,
            }
            .into());
        }
        if !self.files_path.exists() {
            return Ok(BTreeMap::new());
        }
        let records: Vec<FileRecord> = read_jsonl(&self.files_path)?
            .into_iter()
            .filter_map(|obj| serde_json::from_value::<FileRecord>(obj).ok())
            .collect();
        Ok(record_map(&records))
    }

    /// Drop records that live under the data directory when it is nested
    /// inside the repository; the index never indexes itself.
    fn filter_internal_records(&self, records: Vec<FileRecord>) -> Vec<FileRecord> {
        let Some(prefix) = &self.data_dir_prefix else {
            return records;
        };
        let nested = format!("{prefix}/");
        records
            .into_iter()
            .filter(|record| record.path != *prefix && !record.path.starts_with(&nested))
            .collect()
    }

    fn write_all(
        &self,
        manifest: &Value,
        records: &[FileRecord],
        chunks: &[ChunkRecord],
    ) -> Result<()> {
        std::fs::create_dir_all(&self.index_dir)
            .with_context(|| format!("create index dir {}", self.index_dir.display()))?;
        atomic_write_json(&self.manifest_path, manifest)?;
        let record_rows: Result<Vec<Value>> = records
            .iter()
            .map(|record| serde_json::to_value(record).map_err(Into::into))
            .collect();
        atomic_write_jsonl(&self.files_path, &record_rows?)?;
        let chunk_rows: Result<Vec<Value>> = chunks
            .iter()
            .map(|chunk| serde_json::to_value(chunk).map_err(Into::into))
            .collect();
        atomic_write_jsonl(&self.chunks_path, &chunk_rows?)?;
        Ok(())
    }

    fn read_manifest(&self) -> Option<Value> {
        if !self.manifest_path.exists() {
            return None;
        }
        let text = std::fs::read_to_string(&self.manifest_path).ok()?;
        let payload: Value = serde_json::from_str(&text).ok()?;
        payload.is_object().then_some(payload)
    }
}

fn filter_search_documents(
    documents: &[SearchDocument],
    file_glob: Option<&str>,
    path_prefix: Option<&str>,
) -> Result<Vec<SearchDocument>> {
    let matcher = match file_glob {
        Some(pattern) => Some(
            Glob::new(pattern)
                .with_context(|| format!("invalid file_glob '{pattern}'"))?
                .compile_matcher(),
        ),
        None => None,
    };
    let normalized_prefix = path_prefix.map(normalize_path_prefix);
    Ok(documents
        .iter()
        .filter(|doc| {
            if let Some(matcher) = &matcher
                && !matcher.is_match(doc.path.as_str())
            {
                return false;
            }
            if let Some(prefix) = &normalized_prefix
                && !doc.path.starts_with(prefix.as_str())
            {
                return false;
            }
            true
        })
        .cloned()
        .collect())
}

/// Normalise a caller-supplied path prefix: forward slashes, collapsed
/// doubles, no leading `./`.
pub fn normalize_path_prefix(path_prefix: &str) -> String {
    let mut normalized = path_prefix.replace('\\', "/").trim().to_string();
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    normalized
}

fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read jsonl {}", path.display()))?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .filter(Value::is_object)
        .collect())
}

fn atomic_write_json(path: &Path, payload: &Value) -> Result<()> {
    let parent = path.parent().context("artifact path has no parent")?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    writeln!(tmp, "{payload}")?;
    tmp.persist(path)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

fn atomic_write_jsonl(path: &Path, rows: &[Value]) -> Result<()> {
    let parent = path.parent().context("artifact path has no parent")?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    for row in rows {
        writeln!(tmp, "{row}")?;
    }
    tmp.persist(path)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

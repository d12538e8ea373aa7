//! Filepath: src/index/discovery.rs
//! Deterministic file discovery and incremental change detection.
//!
//! The walk is sorted, prunes well-known heavy directories, and applies
//! include-extension + exclude-glob rules before any stat. Files whose
//! `(size, mtime_ns)` match a prior record reuse its content hash without
//! re-reading; everything else is sniffed for binary content and hashed
//! with SHA-256. Hashing runs on the rayon pool; output order is restored
//! by the original sorted candidate order.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::IndexSettings;
use crate::index::models::{FileRecord, IndexDelta};
use crate::security::paths::canonical_root;

const BINARY_SNIFF_BYTES: usize = 4096;

/// Directory names never descended into, independent of exclude globs.
const PRUNED_DIR_NAMES: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    ".cache",
    ".mypy_cache",
    ".pytest_cache",
];

/// Deterministic diagnostics for one discovery pass.
///
/// Second counters are summed per file so they stay meaningful when the
/// hash phase runs on multiple threads.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryProfile {
    pub total_candidates: usize,
    pub excluded_by_glob: usize,
    pub excluded_by_extension: usize,
    pub unchanged_reused: usize,
    pub binary_excluded: usize,
    pub hashed_files: usize,
    pub stat_seconds: f64,
    pub binary_sniff_seconds: f64,
    pub hash_seconds: f64,
    pub total_seconds: f64,
}

/// Discover indexable text files with deterministic ordering.
pub fn discover_files(
    repo_root: &Path,
    settings: &IndexSettings,
    previous_records: &BTreeMap<String, FileRecord>,
) -> Result<(Vec<FileRecord>, DiscoveryProfile)> {
    let started = Instant::now();
    let root = canonical_root(repo_root);
    let exclude_set = build_exclude_set(&settings.exclude_globs)?;

    let mut profile = DiscoveryProfile::default();
    let mut candidates: Vec<(String, PathBuf)> = Vec::new();

    for path in walk_sorted(&root) {
        let Some(relative) = relative_posix(&root, &path) else {
            continue;
        };
        profile.total_candidates += 1;
        if exclude_set.is_match(relative.as_str()) {
            profile.excluded_by_glob += 1;
            continue;
        }
        if !has_allowed_extension(&relative, &settings.include_extensions) {
            profile.excluded_by_extension += 1;
            continue;
        }
        candidates.push((relative, path));
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    // Stat sequentially; decide reuse against the prior record set.
    enum Pending {
        Reused(FileRecord),
        Hash {
            relative: String,
            path: PathBuf,
            size: u64,
            mtime_ns: i64,
        },
    }

    let stat_started = Instant::now();
    let mut pending: Vec<Pending> = Vec::with_capacity(candidates.len());
    for (relative, path) in candidates {
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            // Races with concurrent deletion drop the candidate.
            Err(_) => continue,
        };
        let size = metadata.len();
        let mtime_ns = mtime_nanos(&metadata);
        match previous_records.get(&relative) {
            Some(previous) if previous.size == size && previous.mtime_ns == mtime_ns => {
                profile.unchanged_reused += 1;
                pending.push(Pending::Reused(FileRecord {
                    path: relative,
                    size,
                    mtime_ns,
                    content_hash: previous.content_hash.clone(),
                }));
            }
            _ => pending.push(Pending::Hash {
                relative,
                path,
                size,
                mtime_ns,
            }),
        }
    }
    profile.stat_seconds = stat_started.elapsed().as_secs_f64();

    // Sniff + hash changed files in parallel, preserving candidate order.
    let sniff_nanos = AtomicU64::new(0);
    let hash_nanos = AtomicU64::new(0);
    let resolved: Vec<Option<FileRecord>> = pending
        .into_par_iter()
        .map(|entry| match entry {
            Pending::Reused(record) => Some(record),
            Pending::Hash {
                relative,
                path,
                size,
                mtime_ns,
            } => {
                let sniff_started = Instant::now();
                let binary = is_binary_file(&path).unwrap_or(true);
                sniff_nanos.fetch_add(
                    sniff_started.elapsed().as_nanos() as u64,
                    Ordering::Relaxed,
                );
                if binary {
                    return None;
                }
                let hash_started = Instant::now();
                let content_hash = sha256_file(&path).ok()?;
                hash_nanos.fetch_add(hash_started.elapsed().as_nanos() as u64, Ordering::Relaxed);
                Some(FileRecord {
                    path: relative,
                    size,
                    mtime_ns,
                    content_hash,
                })
            }
        })
        .collect();

    let mut records: Vec<FileRecord> = Vec::with_capacity(resolved.len());
    for entry in resolved {
        match entry {
            Some(record) => records.push(record),
            None => profile.binary_excluded += 1,
        }
    }
    profile.hashed_files = records.len() - profile.unchanged_reused;
    profile.binary_sniff_seconds = sniff_nanos.load(Ordering::Relaxed) as f64 / 1e9;
    profile.hash_seconds = hash_nanos.load(Ordering::Relaxed) as f64 / 1e9;
    profile.total_seconds = started.elapsed().as_secs_f64();

    // Parallel collection preserved input order, which was sorted by path.
    Ok((records, profile))
}

/// Compute deterministic added/updated/unchanged/removed sets.
///
/// `unchanged` requires the full record (size, mtime, hash) to match.
pub fn detect_index_delta(
    previous: &BTreeMap<String, FileRecord>,
    current_records: &[FileRecord],
) -> IndexDelta {
    let current: BTreeMap<&str, &FileRecord> = current_records
        .iter()
        .map(|record| (record.path.as_str(), record))
        .collect();

    let mut delta = IndexDelta::default();
    for (path, record) in &current {
        match previous.get(*path) {
            None => delta.added.push(path.to_string()),
            Some(prior) if prior == *record => delta.unchanged.push(path.to_string()),
            Some(_) => delta.updated.push(path.to_string()),
        }
    }
    for path in previous.keys() {
        if !current.contains_key(path.as_str()) {
            delta.removed.push(path.clone());
        }
    }
    // BTreeMap iteration already yields sorted paths; removed needs no
    // extra sort either since previous is a BTreeMap.
    delta
}

/// Map records by relative path.
pub fn record_map(records: &[FileRecord]) -> BTreeMap<String, FileRecord> {
    records
        .iter()
        .map(|record| (record.path.clone(), record.clone()))
        .collect()
}

/// Return true when the file extension is in the include list.
pub fn has_allowed_extension(relative_path: &str, include_extensions: &[String]) -> bool {
    let basename = relative_path.rsplit('/').next().unwrap_or(relative_path);
    let Some(dot) = basename.rfind('.') else {
        return false;
    };
    let suffix = basename[dot..].to_lowercase();
    include_extensions
        .iter()
        .any(|ext| ext.to_lowercase() == suffix)
}

/// Compute SHA-256 in deterministic chunked reads.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut digest = Sha256::new();
    let mut handle = std::fs::File::open(path)
        .with_context(|| format!("open {} for hashing", path.display()))?;
    let mut buffer = vec![0u8; 128 * 1024];
    loop {
        let read = handle.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
    }
    Ok(hex::encode(digest.finalize()))
}

/// Sniff the first 4096 bytes for NUL or invalid UTF-8.
/// A multi-byte sequence cut off at the sniff boundary still counts as text.
pub fn is_binary_file(path: &Path) -> Result<bool> {
    let mut handle = std::fs::File::open(path)?;
    let mut sample = vec![0u8; BINARY_SNIFF_BYTES];
    let read = handle.read(&mut sample)?;
    sample.truncate(read);
    if sample.contains(&0) {
        return Ok(true);
    }
    match std::str::from_utf8(&sample) {
        Ok(_) => Ok(false),
        Err(err) => Ok(err.error_len().is_some()),
    }
}

fn build_exclude_set(exclude_globs: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in exclude_globs {
        let glob =
            Glob::new(pattern).with_context(|| format!("invalid exclude glob '{pattern}'"))?;
        builder.add(glob);
    }
    builder.build().context("build exclude glob set")
}

/// Sorted recursive walk pruning heavy directories by name.
fn walk_sorted(root: &Path) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(false)
        .git_exclude(false)
        .git_global(false)
        .ignore(false)
        .parents(false)
        .sort_by_file_name(std::ffi::OsStr::cmp);
    builder.filter_entry(|entry| {
        let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
        if !is_dir {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !PRUNED_DIR_NAMES.contains(&name.as_ref())
    });
    builder
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
        .collect()
}

fn relative_posix(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(
        rel.components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

fn mtime_nanos(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|duration| duration.as_nanos() as i64)
        .unwrap_or(0)
}

//! Filepath: src/security/paths.rs
//! Path resolution for repository-scoped access.
//!
//! Every caller-supplied path string passes through [`resolve_repo_path`]
//! before any filesystem access. The resolver normalises separators,
//! rejects traversal and absolute escapes, and canonicalises through
//! symlinks so the returned path is guaranteed to live under the
//! repository root.

use std::path::{Path, PathBuf};

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Windows drive-letter absolute prefix, e.g. `C:\` or `d:/`.
static WINDOWS_ABSOLUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z]:[\\/]").expect("static pattern"));

/// Raised when a requested path violates sandbox policy.
///
/// Carries a caller-facing reason and a recovery hint; neither ever
/// includes resolved filesystem paths.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct PathBlocked {
    pub reason: String,
    pub hint: String,
}

impl PathBlocked {
    fn new(reason: &str, hint: &str) -> Self {
        Self {
            reason: reason.to_string(),
            hint: hint.to_string(),
        }
    }
}

/// Normalize path separators and detect absolute-style inputs.
fn normalize_relative_input(candidate: &str) -> (String, bool) {
    let normalized = candidate.replace('\\', "/");
    if normalized.starts_with('/') {
        return (normalized, true);
    }
    if WINDOWS_ABSOLUTE.is_match(&normalized) {
        return (normalized, true);
    }
    (normalized, false)
}

/// Canonicalise the repository root itself. Falls back to the raw path
/// when the root does not exist yet (startup validation reports that
/// separately).
pub fn canonical_root(repo_root: &Path) -> PathBuf {
    dunce::canonicalize(repo_root).unwrap_or_else(|_| repo_root.to_path_buf())
}

/// Resolve a candidate path against the repo root with sandbox enforcement.
///
/// Returns an absolute path proven to be inside the canonicalised root.
pub fn resolve_repo_path(repo_root: &Path, candidate: &str) -> Result<PathBuf, PathBlocked> {
    let root = canonical_root(repo_root);
    let (normalized, is_absolute_style) = normalize_relative_input(candidate);

    if normalized.is_empty() {
        return Err(PathBlocked::new(
            "Path is empty.",
            "Provide a repository-relative path such as 'src/module.py'.",
        ));
    }

    if is_absolute_style {
        let resolved = canonicalize_lenient(Path::new(&normalized));
        if !resolved.starts_with(&root) {
            return Err(PathBlocked::new(
                "Absolute path is outside repo_root.",
                "Use a path located under the configured repository root.",
            ));
        }
        return Ok(resolved);
    }

    // Relative form: drop empty and `.` segments, refuse `..` outright.
    let parts: Vec<&str> = normalized
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if parts.iter().any(|part| *part == "..") {
        return Err(PathBlocked::new(
            "Path traversal is blocked.",
            "Remove '..' segments and use a repository-relative path.",
        ));
    }

    let mut joined = root.clone();
    for part in &parts {
        joined.push(part);
    }

    // Canonicalisation catches symlinks that point outside the root.
    let resolved = canonicalize_lenient(&joined);
    if !resolved.starts_with(&root) {
        return Err(PathBlocked::new(
            "Resolved path escapes repo_root.",
            "Use a path located under the configured repository root.",
        ));
    }
    Ok(resolved)
}

/// Canonicalise when the target exists; otherwise canonicalise the deepest
/// existing ancestor and re-attach the remaining components so paths that
/// do not exist yet still resolve deterministically.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(resolved) = dunce::canonicalize(path) {
        return resolved;
    }
    let mut missing: Vec<std::ffi::OsString> = Vec::new();
    let mut cursor = path.to_path_buf();
    while let Some(parent) = cursor.parent() {
        if let Some(name) = cursor.file_name() {
            missing.push(name.to_os_string());
        }
        if let Ok(resolved_parent) = dunce::canonicalize(parent) {
            let mut rebuilt = resolved_parent;
            for component in missing.iter().rev() {
                rebuilt.push(component);
            }
            return rebuilt;
        }
        cursor = parent.to_path_buf();
    }
    path.to_path_buf()
}

/// Repo-relative, forward-slashed rendition of a resolved path.
pub fn relative_posix_path(repo_root: &Path, resolved: &Path) -> String {
    let root = canonical_root(repo_root);
    let rel = resolved.strip_prefix(&root).unwrap_or(resolved);
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

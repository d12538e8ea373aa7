//! Filepath: src/security/policy.rs
//! Denylist and limits policy for safe repository reads.
//!
//! The denylist is a fixed set of sensitive name patterns that can never
//! be relaxed by configuration. Limits cap file sizes and requested line
//! spans so a single request cannot pull unbounded content.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::security::paths::relative_posix_path;

/// Runtime security limits for tool responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLimits {
    pub max_file_bytes: u64,
    pub max_open_lines: usize,
    pub max_total_bytes_per_response: usize,
    pub max_search_hits: usize,
    pub max_references: usize,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 1024 * 1024,
            max_open_lines: 500,
            max_total_bytes_per_response: 256 * 1024,
            max_search_hits: 50,
            max_references: 100,
        }
    }
}

/// Raised when denylist or limits policy blocks an operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct PolicyBlocked {
    pub reason: String,
    pub hint: String,
}

impl PolicyBlocked {
    fn new(reason: &str, hint: &str) -> Self {
        Self {
            reason: reason.to_string(),
            hint: hint.to_string(),
        }
    }
}

/// Return true when a path is denylisted by default policy.
///
/// Matching is case-insensitive on the repo-relative form. The pattern set
/// is fixed; config loading refuses any attempt to relax it.
pub fn is_denylisted(repo_root: &Path, resolved_path: &Path) -> bool {
    let rel_path = relative_posix_path(repo_root, resolved_path);
    let lowered = rel_path.to_lowercase();
    let basename = lowered.rsplit('/').next().unwrap_or(&lowered).to_string();

    if basename == ".env" {
        return true;
    }
    if basename.ends_with(".pem")
        || basename.ends_with(".key")
        || basename.ends_with(".pfx")
        || basename.ends_with(".p12")
    {
        return true;
    }
    if basename.starts_with("id_rsa") {
        return true;
    }
    if format!("/{lowered}/").contains("/.git/") || lowered == ".git" {
        return true;
    }
    if basename.starts_with("secrets.") {
        return true;
    }
    false
}

/// Fail with [`PolicyBlocked`] when a path is denylisted or the on-disk
/// file exceeds `max_file_bytes`.
pub fn enforce_file_access_policy(
    repo_root: &Path,
    resolved_path: &Path,
    limits: &SecurityLimits,
) -> Result<(), PolicyBlocked> {
    if is_denylisted(repo_root, resolved_path) {
        return Err(PolicyBlocked::new(
            "File is denylisted by security policy.",
            "Use a non-sensitive file path under repo_root.",
        ));
    }

    if resolved_path.is_file() {
        let file_size = std::fs::metadata(resolved_path)
            .map(|meta| meta.len())
            .unwrap_or(0);
        if file_size > limits.max_file_bytes {
            return Err(PolicyBlocked::new(
                "File exceeds max_file_bytes limit.",
                "Request a smaller file or increase limit via approved configuration.",
            ));
        }
    }
    Ok(())
}

/// Fail when an explicit `[start, end]` span exceeds `max_open_lines`.
/// Open-ended reads are bounded by the caller against the real line count.
pub fn enforce_open_line_limits(
    start_line: usize,
    end_line: Option<usize>,
    limits: &SecurityLimits,
) -> Result<(), PolicyBlocked> {
    if let Some(end) = end_line {
        let requested = end.saturating_sub(start_line) + 1;
        if requested > limits.max_open_lines {
            return Err(PolicyBlocked::new(
                "Requested line range exceeds max_open_lines limit.",
                "Reduce the requested line range.",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) -> std::path::PathBuf {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, "x").unwrap();
        path
    }

    #[test]
    fn denylist_covers_documented_patterns() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();

        for rel in [
            ".env",
            "certs/server.pem",
            "keys/api.key",
            "bundle.pfx",
            "bundle.p12",
            "home/id_rsa",
            "home/id_rsa.pub",
            ".git/config",
            "nested/.git/HEAD",
            "secrets.toml",
        ] {
            let path = touch(root, rel);
            assert!(is_denylisted(root, &path), "expected denylisted: {rel}");
        }

        let ok = touch(root, "src/main.py");
        assert!(!is_denylisted(root, &ok));
        // Names merely containing a denylisted substring stay readable.
        let near = touch(root, "docs/environment.md");
        assert!(!is_denylisted(root, &near));
    }

    #[test]
    fn file_size_limit_enforced() {
        let tmp = TempDir::new().unwrap();
        let path = touch(tmp.path(), "big.txt");
        fs::write(&path, vec![b'a'; 64]).unwrap();

        let mut limits = SecurityLimits::default();
        limits.max_file_bytes = 16;
        let err = enforce_file_access_policy(tmp.path(), &path, &limits).unwrap_err();
        assert_eq!(err.reason, "File exceeds max_file_bytes limit.");

        limits.max_file_bytes = 1024;
        assert!(enforce_file_access_policy(tmp.path(), &path, &limits).is_ok());
    }

    #[test]
    fn line_span_limit_enforced() {
        let limits = SecurityLimits {
            max_open_lines: 10,
            ..SecurityLimits::default()
        };
        assert!(enforce_open_line_limits(1, Some(10), &limits).is_ok());
        assert!(enforce_open_line_limits(5, Some(14), &limits).is_ok());
        let err = enforce_open_line_limits(1, Some(11), &limits).unwrap_err();
        assert_eq!(
            err.reason,
            "Requested line range exceeds max_open_lines limit."
        );
        // Open-ended spans are not judged here.
        assert!(enforce_open_line_limits(1, None, &limits).is_ok());
    }
}

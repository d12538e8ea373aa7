//! Filepath: src/logging/audit.rs
//! Structured JSONL audit log utilities.
//!
//! One sanitized event per request, one JSON object per line, append-only.
//! Free-text argument values (queries, prompts, unknown strings) never
//! reach the log; they are replaced by presence/length markers.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Sanitized representation of a single tool request.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub request_id: String,
    pub tool: String,
    pub ok: bool,
    pub blocked: bool,
    pub error_code: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Return an ISO-8601 UTC timestamp with millisecond precision.
pub fn utc_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Argument keys that pass through verbatim when carrying the given type.
const SAFE_STRING_KEYS: &[&str] = &["path", "glob", "file_glob", "mode", "path_prefix", "strategy"];
const SAFE_INTEGER_KEYS: &[&str] = &["start_line", "end_line", "top_k", "max_results", "limit"];
const SAFE_BOOLEAN_KEYS: &[&str] = &["include_hidden", "force", "include_tests"];
const CONTENT_STRING_KEYS: &[&str] = &["query", "prompt"];

/// Sanitize arguments to avoid logging secret-like values.
///
/// Known safe scalar keys pass through; known content keys and unknown
/// strings collapse to `*_present` + `*_length`; lists and objects are
/// summarised by type, length, and (for objects) sorted key names only.
pub fn sanitize_arguments(arguments: &Map<String, Value>) -> Map<String, Value> {
    let mut sanitized = Map::new();
    let mut keys: Vec<&String> = arguments.keys().collect();
    keys.sort();
    for key in keys {
        let value = &arguments[key.as_str()];
        if SAFE_STRING_KEYS.contains(&key.as_str()) && value.is_string() {
            sanitized.insert(key.clone(), value.clone());
            continue;
        }
        if SAFE_INTEGER_KEYS.contains(&key.as_str()) && (value.is_i64() || value.is_u64()) {
            sanitized.insert(key.clone(), value.clone());
            continue;
        }
        if SAFE_BOOLEAN_KEYS.contains(&key.as_str()) && value.is_boolean() {
            sanitized.insert(key.clone(), value.clone());
            continue;
        }
        if CONTENT_STRING_KEYS.contains(&key.as_str()) {
            if let Value::String(text) = value {
                sanitized.insert(format!("{key}_present"), Value::Bool(true));
                sanitized.insert(format!("{key}_length"), Value::from(text.chars().count()));
                continue;
            }
        }
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) => {
                sanitized.insert(key.clone(), value.clone());
            }
            Value::String(text) => {
                sanitized.insert(format!("{key}_present"), Value::Bool(true));
                sanitized.insert(format!("{key}_length"), Value::from(text.chars().count()));
            }
            Value::Array(items) => {
                sanitized.insert(format!("{key}_type"), Value::from("list"));
                sanitized.insert(format!("{key}_length"), Value::from(items.len()));
            }
            Value::Object(map) => {
                let mut names: Vec<String> = map.keys().cloned().collect();
                names.sort();
                sanitized.insert(format!("{key}_type"), Value::from("dict"));
                sanitized.insert(format!("{key}_keys"), Value::from(names));
            }
        }
    }
    sanitized
}

/// Append-only JSONL audit logger and bounded reader.
#[derive(Debug)]
pub struct JsonlAuditLogger {
    path: PathBuf,
}

impl JsonlAuditLogger {
    /// Create a logger rooted at `path`, creating parent directories.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create audit log directory {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// On-disk JSONL path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a sanitized event as one JSON object plus newline.
    pub fn append(&self, event: &AuditEvent) -> Result<()> {
        // Sorted keys come from the Value conversion (BTreeMap-backed maps).
        let payload = serde_json::to_value(event).context("serialize audit event")?;
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open audit log {}", self.path.display()))?;
        writeln!(handle, "{payload}").context("append audit event")?;
        Ok(())
    }

    /// Read recent events, optionally filtered by timestamp lower bound.
    /// Returns the newest `limit` records in chronological order; malformed
    /// lines are skipped.
    pub fn read(&self, since: Option<&str>, limit: usize) -> Vec<Value> {
        if limit < 1 || !self.path.exists() {
            return Vec::new();
        }
        let Ok(handle) = std::fs::File::open(&self.path) else {
            return Vec::new();
        };
        let mut entries: Vec<Value> = Vec::new();
        for line in BufReader::new(handle).lines() {
            let Ok(raw) = line else { continue };
            let stripped = raw.trim();
            if stripped.is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<Value>(stripped) else {
                continue;
            };
            if let Some(lower_bound) = since {
                match record.get("timestamp").and_then(Value::as_str) {
                    Some(ts) if ts >= lower_bound => {}
                    _ => continue,
                }
            }
            entries.push(record);
        }
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn safe_keys_pass_through() {
        let sanitized = sanitize_arguments(&args(json!({
            "path": "src/a.py",
            "mode": "bm25",
            "top_k": 5,
            "force": true,
        })));
        assert_eq!(sanitized["path"], json!("src/a.py"));
        assert_eq!(sanitized["mode"], json!("bm25"));
        assert_eq!(sanitized["top_k"], json!(5));
        assert_eq!(sanitized["force"], json!(true));
    }

    #[test]
    fn content_strings_collapse_to_presence_and_length() {
        let sanitized = sanitize_arguments(&args(json!({
            "query": "secret token xyz",
            "prompt": "service run",
        })));
        assert!(sanitized.get("query").is_none());
        assert!(sanitized.get("prompt").is_none());
        assert_eq!(sanitized["query_present"], json!(true));
        assert_eq!(sanitized["query_length"], json!(16));
        assert_eq!(sanitized["prompt_present"], json!(true));
        assert_eq!(sanitized["prompt_length"], json!(11));
    }

    #[test]
    fn unknown_strings_lists_and_dicts_are_summarised() {
        let sanitized = sanitize_arguments(&args(json!({
            "mystery": "do not log me",
            "items": [1, 2, 3],
            "budget": {"max_files": 2, "max_total_lines": 16},
        })));
        assert!(sanitized.get("mystery").is_none());
        assert_eq!(sanitized["mystery_present"], json!(true));
        assert_eq!(sanitized["mystery_length"], json!(13));
        assert_eq!(sanitized["items_type"], json!("list"));
        assert_eq!(sanitized["items_length"], json!(3));
        assert_eq!(sanitized["budget_type"], json!("dict"));
        assert_eq!(sanitized["budget_keys"], json!(["max_files", "max_total_lines"]));
    }

    #[test]
    fn append_then_read_round_trips_in_order() {
        let tmp = TempDir::new().unwrap();
        let logger = JsonlAuditLogger::new(tmp.path().join("audit.jsonl")).unwrap();

        for (index, ts) in ["2026-01-01T00:00:00.000Z", "2026-01-01T00:00:01.000Z"]
            .iter()
            .enumerate()
        {
            logger
                .append(&AuditEvent {
                    timestamp: ts.to_string(),
                    request_id: format!("r{index}"),
                    tool: "repo.status".to_string(),
                    ok: true,
                    blocked: false,
                    error_code: None,
                    metadata: Map::new(),
                })
                .unwrap();
        }

        let all = logger.read(None, 50);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["request_id"], json!("r0"));
        assert_eq!(all[1]["request_id"], json!("r1"));

        // The limit keeps the newest entries.
        let newest = logger.read(None, 1);
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0]["request_id"], json!("r1"));

        // The since filter drops older timestamps.
        let since = logger.read(Some("2026-01-01T00:00:01.000Z"), 50);
        assert_eq!(since.len(), 1);
        assert_eq!(since[0]["request_id"], json!("r1"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");
        std::fs::write(&path, "{\"timestamp\":\"t\"}\nnot json\n\n").unwrap();
        let logger = JsonlAuditLogger::new(path).unwrap();
        assert_eq!(logger.read(None, 50).len(), 1);
    }

    #[test]
    fn timestamp_has_millisecond_utc_shape() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2026-01-01T00:00:00.000Z".len());
    }
}

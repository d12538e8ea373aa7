//! Filepath: src/tools/builtin.rs
//! The nine built-in `repo.*` tool handlers.
//!
//! Every handler validates its arguments strictly, reads through the
//! sandbox + policy pair, and returns a fully-shaped JSON result. Handlers
//! never write to the repository; the only mutations are the index
//! refresh, the audit log, and the bundle side-artifacts inside the data
//! directory.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{Context, Result};
use globset::Glob;
use ignore::WalkBuilder;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::adapters::registry::AdapterRegistry;
use crate::adapters::runtime::build_adapter_registry;
use crate::bundler::engine::{BundleCallbacks, BundleOptions, build_context_bundle};
use crate::bundler::models::{BundleBudget, BundleResult};
use crate::config::{EffectiveConfig, limits_summary};
use crate::index::chunking::{DEFAULT_CHUNK_LINES, DEFAULT_CHUNK_OVERLAP_LINES};
use crate::index::store::IndexStore;
use crate::infra::io::{read_file_smart, slice_line_span};
use crate::logging::audit::{JsonlAuditLogger, utc_timestamp};
use crate::security::paths::{relative_posix_path, resolve_repo_path};
use crate::security::policy::{
    PolicyBlocked, enforce_file_access_policy, enforce_open_line_limits, is_denylisted,
};
use crate::tools::registry::{ToolError, ToolRegistry};

/// Truthy env values enabling per-request profile emission.
fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Profiling toggles, read once at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileToggles {
    pub references: bool,
    pub bundler: bool,
}

impl ProfileToggles {
    pub fn from_env() -> Self {
        Self {
            references: env_truthy("REPO_MCP_PROFILE_REFERENCES"),
            bundler: env_truthy("REPO_MCP_PROFILE_BUNDLER"),
        }
    }
}

/// Shared per-process state handed to every tool handler.
pub struct ServerContext {
    pub config: EffectiveConfig,
    pub index: RefCell<IndexStore>,
    pub adapters: AdapterRegistry,
    pub audit: JsonlAuditLogger,
    pub profile: ProfileToggles,
}

impl ServerContext {
    pub fn new(config: EffectiveConfig) -> Result<Self> {
        let index = IndexStore::new(&config.repo_root, &config.data_dir, config.index.clone());
        let audit = JsonlAuditLogger::new(config.data_dir.join("audit.jsonl"))?;
        let adapters = build_adapter_registry(&config);
        Ok(Self {
            config,
            index: RefCell::new(index),
            adapters,
            audit,
            profile: ProfileToggles::from_env(),
        })
    }
}

/// Register the full built-in tool set in deterministic order.
pub fn register_builtin_tools(registry: &mut ToolRegistry, ctx: Rc<ServerContext>) {
    let handler = ctx.clone();
    registry.register("repo.status", Box::new(move |args| status(&handler, args)));
    let handler = ctx.clone();
    registry.register(
        "repo.list_files",
        Box::new(move |args| list_files(&handler, args)),
    );
    let handler = ctx.clone();
    registry.register(
        "repo.open_file",
        Box::new(move |args| open_file(&handler, args)),
    );
    let handler = ctx.clone();
    registry.register(
        "repo.refresh_index",
        Box::new(move |args| refresh_index(&handler, args)),
    );
    let handler = ctx.clone();
    registry.register("repo.search", Box::new(move |args| search(&handler, args)));
    let handler = ctx.clone();
    registry.register("repo.outline", Box::new(move |args| outline(&handler, args)));
    let handler = ctx.clone();
    registry.register(
        "repo.references",
        Box::new(move |args| references(&handler, args)),
    );
    let handler = ctx.clone();
    registry.register(
        "repo.build_context_bundle",
        Box::new(move |args| build_bundle(&handler, args)),
    );
    let handler = ctx;
    registry.register(
        "repo.audit_log",
        Box::new(move |args| audit_log(&handler, args)),
    );
}

// ---------------------------------------------------------------- arguments

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    match args.get(key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text),
        Some(Value::String(_)) => Err(ToolError::invalid_params(format!(
            "Argument '{key}' must be a non-empty string."
        ))),
        Some(_) => Err(ToolError::invalid_params(format!(
            "Argument '{key}' must be a string."
        ))),
        None => Err(ToolError::invalid_params(format!(
            "Argument '{key}' is required."
        ))),
    }
}

fn optional_str<'a>(
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a str>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(_) => Err(ToolError::invalid_params(format!(
            "Argument '{key}' must be a string."
        ))),
    }
}

fn optional_usize(args: &Map<String, Value>, key: &str) -> Result<Option<usize>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_u64() {
            Some(number) => Ok(Some(number as usize)),
            None => Err(ToolError::invalid_params(format!(
                "Argument '{key}' must be a non-negative integer."
            ))),
        },
    }
}

fn optional_bool(args: &Map<String, Value>, key: &str) -> Result<Option<bool>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(_) => Err(ToolError::invalid_params(format!(
            "Argument '{key}' must be a boolean."
        ))),
    }
}

fn bounded_top_k(
    requested: Option<usize>,
    default: usize,
    cap: usize,
    name: &str,
) -> Result<usize, ToolError> {
    let value = requested.unwrap_or(default);
    if value < 1 {
        return Err(ToolError::invalid_params(format!(
            "Argument '{name}' must be >= 1."
        )));
    }
    if value > cap {
        return Err(ToolError::invalid_params(format!(
            "Argument '{name}' must be <= {cap}."
        )));
    }
    Ok(value)
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value)
        .context("serialize tool result")
        .map_err(ToolError::Internal)
}

fn map_index_error(error: anyhow::Error) -> ToolError {
    match error.downcast::<crate::index::store::IndexSchemaUnsupported>() {
        Ok(schema) => ToolError::Schema(schema),
        Err(other) => ToolError::Internal(other),
    }
}

// ------------------------------------------------------------------- status

fn status(ctx: &ServerContext, _args: &Map<String, Value>) -> Result<Value, ToolError> {
    let index_status = ctx.index.borrow().status();
    let mut result = to_value(&index_status)?;
    let object = result.as_object_mut().expect("status is an object");
    object.insert("config".to_string(), ctx.config.to_public_value());
    object.insert(
        "chunking".to_string(),
        json!({
            "chunk_lines": DEFAULT_CHUNK_LINES,
            "overlap_lines": DEFAULT_CHUNK_OVERLAP_LINES,
        }),
    );
    object.insert(
        "enabled_adapters".to_string(),
        json!(ctx.adapters.names()),
    );
    object.insert(
        "limits_summary".to_string(),
        Value::Object(limits_summary(&ctx.config.limits)),
    );
    Ok(result)
}

// --------------------------------------------------------------- list_files

fn list_files(ctx: &ServerContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let glob = optional_str(args, "glob")?;
    let include_hidden = optional_bool(args, "include_hidden")?.unwrap_or(false);
    let max_results = bounded_top_k(
        optional_usize(args, "max_results")?,
        ctx.config.limits.max_search_hits,
        ctx.config.limits.max_search_hits,
        "max_results",
    )?;

    let matcher = match glob {
        Some(pattern) => Some(
            Glob::new(pattern)
                .map_err(|_| {
                    ToolError::invalid_params(format!("Argument 'glob' is not a valid glob: {pattern}"))
                })?
                .compile_matcher(),
        ),
        None => None,
    };

    let root = &ctx.config.repo_root;
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(!include_hidden)
        .git_ignore(false)
        .git_exclude(false)
        .git_global(false)
        .ignore(false)
        .parents(false)
        .sort_by_file_name(std::ffi::OsStr::cmp);

    let data_dir = ctx.config.data_dir.clone();
    builder.filter_entry(move |entry| {
        // Never descend into the data directory.
        entry.path() != data_dir
    });

    let mut files: Vec<String> = Vec::new();
    let mut truncated = false;
    for entry in builder.build().filter_map(|entry| entry.ok()) {
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel_posix = rel
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if let Some(matcher) = &matcher
            && !matcher.is_match(rel_posix.as_str())
        {
            continue;
        }
        // Denylisted files are silently omitted from listings.
        if is_denylisted(root, entry.path()) {
            continue;
        }
        files.push(rel_posix);
    }
    files.sort();
    if files.len() > max_results {
        files.truncate(max_results);
        truncated = true;
    }
    Ok(json!({"files": files, "truncated": truncated}))
}

// ---------------------------------------------------------------- open_file

fn open_file(ctx: &ServerContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let path_arg = required_str(args, "path")?;
    let start_line = optional_usize(args, "start_line")?.unwrap_or(1);
    let end_line = optional_usize(args, "end_line")?;
    if start_line < 1 {
        return Err(ToolError::invalid_params(
            "Argument 'start_line' must be >= 1.",
        ));
    }
    if let Some(end) = end_line
        && end < start_line
    {
        return Err(ToolError::invalid_params(
            "Argument 'end_line' must be >= start_line.",
        ));
    }

    let resolved = resolve_repo_path(&ctx.config.repo_root, path_arg)?;
    enforce_file_access_policy(&ctx.config.repo_root, &resolved, &ctx.config.limits)?;
    enforce_open_line_limits(start_line, end_line, &ctx.config.limits)?;
    if !resolved.is_file() {
        return Err(ToolError::invalid_params(format!(
            "File does not exist: {path_arg}"
        )));
    }

    let content = read_file_smart(&resolved).map_err(ToolError::Internal)?;
    let text = content.as_ref();
    let line_count = text.lines().count();

    let effective_end = match end_line {
        Some(end) => end,
        None => {
            // Whole-file reads are refused past the line limit.
            if line_count > ctx.config.limits.max_open_lines {
                return Err(PolicyBlocked {
                    reason: "File exceeds max_open_lines limit.".to_string(),
                    hint: "Request an explicit line range.".to_string(),
                }
                .into());
            }
            line_count.max(start_line)
        }
    };

    let lines = slice_line_span(text, start_line, effective_end);
    let truncated = end_line.is_some_and(|end| end > line_count);
    let numbered_lines: Vec<Value> = lines
        .iter()
        .enumerate()
        .map(|(offset, line)| json!({"line": start_line + offset, "text": line}))
        .collect();
    let rel = relative_posix_path(&ctx.config.repo_root, &resolved);
    Ok(json!({
        "path": rel,
        "numbered_lines": numbered_lines,
        "truncated": truncated,
    }))
}

// ------------------------------------------------------------ refresh_index

fn refresh_index(ctx: &ServerContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let force = optional_bool(args, "force")?.unwrap_or(false);
    let outcome = ctx
        .index
        .borrow_mut()
        .refresh(force)
        .map_err(map_index_error)?;
    to_value(&outcome)
}

// ------------------------------------------------------------------- search

fn search(ctx: &ServerContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let query = required_str(args, "query")?;
    if let Some(mode) = optional_str(args, "mode")?
        && mode != "bm25"
    {
        return Err(ToolError::invalid_params(
            "Argument 'mode' must be 'bm25'.",
        ));
    }
    let top_k = bounded_top_k(
        optional_usize(args, "top_k")?,
        20.min(ctx.config.limits.max_search_hits),
        ctx.config.limits.max_search_hits,
        "top_k",
    )?;
    let file_glob = optional_str(args, "file_glob")?;
    let path_prefix = optional_str(args, "path_prefix")?;

    let hits = ctx
        .index
        .borrow_mut()
        .search(query, top_k, file_glob, path_prefix)
        .map_err(map_index_error)?;
    Ok(json!({"hits": to_value(&hits)?}))
}

// ------------------------------------------------------------------ outline

fn outline(ctx: &ServerContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let path_arg = required_str(args, "path")?;
    let resolved = resolve_repo_path(&ctx.config.repo_root, path_arg)?;
    enforce_file_access_policy(&ctx.config.repo_root, &resolved, &ctx.config.limits)?;
    if !resolved.is_file() {
        return Err(ToolError::invalid_params(format!(
            "File does not exist: {path_arg}"
        )));
    }

    let rel = relative_posix_path(&ctx.config.repo_root, &resolved);
    let content = read_file_smart(&resolved).map_err(ToolError::Internal)?;
    let adapter = ctx
        .adapters
        .select(&rel)
        .ok_or_else(|| ToolError::Internal(anyhow::anyhow!("no adapter registered")))?;
    let symbols = adapter
        .outline(&rel, content.as_ref())
        .map_err(|err| ToolError::Internal(err.into()))?;
    Ok(json!({
        "path": rel,
        "adapter": adapter.name(),
        "symbols": to_value(&symbols)?,
    }))
}

// --------------------------------------------------------------- references

fn references(ctx: &ServerContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let started = Instant::now();
    let symbol = required_str(args, "symbol")?;
    let top_k = bounded_top_k(
        optional_usize(args, "top_k")?,
        ctx.config.limits.max_references,
        ctx.config.limits.max_references,
        "top_k",
    )?;
    let scoped_path = optional_str(args, "path")?;

    let files = match scoped_path {
        Some(path_arg) => {
            let resolved = resolve_repo_path(&ctx.config.repo_root, path_arg)?;
            enforce_file_access_policy(&ctx.config.repo_root, &resolved, &ctx.config.limits)?;
            if !resolved.is_file() {
                return Err(ToolError::invalid_params(format!(
                    "File does not exist: {path_arg}"
                )));
            }
            let rel = relative_posix_path(&ctx.config.repo_root, &resolved);
            let content = read_file_smart(&resolved).map_err(ToolError::Internal)?;
            vec![(rel, content.as_ref().to_string())]
        }
        None => load_indexed_texts(ctx)?,
    };

    let grouped = resolve_references_batched(
        ctx,
        std::slice::from_ref(&symbol.to_string()),
        &files,
    )?;
    let mut merged = grouped.into_values().next().unwrap_or_default();
    let total_candidates = merged.len();
    let truncated = total_candidates > top_k;
    merged.truncate(top_k);

    if ctx.profile.references {
        write_profile_line(
            &ctx.config.data_dir,
            "references_profile.jsonl",
            json!({
                "timestamp": utc_timestamp(),
                "duration_seconds": started.elapsed().as_secs_f64(),
                "file_count": files.len(),
                "total_candidates": total_candidates,
                "returned": merged.len(),
            }),
        );
    }

    Ok(json!({
        "symbol": symbol,
        "references": to_value(&merged)?,
        "truncated": truncated,
        "total_candidates": total_candidates,
    }))
}

/// All indexed files as `(repo-relative path, text)`, skipping anything
/// denylisted, oversized, or unreadable.
fn load_indexed_texts(ctx: &ServerContext) -> Result<Vec<(String, String)>, ToolError> {
    let records = ctx
        .index
        .borrow()
        .indexed_file_records()
        .map_err(map_index_error)?;
    let mut files: Vec<(String, String)> = Vec::with_capacity(records.len());
    for rel in records.keys() {
        let full = ctx.config.repo_root.join(rel);
        if !full.is_file() || is_denylisted(&ctx.config.repo_root, &full) {
            continue;
        }
        if enforce_file_access_policy(&ctx.config.repo_root, &full, &ctx.config.limits).is_err() {
            continue;
        }
        let Ok(content) = read_file_smart(&full) else {
            continue;
        };
        files.push((rel.clone(), content.as_ref().to_string()));
    }
    Ok(files)
}

/// Resolve references for many symbols with one batch call per adapter.
///
/// Files are grouped by their first-match adapter so each adapter sees its
/// own files exactly once per request.
fn resolve_references_batched(
    ctx: &ServerContext,
    symbols: &[String],
    files: &[(String, String)],
) -> Result<BTreeMap<String, Vec<crate::adapters::base::SymbolReference>>, ToolError> {
    let mut grouped_files: BTreeMap<usize, Vec<(String, String)>> = BTreeMap::new();
    for (path, text) in files {
        let Some(adapter_index) = ctx
            .adapters
            .adapters()
            .find(|(_, adapter)| adapter.supports_path(path))
            .map(|(index, _)| index)
        else {
            continue;
        };
        grouped_files
            .entry(adapter_index)
            .or_default()
            .push((path.clone(), text.clone()));
    }

    let mut merged: BTreeMap<String, Vec<crate::adapters::base::SymbolReference>> =
        symbols.iter().map(|s| (s.clone(), Vec::new())).collect();
    for (adapter_index, adapter_files) in &grouped_files {
        let adapter = ctx
            .adapters
            .adapters()
            .find(|(index, _)| index == adapter_index)
            .map(|(_, adapter)| adapter)
            .expect("grouped index is valid");
        // Adapter failures on one family degrade to no evidence from it.
        let Ok(resolved) = adapter.references_for_symbols(symbols, adapter_files, None) else {
            debug!(adapter = adapter.name(), "reference resolution failed");
            continue;
        };
        for (symbol, mut references) in resolved {
            if let Some(bucket) = merged.get_mut(&symbol) {
                bucket.append(&mut references);
            }
        }
    }

    for references in merged.values_mut() {
        references.sort_by(|a, b| {
            (a.path.as_str(), a.line, a.symbol.as_str(), a.kind.as_str())
                .cmp(&(b.path.as_str(), b.line, b.symbol.as_str(), b.kind.as_str()))
        });
        references.dedup();
    }
    Ok(merged)
}

// ----------------------------------------------------- build_context_bundle

fn build_bundle(ctx: &ServerContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let prompt = required_str(args, "prompt")?;
    let budget_value = args
        .get("budget")
        .and_then(Value::as_object)
        .ok_or_else(|| ToolError::invalid_params("Argument 'budget' must be an object."))?;
    let max_files = budget_value
        .get("max_files")
        .and_then(Value::as_u64)
        .filter(|value| *value >= 1)
        .ok_or_else(|| {
            ToolError::invalid_params("Argument 'budget.max_files' must be a positive integer.")
        })? as usize;
    let max_total_lines = budget_value
        .get("max_total_lines")
        .and_then(Value::as_u64)
        .filter(|value| *value >= 1)
        .ok_or_else(|| {
            ToolError::invalid_params(
                "Argument 'budget.max_total_lines' must be a positive integer.",
            )
        })? as usize;
    let budget = BundleBudget {
        max_files,
        max_total_lines,
    };
    let options = BundleOptions {
        include_tests: optional_bool(args, "include_tests")?.unwrap_or(true),
        strategy: optional_str(args, "strategy")?.unwrap_or("hybrid").to_string(),
        top_k_per_query: bounded_top_k(
            optional_usize(args, "top_k_per_query")?,
            20.min(ctx.config.limits.max_search_hits),
            ctx.config.limits.max_search_hits,
            "top_k_per_query",
        )?,
    };

    // A stale schema must surface as the typed error, not an empty bundle.
    ctx.index
        .borrow()
        .indexed_file_records()
        .map_err(map_index_error)?;

    let search_fn = |query: &str, top_k: usize| {
        ctx.index
            .borrow_mut()
            .search(query, top_k, None, None)
            .unwrap_or_default()
    };
    let read_lines_fn = |path: &str, start: usize, end: usize| -> Result<Vec<String>> {
        let resolved = resolve_repo_path(&ctx.config.repo_root, path)
            .map_err(|blocked| anyhow::anyhow!(blocked.reason))?;
        enforce_file_access_policy(&ctx.config.repo_root, &resolved, &ctx.config.limits)
            .map_err(|blocked| anyhow::anyhow!(blocked.reason))?;
        let content = read_file_smart(&resolved)?;
        Ok(slice_line_span(content.as_ref(), start, end))
    };
    let outline_fn = |path: &str| outline_symbols_quiet(ctx, path);
    let scoped_many = |symbol_paths: &BTreeMap<String, Vec<String>>| {
        reference_lines_scoped(ctx, symbol_paths)
    };
    let profile_sink = |payload: Value| {
        let mut stamped = payload;
        if let Some(object) = stamped.as_object_mut() {
            object.insert("timestamp".to_string(), json!(utc_timestamp()));
        }
        write_profile_line(&ctx.config.data_dir, "bundler_profile.jsonl", stamped);
    };

    let sink_ref: &crate::bundler::engine::ProfileSink<'_> = &profile_sink;
    let callbacks = BundleCallbacks {
        outline: Some(&outline_fn),
        reference_lookup_scoped_many: Some(&scoped_many),
        profile_sink: if ctx.profile.bundler {
            Some(sink_ref)
        } else {
            None
        },
        ..BundleCallbacks::default()
    };

    let bundle = build_context_bundle(
        prompt,
        budget,
        &search_fn,
        &read_lines_fn,
        &options,
        &callbacks,
    )
    .map_err(ToolError::Internal)?;

    let mut result = to_value(&bundle)?;
    let warnings = write_bundle_artifacts(&ctx.config.data_dir, &bundle);
    if !warnings.is_empty()
        && let Some(object) = result.as_object_mut()
    {
        object.insert("__warnings__".to_string(), json!(warnings));
    }
    Ok(result)
}

/// Outline used for bundle alignment; any failure yields no symbols.
fn outline_symbols_quiet(
    ctx: &ServerContext,
    path: &str,
) -> Vec<crate::adapters::base::OutlineSymbol> {
    let Ok(resolved) = resolve_repo_path(&ctx.config.repo_root, path) else {
        return Vec::new();
    };
    if enforce_file_access_policy(&ctx.config.repo_root, &resolved, &ctx.config.limits).is_err() {
        return Vec::new();
    }
    if !resolved.is_file() {
        return Vec::new();
    }
    let Ok(content) = read_file_smart(&resolved) else {
        return Vec::new();
    };
    let rel = relative_posix_path(&ctx.config.repo_root, &resolved);
    let Some(adapter) = ctx.adapters.select(&rel) else {
        return Vec::new();
    };
    adapter.outline(&rel, content.as_ref()).unwrap_or_default()
}

/// Scoped reference prefetch for the bundle engine: each symbol resolves
/// only against the files it was aligned in.
fn reference_lines_scoped(
    ctx: &ServerContext,
    symbol_paths: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<(String, usize)>> {
    let mut output: BTreeMap<String, Vec<(String, usize)>> = BTreeMap::new();
    for (symbol, paths) in symbol_paths {
        let mut files: Vec<(String, String)> = Vec::new();
        for path in paths {
            let Ok(resolved) = resolve_repo_path(&ctx.config.repo_root, path) else {
                continue;
            };
            if !resolved.is_file()
                || enforce_file_access_policy(
                    &ctx.config.repo_root,
                    &resolved,
                    &ctx.config.limits,
                )
                .is_err()
            {
                continue;
            }
            let Ok(content) = read_file_smart(&resolved) else {
                continue;
            };
            files.push((
                relative_posix_path(&ctx.config.repo_root, &resolved),
                content.as_ref().to_string(),
            ));
        }
        let symbol_list = vec![symbol.clone()];
        let pairs = match resolve_references_batched(ctx, &symbol_list, &files) {
            Ok(grouped) => grouped
                .into_values()
                .next()
                .unwrap_or_default()
                .into_iter()
                .map(|reference| (reference.path, reference.line))
                .collect(),
            Err(_) => Vec::new(),
        };
        output.insert(symbol.clone(), pairs);
    }
    output
}

/// Write `last_bundle.json` and `last_bundle.md`; failures come back as
/// warning strings instead of failing the request.
fn write_bundle_artifacts(data_dir: &Path, bundle: &BundleResult) -> Vec<String> {
    let mut warnings: Vec<String> = Vec::new();
    if let Err(error) = std::fs::create_dir_all(data_dir) {
        warnings.push(format!("failed to create data dir for bundle artifacts: {error}"));
        return warnings;
    }

    let json_path = data_dir.join("last_bundle.json");
    match serde_json::to_value(bundle) {
        Ok(payload) => {
            let pretty = serde_json::to_string_pretty(&payload).unwrap_or_default();
            if let Err(error) = std::fs::write(&json_path, pretty + "\n") {
                warnings.push(format!("failed to write last_bundle.json: {error}"));
            }
        }
        Err(error) => warnings.push(format!("failed to encode last_bundle.json: {error}")),
    }

    let md_path = data_dir.join("last_bundle.md");
    if let Err(error) = std::fs::write(&md_path, render_bundle_markdown(bundle)) {
        warnings.push(format!("failed to write last_bundle.md: {error}"));
    }
    warnings
}

fn render_bundle_markdown(bundle: &BundleResult) -> String {
    let mut out = String::new();
    out.push_str("# Context bundle\n\n");
    out.push_str(&format!("- bundle_id: `{}`\n", bundle.bundle_id));
    out.push_str(&format!(
        "- prompt_fingerprint: `{}`\n",
        bundle.prompt_fingerprint
    ));
    out.push_str(&format!("- strategy: {}\n", bundle.strategy));
    out.push_str(&format!(
        "- totals: {} files, {} lines, truncated={}\n\n",
        bundle.totals.selected_files, bundle.totals.selected_lines, bundle.totals.truncated
    ));
    out.push_str("## Selections\n\n");
    for (index, selection) in bundle.selections.iter().enumerate() {
        out.push_str(&format!(
            "### {}. {}:{}-{}\n\n",
            index + 1,
            selection.path,
            selection.start_line,
            selection.end_line
        ));
        out.push_str(&format!("{}\n\n", selection.rationale));
        out.push_str("```\n");
        out.push_str(&selection.excerpt);
        out.push_str("\n```\n\n");
    }
    out
}

fn write_profile_line(data_dir: &Path, file_name: &str, payload: Value) {
    let perf_dir = data_dir.join("perf");
    if std::fs::create_dir_all(&perf_dir).is_err() {
        return;
    }
    let Ok(mut handle) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(perf_dir.join(file_name))
    else {
        return;
    };
    let _ = writeln!(handle, "{payload}");
}

// ---------------------------------------------------------------- audit_log

fn audit_log(ctx: &ServerContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let since = optional_str(args, "since")?;
    let limit = bounded_top_k(optional_usize(args, "limit")?, 50, 500, "limit")?;
    let entries = ctx.audit.read(since, limit);
    Ok(json!({"entries": entries}))
}

//! Filepath: src/adapters/base.rs
//! Core adapter contract and shared post-processing.
//!
//! Every adapter, AST-backed or lexical, emits through
//! [`normalize_and_sort_symbols`] / [`normalize_and_sort_references`] so the
//! output schema and ordering are identical across languages and across
//! repeated calls.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// Single symbol in a source file outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutlineSymbol {
    pub kind: String,
    pub name: String,
    pub signature: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub doc: Option<String>,
    pub parent_symbol: Option<String>,
    pub scope_kind: Option<String>,
    pub is_conditional: Option<bool>,
    pub decl_context: Option<String>,
}

impl OutlineSymbol {
    /// Plain symbol with only the required fields; optional metadata is
    /// filled in by normalisation or by the emitting adapter.
    pub fn new(kind: &str, name: String, start_line: usize, end_line: usize) -> Self {
        Self {
            kind: kind.to_string(),
            name,
            signature: None,
            start_line,
            end_line,
            doc: None,
            parent_symbol: None,
            scope_kind: None,
            is_conditional: None,
            decl_context: None,
        }
    }

    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }
}

/// Single cross-file symbol reference record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolReference {
    pub symbol: String,
    pub path: String,
    pub line: usize,
    pub kind: String,
    pub evidence: String,
    pub strategy: String,
    pub confidence: String,
}

/// Raised when adapter output violates the shared symbol contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct AdapterContractError(pub String);

/// Capability surface implemented by every language adapter.
pub trait LanguageAdapter {
    /// Stable adapter name for diagnostics.
    fn name(&self) -> &'static str;

    /// True when this adapter handles the given path.
    fn supports_path(&self, path: &str) -> bool;

    /// Deterministic symbol outline for one file.
    fn outline(&self, path: &str, text: &str)
    -> Result<Vec<OutlineSymbol>, AdapterContractError>;

    /// Optional chunk-boundary hints as inclusive line ranges.
    fn smart_chunks(&self, _path: &str, _text: &str) -> Option<Vec<(usize, usize)>> {
        None
    }

    /// Optional deterministic symbol hints extracted from a prompt.
    fn symbol_hints(&self, _prompt: &str) -> Vec<String> {
        Vec::new()
    }

    /// Deterministic usage references for one symbol across files.
    fn references_for_symbol(
        &self,
        _symbol: &str,
        _files: &[(String, String)],
        _top_k: Option<usize>,
    ) -> Result<Vec<SymbolReference>, AdapterContractError> {
        Ok(Vec::new())
    }

    /// Batch resolver: one pass over the files for many symbols. The
    /// default delegates per symbol; adapters with per-file preprocessing
    /// override this to avoid repeating it.
    fn references_for_symbols(
        &self,
        symbols: &[String],
        files: &[(String, String)],
        top_k: Option<usize>,
    ) -> Result<BTreeMap<String, Vec<SymbolReference>>, AdapterContractError> {
        let mut grouped = BTreeMap::new();
        for symbol in symbols {
            grouped.insert(
                symbol.clone(),
                self.references_for_symbol(symbol, files, top_k)?,
            );
        }
        Ok(grouped)
    }
}

/// Trim an optional signature to a stable representation.
pub fn normalize_signature(signature: Option<&str>) -> Option<String> {
    normalize_optional_text(signature)
}

/// Trim optional text fields to stable string-or-None values.
pub fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Deterministic sort key for outline symbols.
fn symbol_sort_key(symbol: &OutlineSymbol) -> (usize, usize, &str, &str) {
    (
        symbol.start_line,
        symbol.end_line,
        symbol.name.as_str(),
        symbol.kind.as_str(),
    )
}

/// Deterministic sort key for symbol references.
fn reference_sort_key(reference: &SymbolReference) -> (&str, usize, &str, &str) {
    (
        reference.path.as_str(),
        reference.line,
        reference.symbol.as_str(),
        reference.kind.as_str(),
    )
}

const ALLOWED_SCOPE_KINDS: &[&str] = &["module", "class", "function"];
const ALLOWED_STRATEGIES: &[&str] = &["ast", "lexical"];
const ALLOWED_CONFIDENCE: &[&str] = &["high", "medium", "low"];

fn validate_outline_symbols(symbols: &[OutlineSymbol]) -> Result<(), AdapterContractError> {
    for symbol in symbols {
        if symbol.kind.trim().is_empty() {
            return Err(AdapterContractError(
                "Outline symbol kind must be non-empty.".into(),
            ));
        }
        if symbol.name.trim().is_empty() {
            return Err(AdapterContractError(
                "Outline symbol name must be non-empty.".into(),
            ));
        }
        if symbol.start_line < 1 {
            return Err(AdapterContractError(
                "Outline symbol start_line must be >= 1.".into(),
            ));
        }
        if symbol.end_line < symbol.start_line {
            return Err(AdapterContractError(
                "Outline symbol end_line must be >= start_line.".into(),
            ));
        }
        if let Some(scope) = &symbol.scope_kind
            && !ALLOWED_SCOPE_KINDS.contains(&scope.as_str())
        {
            return Err(AdapterContractError(
                "Outline symbol scope_kind must be one of module, class, function.".into(),
            ));
        }
    }
    Ok(())
}

fn validate_symbol_references(references: &[SymbolReference]) -> Result<(), AdapterContractError> {
    for reference in references {
        if reference.symbol.trim().is_empty() {
            return Err(AdapterContractError(
                "Symbol reference symbol must be non-empty.".into(),
            ));
        }
        if reference.path.trim().is_empty() {
            return Err(AdapterContractError(
                "Symbol reference path must be non-empty.".into(),
            ));
        }
        if reference.line < 1 {
            return Err(AdapterContractError(
                "Symbol reference line must be >= 1.".into(),
            ));
        }
        if reference.kind.trim().is_empty() {
            return Err(AdapterContractError(
                "Symbol reference kind must be non-empty.".into(),
            ));
        }
        if reference.evidence.trim().is_empty() {
            return Err(AdapterContractError(
                "Symbol reference evidence must be non-empty.".into(),
            ));
        }
        if !ALLOWED_STRATEGIES.contains(&reference.strategy.as_str()) {
            return Err(AdapterContractError(
                "Symbol reference strategy must be one of ast, lexical.".into(),
            ));
        }
        if !ALLOWED_CONFIDENCE.contains(&reference.confidence.as_str()) {
            return Err(AdapterContractError(
                "Symbol reference confidence must be high, medium, or low.".into(),
            ));
        }
    }
    Ok(())
}

/// Normalize signatures, infer missing scope/parent, validate invariants,
/// and sort deterministically.
pub fn normalize_and_sort_symbols(
    symbols: Vec<OutlineSymbol>,
) -> Result<Vec<OutlineSymbol>, AdapterContractError> {
    let mut normalized: Vec<OutlineSymbol> =
        symbols.into_iter().map(normalize_symbol).collect();
    validate_outline_symbols(&normalized)?;
    normalized.sort_by(|a, b| symbol_sort_key(a).cmp(&symbol_sort_key(b)));
    Ok(normalized)
}

/// Validate schema invariants and sort references deterministically.
pub fn normalize_and_sort_references(
    references: Vec<SymbolReference>,
) -> Result<Vec<SymbolReference>, AdapterContractError> {
    let mut normalized: Vec<SymbolReference> = references
        .into_iter()
        .map(|reference| SymbolReference {
            symbol: normalize_optional_text(Some(&reference.symbol)).unwrap_or_default(),
            path: normalize_optional_text(Some(&reference.path)).unwrap_or_default(),
            line: reference.line,
            kind: normalize_optional_text(Some(&reference.kind)).unwrap_or_default(),
            evidence: normalize_optional_text(Some(&reference.evidence)).unwrap_or_default(),
            strategy: normalize_optional_text(Some(&reference.strategy)).unwrap_or_default(),
            confidence: normalize_optional_text(Some(&reference.confidence)).unwrap_or_default(),
        })
        .collect();
    validate_symbol_references(&normalized)?;
    normalized.sort_by(|a, b| reference_sort_key(a).cmp(&reference_sort_key(b)));
    Ok(normalized)
}

fn normalize_symbol(symbol: OutlineSymbol) -> OutlineSymbol {
    let scope_kind = normalize_optional_text(symbol.scope_kind.as_deref())
        .or_else(|| Some(infer_scope_kind(&symbol.kind).to_string()));
    let parent_symbol = normalize_optional_text(symbol.parent_symbol.as_deref())
        .or_else(|| infer_parent_symbol(&symbol.name, scope_kind.as_deref()));
    OutlineSymbol {
        signature: normalize_signature(symbol.signature.as_deref()),
        parent_symbol,
        scope_kind,
        decl_context: normalize_optional_text(symbol.decl_context.as_deref()),
        ..symbol
    }
}

fn infer_scope_kind(kind: &str) -> &'static str {
    match kind {
        "method" | "async_method" | "constructor" | "property" | "event" => "class",
        _ => "module",
    }
}

fn infer_parent_symbol(name: &str, scope_kind: Option<&str>) -> Option<String> {
    if scope_kind != Some("class") {
        return None;
    }
    let (parent, _) = name.rsplit_once('.')?;
    (!parent.is_empty()).then(|| parent.to_string())
}

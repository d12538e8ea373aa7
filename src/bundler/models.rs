//! Filepath: src/bundler/models.rs
//! Typed models for deterministic context bundles.

use std::collections::BTreeMap;

use serde::Serialize;

/// Sentinel distance used when no reference line is known for a file.
pub const UNKNOWN_DISTANCE: u64 = 1_000_000_000;

/// Context bundle budget constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BundleBudget {
    pub max_files: usize,
    pub max_total_lines: usize,
}

/// Per-hit ranking signal values, surfaced for explainability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreComponents {
    pub search_score: f64,
    pub definition_match: bool,
    pub reference_count_in_range: usize,
    pub min_definition_distance: u64,
    pub path_name_relevance: usize,
    pub range_size_penalty: usize,
}

/// Structured account of why one excerpt made the bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhySelected {
    pub matched_signals: Vec<String>,
    pub score_components: ScoreComponents,
    pub source_query: String,
    pub matched_terms: Vec<String>,
    pub symbol_reference: Option<String>,
}

/// Selected excerpt with rationale and ranking metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleSelection {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub excerpt: String,
    pub why_selected: WhySelected,
    pub rationale: String,
    pub score: f64,
    pub source_query: String,
}

/// Citation metadata for one selected excerpt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleCitation {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub selection_index: usize,
}

/// Bundle totals and truncation metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BundleTotals {
    pub selected_files: usize,
    pub selected_lines: usize,
    pub truncated: bool,
}

/// Bounded deterministic ranking debug entry for one candidate hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingDebugCandidate {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub source_query: String,
    pub selected: bool,
    pub rank_position: usize,
    pub definition_match: bool,
    pub reference_count_in_range: usize,
    pub min_definition_distance: u64,
    pub path_name_relevance: usize,
    pub search_score: f64,
    pub range_size_penalty: usize,
}

/// One candidate that was ranked but not selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCandidate {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub reason: String,
}

/// Grouped account of everything the budget left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct WhyNotSelectedSummary {
    pub total_skipped_candidates: usize,
    pub reason_counts: BTreeMap<String, usize>,
    pub top_skipped: Vec<SkippedCandidate>,
}

/// Bounded per-candidate ranking transparency.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RankingDebug {
    pub candidate_count: usize,
    pub definition_match_count: usize,
    pub reference_proximity_count: usize,
    pub top_candidates: Vec<RankingDebugCandidate>,
}

/// Selection-phase transparency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SelectionDebug {
    pub why_not_selected_summary: WhyNotSelectedSummary,
}

/// Deterministic audit details for bundling decisions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleAudit {
    pub search_queries: Vec<String>,
    pub dedupe_before: usize,
    pub dedupe_after: usize,
    pub budget_enforcement: Vec<String>,
    pub ranking_debug: RankingDebug,
    pub selection_debug: SelectionDebug,
}

/// Final deterministic bundle artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleResult {
    pub bundle_id: String,
    pub prompt_fingerprint: String,
    pub strategy: String,
    pub budget: BundleBudget,
    pub totals: BundleTotals,
    pub selections: Vec<BundleSelection>,
    pub citations: Vec<BundleCitation>,
    pub audit: BundleAudit,
}

//! Filepath: src/bundler/engine.rs
//! Deterministic context bundle assembly.
//!
//! A prompt fans out into one full query plus up to eight keyword queries
//! with a reduced retrieval budget. Hits are aligned to the smallest
//! overlapping outline symbol, deduped, ranked on multi-signal evidence
//! (definition match, reference proximity, path relevance, BM25 score,
//! range size), and selected under file/line budgets. The bundle id is a
//! pure function of the prompt and the selected content, so identical
//! inputs always produce the identical bundle.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use anyhow::{Result, bail};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::adapters::base::OutlineSymbol;
use crate::bundler::models::{
    BundleAudit, BundleBudget, BundleCitation, BundleResult, BundleSelection, BundleTotals,
    RankingDebug, RankingDebugCandidate, ScoreComponents, SelectionDebug, SkippedCandidate,
    UNKNOWN_DISTANCE, WhyNotSelectedSummary, WhySelected,
};
use crate::index::search::{SearchHit, tokenize};

const MAX_KEYWORD_QUERIES: usize = 8;
const MIN_KEYWORD_LENGTH: usize = 3;
const RANKING_DEBUG_LIMIT: usize = 20;
const SKIPPED_DEBUG_LIMIT: usize = 10;

/// Search callback: `(query, top_k) -> hits`.
pub type SearchFn<'a> = dyn Fn(&str, usize) -> Vec<SearchHit> + 'a;
/// Line reader callback for an inclusive 1-based range.
pub type ReadLinesFn<'a> = dyn Fn(&str, usize, usize) -> Result<Vec<String>> + 'a;
/// Outline callback consulted once per path (engine-side cache).
pub type OutlineFn<'a> = dyn Fn(&str) -> Vec<OutlineSymbol> + 'a;
/// Reference lookup: `(path, line)` pairs for one symbol.
pub type ReferenceLookupFn<'a> = dyn Fn(&str) -> Vec<(String, usize)> + 'a;
/// Batch reference lookup keyed by symbol.
pub type ReferenceLookupManyFn<'a> =
    dyn Fn(&[String]) -> BTreeMap<String, Vec<(String, usize)>> + 'a;
/// Batch reference lookup scoped to the paths each symbol appears in.
pub type ReferenceLookupScopedManyFn<'a> =
    dyn Fn(&BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<(String, usize)>> + 'a;
/// Optional sink for one deterministic profile payload per build.
pub type ProfileSink<'a> = dyn Fn(Value) + 'a;

/// Optional callbacks; the engine picks the most specific lookup present.
#[derive(Default)]
pub struct BundleCallbacks<'a> {
    pub outline: Option<&'a OutlineFn<'a>>,
    pub reference_lookup: Option<&'a ReferenceLookupFn<'a>>,
    pub reference_lookup_many: Option<&'a ReferenceLookupManyFn<'a>>,
    pub reference_lookup_scoped_many: Option<&'a ReferenceLookupScopedManyFn<'a>>,
    pub profile_sink: Option<&'a ProfileSink<'a>>,
}

/// Engine knobs beyond the hard budget.
#[derive(Debug, Clone)]
pub struct BundleOptions {
    pub include_tests: bool,
    pub strategy: String,
    pub top_k_per_query: usize,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            include_tests: true,
            strategy: "hybrid".to_string(),
            top_k_per_query: 20,
        }
    }
}

#[derive(Debug, Clone)]
struct Hit {
    path: String,
    start_line: usize,
    end_line: usize,
    score: f64,
    source_query: String,
    matched_terms: Vec<String>,
    aligned_symbol: Option<String>,
    ranking: Option<ScoreComponents>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SymbolRange {
    name: String,
    kind: String,
    start_line: usize,
    end_line: usize,
}

/// `symbol -> path -> sorted reference lines`.
type ReferenceLineIndex = BTreeMap<String, BTreeMap<String, Vec<usize>>>;

/// Build a deterministic context bundle from multi-query retrieval.
pub fn build_context_bundle(
    prompt: &str,
    budget: BundleBudget,
    search_fn: &SearchFn,
    read_lines_fn: &ReadLinesFn,
    options: &BundleOptions,
    callbacks: &BundleCallbacks,
) -> Result<BundleResult> {
    let started = Instant::now();
    if budget.max_files < 1 {
        bail!("budget.max_files must be >= 1");
    }
    if budget.max_total_lines < 1 {
        bail!("budget.max_total_lines must be >= 1");
    }

    let prompt_fingerprint = sha256_hex(prompt);
    let queries = build_queries(prompt);
    let prompt_terms: BTreeSet<String> = tokenize(prompt).into_iter().collect();

    // Retrieval: full prompt first, keyword queries on a reduced budget.
    let mut symbol_cache: BTreeMap<String, Vec<SymbolRange>> = BTreeMap::new();
    let mut raw_hits: Vec<Hit> = Vec::new();
    for (query_index, query) in queries.iter().enumerate() {
        let top_k = query_top_k(query_index, options.top_k_per_query);
        for hit in search_fn(query, top_k) {
            let mut candidate = Hit {
                path: hit.path,
                start_line: hit.start_line,
                end_line: hit.end_line,
                score: hit.score,
                source_query: query.clone(),
                matched_terms: {
                    let mut terms = hit.matched_terms;
                    terms.sort();
                    terms.dedup();
                    terms
                },
                aligned_symbol: None,
                ranking: None,
            };
            if !options.include_tests && looks_like_test_path(&candidate.path) {
                continue;
            }
            align_hit_to_symbol_ranges(&mut candidate, callbacks.outline, &mut symbol_cache);
            raw_hits.push(candidate);
        }
    }

    let dedupe_started = Instant::now();
    let deduped = dedupe_hits(&raw_hits);
    let dedupe_seconds = dedupe_started.elapsed().as_secs_f64();

    let ranking_started = Instant::now();
    let ranked = rank_hits(deduped, &prompt_terms, callbacks);
    let ranking_seconds = ranking_started.elapsed().as_secs_f64();

    let budget_started = Instant::now();
    let selection = select_with_budget(&ranked, budget, read_lines_fn);
    let budget_enforcement_seconds = budget_started.elapsed().as_secs_f64();

    let citations: Vec<BundleCitation> = selection
        .selections
        .iter()
        .enumerate()
        .map(|(index, selected)| BundleCitation {
            path: selected.path.clone(),
            start_line: selected.start_line,
            end_line: selected.end_line,
            selection_index: index,
        })
        .collect();

    let ranking_debug = RankingDebug {
        candidate_count: ranked.len(),
        definition_match_count: ranked
            .iter()
            .filter(|hit| hit.ranking.is_some_and(|r| r.definition_match))
            .count(),
        reference_proximity_count: ranked
            .iter()
            .filter(|hit| hit.ranking.is_some_and(|r| r.reference_count_in_range > 0))
            .count(),
        top_candidates: build_ranking_debug(&ranked, &selection.selections),
    };
    let selection_debug = SelectionDebug {
        why_not_selected_summary: build_skip_summary(&selection.skipped),
    };

    let audit = BundleAudit {
        search_queries: queries,
        dedupe_before: raw_hits.len(),
        dedupe_after: ranked.len(),
        budget_enforcement: selection.notes.clone(),
        ranking_debug,
        selection_debug,
    };
    let bundle_id = bundle_id(&prompt_fingerprint, &selection.selections, &selection.totals)?;

    let result = BundleResult {
        bundle_id,
        prompt_fingerprint,
        strategy: options.strategy.clone(),
        budget,
        totals: selection.totals,
        selections: selection.selections,
        citations,
        audit,
    };

    if let Some(sink) = callbacks.profile_sink {
        sink(json!({
            "dedupe_seconds": dedupe_seconds,
            "ranking_seconds": ranking_seconds,
            "budget_enforcement_seconds": budget_enforcement_seconds,
            "total_build_seconds": started.elapsed().as_secs_f64(),
            "dedupe_before": result.audit.dedupe_before,
            "dedupe_after": result.audit.dedupe_after,
            "ranking_candidate_count": result.audit.ranking_debug.candidate_count,
            "selected_excerpt_count": result.selections.len(),
            "selected_file_count": result.totals.selected_files,
            "budget_skipped_file_count": result
                .audit
                .selection_debug
                .why_not_selected_summary
                .reason_counts
                .get("file_budget")
                .copied()
                .unwrap_or(0),
            "budget_skipped_line_count": result
                .audit
                .selection_debug
                .why_not_selected_summary
                .reason_counts
                .get("line_budget")
                .copied()
                .unwrap_or(0),
        }));
    }
    Ok(result)
}

/// The full prompt, then deduped keyword tokens of length >= 3 in
/// tokenisation order, at most eight.
fn build_queries(prompt: &str) -> Vec<String> {
    let mut queries = vec![prompt.to_string()];
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for token in tokenize(prompt) {
        if token.len() < MIN_KEYWORD_LENGTH || seen.contains(&token) {
            continue;
        }
        seen.insert(token.clone());
        queries.push(token);
        if queries.len() > MAX_KEYWORD_QUERIES {
            break;
        }
    }
    queries
}

/// Deterministic retrieval budget per query position.
fn query_top_k(query_index: usize, base_top_k: usize) -> usize {
    if query_index == 0 {
        return base_top_k.max(1);
    }
    let keyword_top_k = (base_top_k / 4).max(5);
    keyword_top_k.min(base_top_k.max(1))
}

fn looks_like_test_path(path: &str) -> bool {
    let lowered = path.to_lowercase();
    if lowered.starts_with("tests/") || format!("/{lowered}/").contains("/tests/") {
        return true;
    }
    // `foo_test.go`, `bar_test.py`, and friends.
    let basename = lowered.rsplit('/').next().unwrap_or(&lowered);
    match basename.rsplit_once('.') {
        Some((stem, _)) => stem.ends_with("_test"),
        None => false,
    }
}

/// Replace a hit's range with the smallest overlapping outline symbol.
fn align_hit_to_symbol_ranges(
    hit: &mut Hit,
    outline_fn: Option<&OutlineFn>,
    symbol_cache: &mut BTreeMap<String, Vec<SymbolRange>>,
) {
    let Some(outline_fn) = outline_fn else { return };
    if !symbol_cache.contains_key(&hit.path) {
        let ranges: Vec<SymbolRange> = outline_fn(&hit.path)
            .into_iter()
            .filter(|symbol| symbol.start_line >= 1 && symbol.end_line >= symbol.start_line)
            .map(|symbol| SymbolRange {
                name: symbol.name,
                kind: symbol.kind,
                start_line: symbol.start_line,
                end_line: symbol.end_line,
            })
            .collect();
        symbol_cache.insert(hit.path.clone(), ranges);
    }
    let ranges = &symbol_cache[&hit.path];
    let chosen = ranges
        .iter()
        .filter(|range| !(range.end_line < hit.start_line || range.start_line > hit.end_line))
        .min_by_key(|range| {
            (
                range.end_line - range.start_line,
                range.start_line,
                range.end_line,
                range.name.clone(),
                range.kind.clone(),
            )
        });
    if let Some(symbol) = chosen {
        hit.start_line = symbol.start_line;
        hit.end_line = symbol.end_line;
        hit.aligned_symbol = Some(symbol.name.clone());
    }
}

/// Key by `(path, start, end)`; higher score wins, then the
/// lexicographically smaller source query.
fn dedupe_hits(hits: &[Hit]) -> Vec<Hit> {
    let mut best: BTreeMap<(String, usize, usize), Hit> = BTreeMap::new();
    for hit in hits {
        let key = (hit.path.clone(), hit.start_line, hit.end_line);
        match best.get(&key) {
            None => {
                best.insert(key, hit.clone());
            }
            Some(current) => {
                if hit.score > current.score
                    || (hit.score == current.score && hit.source_query < current.source_query)
                {
                    best.insert(key, hit.clone());
                }
            }
        }
    }
    best.into_values().collect()
}

fn rank_hits(hits: Vec<Hit>, prompt_terms: &BTreeSet<String>, callbacks: &BundleCallbacks) -> Vec<Hit> {
    let reference_cache = prefetch_reference_lines(&hits, callbacks);
    let mut path_relevance_cache: BTreeMap<String, usize> = BTreeMap::new();
    let mut ranked: Vec<Hit> = hits
        .into_iter()
        .map(|mut hit| {
            hit.ranking = Some(ranking_signals_for_hit(
                &hit,
                prompt_terms,
                &reference_cache,
                &mut path_relevance_cache,
            ));
            hit
        })
        .collect();
    ranked.sort_by(|a, b| rank_order(a, b));
    ranked
}

/// Prefer the scoped batch lookup, then the plain batch, then per-symbol.
fn prefetch_reference_lines(hits: &[Hit], callbacks: &BundleCallbacks) -> ReferenceLineIndex {
    let symbols: BTreeSet<String> = hits
        .iter()
        .filter_map(|hit| hit.aligned_symbol.clone())
        .filter(|symbol| !symbol.trim().is_empty())
        .collect();
    if symbols.is_empty() {
        return BTreeMap::new();
    }
    let symbol_list: Vec<String> = symbols.iter().cloned().collect();

    let grouped: BTreeMap<String, Vec<(String, usize)>> =
        if let Some(scoped_many) = callbacks.reference_lookup_scoped_many {
            let mut symbol_paths: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for symbol in &symbol_list {
                let paths: BTreeSet<String> = hits
                    .iter()
                    .filter(|hit| hit.aligned_symbol.as_deref() == Some(symbol))
                    .map(|hit| hit.path.clone())
                    .collect();
                symbol_paths.insert(symbol.clone(), paths.into_iter().collect());
            }
            scoped_many(&symbol_paths)
        } else if let Some(many) = callbacks.reference_lookup_many {
            many(&symbol_list)
        } else if let Some(single) = callbacks.reference_lookup {
            symbol_list
                .iter()
                .map(|symbol| (symbol.clone(), single(symbol)))
                .collect()
        } else {
            return BTreeMap::new();
        };

    let mut index: ReferenceLineIndex = BTreeMap::new();
    for symbol in &symbol_list {
        let mut lines_by_path: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (path, line) in grouped.get(symbol).map(Vec::as_slice).unwrap_or(&[]) {
            if *line < 1 {
                continue;
            }
            lines_by_path.entry(path.clone()).or_default().push(*line);
        }
        for lines in lines_by_path.values_mut() {
            lines.sort_unstable();
        }
        index.insert(symbol.clone(), lines_by_path);
    }
    index
}

fn ranking_signals_for_hit(
    hit: &Hit,
    prompt_terms: &BTreeSet<String>,
    reference_cache: &ReferenceLineIndex,
    path_relevance_cache: &mut BTreeMap<String, usize>,
) -> ScoreComponents {
    let definition_match = hit
        .aligned_symbol
        .as_deref()
        .map(|symbol| {
            tokenize(&symbol.replace('.', " "))
                .iter()
                .any(|token| prompt_terms.contains(token))
        })
        .unwrap_or(false);

    let (reference_count_in_range, min_definition_distance) = match &hit.aligned_symbol {
        Some(symbol) => match reference_cache.get(symbol) {
            Some(lines_by_path) => reference_proximity(hit, lines_by_path),
            None => (0, UNKNOWN_DISTANCE),
        },
        None => (0, UNKNOWN_DISTANCE),
    };

    let path_name_relevance = *path_relevance_cache
        .entry(hit.path.clone())
        .or_insert_with(|| path_name_relevance(&hit.path, prompt_terms));

    ScoreComponents {
        search_score: hit.score,
        definition_match,
        reference_count_in_range,
        min_definition_distance,
        path_name_relevance,
        range_size_penalty: hit.end_line.saturating_sub(hit.start_line) + 1,
    }
}

/// Binary-search count of reference lines inside the hit's range; when
/// none fall inside, the distance to the nearest one in the same file.
fn reference_proximity(hit: &Hit, lines_by_path: &BTreeMap<String, Vec<usize>>) -> (usize, u64) {
    let Some(lines) = lines_by_path.get(&hit.path) else {
        return (0, UNKNOWN_DISTANCE);
    };
    if lines.is_empty() {
        return (0, UNKNOWN_DISTANCE);
    }
    let left = lines.partition_point(|line| *line < hit.start_line);
    let right = lines.partition_point(|line| *line <= hit.end_line);
    let count = right - left;
    if count > 0 {
        return (count, 0);
    }
    let before = if left > 0 {
        (hit.start_line - lines[left - 1]) as u64
    } else {
        UNKNOWN_DISTANCE
    };
    let after = if left < lines.len() {
        (lines[left] - hit.end_line) as u64
    } else {
        UNKNOWN_DISTANCE
    };
    (0, before.min(after))
}

fn path_name_relevance(path: &str, prompt_terms: &BTreeSet<String>) -> usize {
    if prompt_terms.is_empty() {
        return 0;
    }
    let path_terms: BTreeSet<String> = tokenize(&path.replace(['/', '.'], " "))
        .into_iter()
        .collect();
    path_terms.intersection(prompt_terms).count()
}

/// Ascending rank order: better hits first, full deterministic tie-break.
fn rank_order(a: &Hit, b: &Hit) -> std::cmp::Ordering {
    let ra = a.ranking.expect("ranked hit");
    let rb = b.ranking.expect("ranked hit");
    (rb.definition_match as u8)
        .cmp(&(ra.definition_match as u8))
        .then_with(|| rb.reference_count_in_range.cmp(&ra.reference_count_in_range))
        .then_with(|| ra.min_definition_distance.cmp(&rb.min_definition_distance))
        .then_with(|| rb.path_name_relevance.cmp(&ra.path_name_relevance))
        .then_with(|| rb.search_score.total_cmp(&ra.search_score))
        .then_with(|| ra.range_size_penalty.cmp(&rb.range_size_penalty))
        .then_with(|| a.path.cmp(&b.path))
        .then_with(|| a.start_line.cmp(&b.start_line))
        .then_with(|| a.end_line.cmp(&b.end_line))
        .then_with(|| a.source_query.cmp(&b.source_query))
        .then_with(|| candidate_id(a).cmp(&candidate_id(b)))
}

fn candidate_id(hit: &Hit) -> String {
    format!(
        "{}:{}:{}:{}",
        hit.path, hit.start_line, hit.end_line, hit.source_query
    )
}

struct SelectionOutcome {
    selections: Vec<BundleSelection>,
    totals: BundleTotals,
    notes: Vec<String>,
    skipped: Vec<SkippedCandidate>,
}

fn select_with_budget(
    ranked: &[Hit],
    budget: BundleBudget,
    read_lines_fn: &ReadLinesFn,
) -> SelectionOutcome {
    let mut selections: Vec<BundleSelection> = Vec::new();
    let mut selected_paths: BTreeSet<String> = BTreeSet::new();
    let mut total_lines = 0usize;
    let mut truncated = false;
    let mut notes: Vec<String> = Vec::new();
    let mut skipped: Vec<SkippedCandidate> = Vec::new();

    let skip = |reason: &str,
                hit: &Hit,
                notes: &mut Vec<String>,
                skipped: &mut Vec<SkippedCandidate>| {
        notes.push(format!(
            "skipped_{reason}:{}:{}-{}",
            hit.path, hit.start_line, hit.end_line
        ));
        skipped.push(SkippedCandidate {
            path: hit.path.clone(),
            start_line: hit.start_line,
            end_line: hit.end_line,
            reason: reason.to_string(),
        });
    };

    for hit in ranked {
        let line_count = hit.end_line.saturating_sub(hit.start_line) + 1;
        if hit.end_line < hit.start_line || line_count == 0 {
            skip("zero_lines", hit, &mut notes, &mut skipped);
            continue;
        }
        let next_total = total_lines + line_count;
        let next_file_count =
            selected_paths.len() + usize::from(!selected_paths.contains(&hit.path));
        if next_file_count > budget.max_files {
            truncated = true;
            skip("file_budget", hit, &mut notes, &mut skipped);
            continue;
        }
        if next_total > budget.max_total_lines {
            truncated = true;
            skip("line_budget", hit, &mut notes, &mut skipped);
            continue;
        }

        // A failed read degrades to a skip instead of failing the bundle.
        let lines = match read_lines_fn(&hit.path, hit.start_line, hit.end_line) {
            Ok(lines) => lines,
            Err(_) => {
                skip("other", hit, &mut notes, &mut skipped);
                continue;
            }
        };
        selections.push(BundleSelection {
            path: hit.path.clone(),
            start_line: hit.start_line,
            end_line: hit.end_line,
            excerpt: lines.join("\n"),
            why_selected: build_why_selected(hit),
            rationale: build_rationale(hit),
            score: hit.score,
            source_query: hit.source_query.clone(),
        });
        selected_paths.insert(hit.path.clone());
        total_lines = next_total;
    }

    SelectionOutcome {
        selections,
        totals: BundleTotals {
            selected_files: selected_paths.len(),
            selected_lines: total_lines,
            truncated,
        },
        notes,
        skipped,
    }
}

fn build_rationale(hit: &Hit) -> String {
    let terms = if hit.matched_terms.is_empty() {
        "none".to_string()
    } else {
        hit.matched_terms.join(", ")
    };
    let rationale = format!(
        "Selected from query '{}' with score {:.6}; matched_terms={terms}.",
        hit.source_query, hit.score
    );
    match &hit.aligned_symbol {
        Some(symbol) => format!("{rationale} aligned_symbol={symbol}."),
        None => rationale,
    }
}

fn build_why_selected(hit: &Hit) -> WhySelected {
    let ranking = hit.ranking.expect("ranked hit");
    let mut matched_signals = vec!["search_score".to_string()];
    if !hit.matched_terms.is_empty() {
        matched_signals.push("matched_terms".to_string());
    }
    if ranking.definition_match {
        matched_signals.push("definition_match".to_string());
    }
    if ranking.reference_count_in_range > 0 {
        matched_signals.push("reference_proximity".to_string());
    }
    if hit.aligned_symbol.is_some() {
        matched_signals.push("aligned_symbol".to_string());
    }
    WhySelected {
        matched_signals,
        score_components: ranking,
        source_query: hit.source_query.clone(),
        matched_terms: hit.matched_terms.clone(),
        symbol_reference: hit.aligned_symbol.clone(),
    }
}

fn build_ranking_debug(ranked: &[Hit], selections: &[BundleSelection]) -> Vec<RankingDebugCandidate> {
    let selected_keys: BTreeSet<(String, usize, usize, String)> = selections
        .iter()
        .map(|selection| {
            (
                selection.path.clone(),
                selection.start_line,
                selection.end_line,
                selection.source_query.clone(),
            )
        })
        .collect();
    ranked
        .iter()
        .take(RANKING_DEBUG_LIMIT)
        .enumerate()
        .map(|(index, hit)| {
            let ranking = hit.ranking.expect("ranked hit");
            let key = (
                hit.path.clone(),
                hit.start_line,
                hit.end_line,
                hit.source_query.clone(),
            );
            RankingDebugCandidate {
                path: hit.path.clone(),
                start_line: hit.start_line,
                end_line: hit.end_line,
                source_query: hit.source_query.clone(),
                selected: selected_keys.contains(&key),
                rank_position: index + 1,
                definition_match: ranking.definition_match,
                reference_count_in_range: ranking.reference_count_in_range,
                min_definition_distance: ranking.min_definition_distance,
                path_name_relevance: ranking.path_name_relevance,
                search_score: ranking.search_score,
                range_size_penalty: ranking.range_size_penalty,
            }
        })
        .collect()
}

fn build_skip_summary(skipped: &[SkippedCandidate]) -> WhyNotSelectedSummary {
    let mut reason_counts: BTreeMap<String, usize> = BTreeMap::new();
    for candidate in skipped {
        *reason_counts.entry(candidate.reason.clone()).or_insert(0) += 1;
    }
    WhyNotSelectedSummary {
        total_skipped_candidates: skipped.len(),
        reason_counts,
        top_skipped: skipped.iter().take(SKIPPED_DEBUG_LIMIT).cloned().collect(),
    }
}

/// Bundle identity: SHA-256 over the prompt fingerprint, the totals, and
/// the canonical JSON of every selection in order.
fn bundle_id(
    prompt_fingerprint: &str,
    selections: &[BundleSelection],
    totals: &BundleTotals,
) -> Result<String> {
    let mut digest = Sha256::new();
    digest.update(prompt_fingerprint.as_bytes());
    digest.update(b"|");
    digest.update(totals.selected_files.to_string().as_bytes());
    digest.update(b"|");
    digest.update(totals.selected_lines.to_string().as_bytes());
    digest.update(b"|");
    digest.update(totals.truncated.to_string().as_bytes());
    for selection in selections {
        // Value conversion sorts keys, so the encoding is canonical.
        let payload = serde_json::to_value(selection)?;
        digest.update(payload.to_string().as_bytes());
        digest.update(b"|");
    }
    Ok(hex::encode(digest.finalize()))
}

fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

//! Filepath: src/index/search.rs
//! Deterministic BM25 search over indexed chunks.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use itertools::izip;
use regex::Regex;
use serde::Serialize;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("static pattern"));

pub const BM25_K1: f64 = 1.2;
pub const BM25_B: f64 = 0.75;

/// Searchable chunk document: path, inclusive line range, materialised text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDocument {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// Typed BM25 hit output.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub snippet: String,
    pub score: f64,
    pub matched_terms: Vec<String>,
}

/// Tokenize into deterministic lowercase alphanumeric/underscore terms.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_PATTERN
        .find_iter(text)
        .map(|found| found.as_str().to_lowercase())
        .collect()
}

/// Return ranked BM25 hits with deterministic tie-breaking.
///
/// Zero-score documents are discarded; the sort order is
/// `(-score, path, start_line)` so repeated calls return identical lists.
pub fn bm25_search(documents: &[SearchDocument], query: &str, top_k: usize) -> Vec<SearchHit> {
    let terms = tokenize(query);
    if terms.is_empty() || documents.is_empty() || top_k < 1 {
        return Vec::new();
    }

    // Sorted unique query terms keep matched_terms deterministic.
    let mut term_set: Vec<String> = terms;
    term_set.sort();
    term_set.dedup();

    let doc_tokens: Vec<Vec<String>> = documents.iter().map(|doc| tokenize(&doc.text)).collect();
    let doc_lens: Vec<usize> = doc_tokens.iter().map(Vec::len).collect();
    let total_len: usize = doc_lens.iter().sum();
    let avgdl = total_len as f64 / doc_lens.len() as f64;
    if avgdl <= 0.0 {
        return Vec::new();
    }

    // Document frequency per query term.
    let mut doc_freq: BTreeMap<&str, usize> = BTreeMap::new();
    for term in &term_set {
        let count = doc_tokens
            .iter()
            .filter(|tokens| tokens.iter().any(|token| token == term))
            .count();
        doc_freq.insert(term.as_str(), count);
    }

    let total_docs = documents.len() as f64;
    let mut scored: Vec<SearchHit> = Vec::new();
    for (doc, tokens, doc_len) in izip!(documents, &doc_tokens, &doc_lens) {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for token in tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }
        let mut score = 0.0f64;
        let mut matched_terms: Vec<String> = Vec::new();
        for term in &term_set {
            let tf = *counts.get(term.as_str()).unwrap_or(&0) as f64;
            if tf == 0.0 {
                continue;
            }
            matched_terms.push(term.clone());
            let n_qi = *doc_freq.get(term.as_str()).unwrap_or(&0) as f64;
            let idf = (1.0 + ((total_docs - n_qi + 0.5) / (n_qi + 0.5))).ln();
            let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * (*doc_len as f64 / avgdl));
            score += idf * ((tf * (BM25_K1 + 1.0)) / denom);
        }
        if score <= 0.0 {
            continue;
        }
        scored.push(SearchHit {
            path: doc.path.clone(),
            start_line: doc.start_line,
            end_line: doc.end_line,
            snippet: build_snippet(&doc.text),
            score,
            matched_terms,
        });
    }

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    scored.truncate(top_k);
    scored
}

/// Deterministic bounded snippet: first three lines, at most 300 chars.
pub fn build_snippet(text: &str) -> String {
    let snippet = text.lines().take(3).collect::<Vec<_>>().join("\n");
    if snippet.chars().count() > 300 {
        snippet.chars().take(300).collect()
    } else {
        snippet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, start: usize, text: &str) -> SearchDocument {
        SearchDocument {
            path: path.to_string(),
            start_line: start,
            end_line: start + text.lines().count().saturating_sub(1),
            text: text.to_string(),
        }
    }

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("def Parse_Input(x): return x2"),
            vec!["def", "parse_input", "x", "return", "x2"]
        );
        assert!(tokenize("---").is_empty());
    }

    #[test]
    fn matching_documents_rank_above_non_matching() {
        let docs = vec![
            doc("a.py", 1, "def parse(x):\n    return x"),
            doc("b.py", 1, "def render(y):\n    return y"),
        ];
        let hits = bm25_search(&docs, "parse", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.py");
        assert_eq!(hits[0].matched_terms, vec!["parse"]);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn ties_break_by_path_then_start_line() {
        let docs = vec![
            doc("b.py", 1, "alpha token"),
            doc("a.py", 5, "alpha token"),
            doc("a.py", 1, "alpha token"),
        ];
        let hits = bm25_search(&docs, "alpha", 5);
        let order: Vec<(&str, usize)> = hits
            .iter()
            .map(|hit| (hit.path.as_str(), hit.start_line))
            .collect();
        assert_eq!(order, vec![("a.py", 1), ("a.py", 5), ("b.py", 1)]);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let docs = vec![
            doc("a.py", 1, "service run loop"),
            doc("b.py", 1, "service stop"),
            doc("c.py", 1, "run run run"),
        ];
        let first = bm25_search(&docs, "service run", 10);
        let second = bm25_search(&docs, "service run", 10);
        let shape =
            |hits: &[SearchHit]| -> Vec<(String, usize, String)> {
                hits.iter()
                    .map(|hit| (hit.path.clone(), hit.start_line, format!("{:.12}", hit.score)))
                    .collect()
            };
        assert_eq!(shape(&first), shape(&second));
    }

    #[test]
    fn top_k_bounds_output() {
        let docs: Vec<SearchDocument> = (0..10)
            .map(|index| doc(&format!("f{index}.py"), 1, "needle"))
            .collect();
        assert_eq!(bm25_search(&docs, "needle", 3).len(), 3);
        assert!(bm25_search(&docs, "needle", 0).is_empty());
    }

    #[test]
    fn snippet_is_bounded() {
        let text = format!("{}\nsecond\nthird\nfourth", "x".repeat(400));
        let snippet = build_snippet(&text);
        assert_eq!(snippet.chars().count(), 300);
        assert!(!snippet.contains("fourth"));
    }

    #[test]
    fn matched_terms_are_sorted_and_deduped() {
        let docs = vec![doc("a.py", 1, "beta alpha beta")];
        let hits = bm25_search(&docs, "beta alpha beta", 5);
        assert_eq!(hits[0].matched_terms, vec!["alpha", "beta"]);
    }
}

//! Filepath: src/adapters/lexical.rs
//! Deterministic lexical scanning shared by every non-AST adapter.
//!
//! The masker blanks comment and string interiors while preserving line
//! count and per-line character offsets, so downstream regexes and the
//! brace scanner operate on positions that map 1:1 back to the original
//! text. Matching is greedy by marker length (triple quotes win over
//! single), escapes follow the odd-backslash rule for single-character
//! delimiters only, and unterminated regions mask to end of file.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::adapters::base::{
    AdapterContractError, SymbolReference, normalize_and_sort_references,
};

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*").expect("static pattern"));
static IMPORT_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:import|from|using|use|require|include)\b").expect("static pattern")
});
static INHERITANCE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:extends|implements|inherits)\b|:\s*(?:public|private)\b")
        .expect("static pattern")
});

const EVIDENCE_MAX_CHARS: usize = 160;

/// Declaration keywords that make a line a definition, not a usage.
const DECLARATION_KEYWORDS: &str =
    "class|struct|interface|enum|record|trait|type|namespace|package|module|impl|func|fn|def";

/// Configurable lexical markers used while masking non-code text.
#[derive(Debug, Clone)]
pub struct LexicalRules {
    pub line_comment_prefixes: Vec<&'static str>,
    pub block_comment_pairs: Vec<(&'static str, &'static str)>,
    pub string_delimiters: Vec<&'static str>,
    pub escape_char: char,
}

impl Default for LexicalRules {
    fn default() -> Self {
        Self {
            line_comment_prefixes: vec!["//", "#"],
            block_comment_pairs: vec![("/*", "*/")],
            string_delimiters: vec!["'''", "\"\"\"", "'", "\"", "`"],
            escape_char: '\\',
        }
    }
}

/// Identifier token with 1-based line/column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalToken {
    pub text: String,
    pub line: usize,
    pub start_col: usize,
    pub end_col: usize,
}

/// Matched brace block range with nesting depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BraceBlock {
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
    pub depth: usize,
}

/// Result of deterministic brace scanning; never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BraceScanResult {
    pub blocks: Vec<BraceBlock>,
    pub unmatched_closing: usize,
    pub unclosed_opening: usize,
}

enum MaskState {
    Code,
    LineComment,
    BlockComment(&'static str),
    StringLiteral(&'static str),
}

/// Mask comments and strings while preserving line count and character
/// offsets. Every masked character becomes a space; newlines pass through.
pub fn mask_comments_and_strings(text: &str, rules: &LexicalRules) -> String {
    // Longest markers first so `'''` beats `'` and `/*` beats `/`.
    let mut line_prefixes = rules.line_comment_prefixes.clone();
    line_prefixes.retain(|marker| !marker.is_empty());
    line_prefixes.sort_by_key(|marker| std::cmp::Reverse(marker.len()));
    let mut block_pairs = rules.block_comment_pairs.clone();
    block_pairs.retain(|(start, end)| !start.is_empty() && !end.is_empty());
    block_pairs.sort_by_key(|(start, _)| std::cmp::Reverse(start.len()));
    let mut string_delimiters = rules.string_delimiters.clone();
    string_delimiters.retain(|marker| !marker.is_empty());
    string_delimiters.sort_by_key(|marker| std::cmp::Reverse(marker.len()));

    let chars: Vec<char> = text.chars().collect();
    let mut output = chars.clone();
    let mut state = MaskState::Code;
    let mut index = 0usize;

    while index < chars.len() {
        match state {
            MaskState::Code => {
                if let Some(marker) = match_any(&chars, index, &line_prefixes) {
                    blank(&mut output, index, marker.len());
                    index += marker.len();
                    state = MaskState::LineComment;
                    continue;
                }
                if let Some((start, end)) = match_block(&chars, index, &block_pairs) {
                    blank(&mut output, index, start.len());
                    index += start.len();
                    state = MaskState::BlockComment(end);
                    continue;
                }
                if let Some(marker) = match_any(&chars, index, &string_delimiters) {
                    blank(&mut output, index, marker.len());
                    index += marker.len();
                    state = MaskState::StringLiteral(marker);
                    continue;
                }
                index += 1;
            }
            MaskState::LineComment => {
                if chars[index] == '\n' {
                    state = MaskState::Code;
                } else {
                    output[index] = ' ';
                }
                index += 1;
            }
            MaskState::BlockComment(end_marker) => {
                if starts_with(&chars, index, end_marker) {
                    blank(&mut output, index, end_marker.len());
                    index += end_marker.len();
                    state = MaskState::Code;
                } else {
                    if chars[index] != '\n' {
                        output[index] = ' ';
                    }
                    index += 1;
                }
            }
            MaskState::StringLiteral(marker) => {
                if starts_with(&chars, index, marker)
                    && !is_escaped(&chars, index, marker, rules.escape_char)
                {
                    blank(&mut output, index, marker.len());
                    index += marker.len();
                    state = MaskState::Code;
                } else {
                    if chars[index] != '\n' {
                        output[index] = ' ';
                    }
                    index += 1;
                }
            }
        }
    }

    output.into_iter().collect()
}

/// Extract deterministic identifier tokens from already-masked text.
pub fn extract_identifier_tokens(masked_text: &str) -> Vec<LexicalToken> {
    let mut tokens = Vec::new();
    for (line_offset, raw_line) in masked_text.lines().enumerate() {
        for found in IDENTIFIER_PATTERN.find_iter(raw_line) {
            // Columns are 1-based character positions, not byte offsets.
            let start_col = raw_line[..found.start()].chars().count() + 1;
            let end_col = start_col + found.as_str().chars().count() - 1;
            tokens.push(LexicalToken {
                text: found.as_str().to_string(),
                line: line_offset + 1,
                start_col,
                end_col,
            });
        }
    }
    tokens
}

/// Scan brace block ranges with deterministic line/column accounting.
/// Unbalanced input is reported in the counters, never an error.
pub fn scan_brace_blocks(masked_text: &str, open_char: char, close_char: char) -> BraceScanResult {
    let mut stack: Vec<(usize, usize, usize)> = Vec::new();
    let mut blocks: Vec<BraceBlock> = Vec::new();
    let mut line = 1usize;
    let mut col = 1usize;
    let mut unmatched_closing = 0usize;

    for character in masked_text.chars() {
        if character == open_char {
            let depth = stack.len() + 1;
            stack.push((line, col, depth));
        } else if character == close_char {
            match stack.pop() {
                None => unmatched_closing += 1,
                Some((start_line, start_col, depth)) => blocks.push(BraceBlock {
                    start_line,
                    start_col,
                    end_line: line,
                    end_col: col,
                    depth,
                }),
            }
        }

        if character == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    let unclosed_opening = stack.len();
    blocks.sort_by_key(|block| {
        (
            block.start_line,
            block.start_col,
            block.end_line,
            block.end_col,
            block.depth,
        )
    });
    BraceScanResult {
        blocks,
        unmatched_closing,
        unclosed_opening,
    }
}

/// Brace depth at the start of each line of masked text.
pub fn line_depths(masked_text: &str) -> Vec<usize> {
    let mut depths = Vec::new();
    let mut depth = 0usize;
    for line in masked_text.lines() {
        depths.push(depth);
        for character in line.chars() {
            if character == '{' {
                depth += 1;
            } else if character == '}' {
                depth = depth.saturating_sub(1);
            }
        }
    }
    depths
}

/// Largest block end line per block start line of masked text.
pub fn block_end_by_start_line(masked_text: &str) -> BTreeMap<usize, usize> {
    let mut mapping: BTreeMap<usize, usize> = BTreeMap::new();
    for block in scan_brace_blocks(masked_text, '{', '}').blocks {
        let entry = mapping.entry(block.start_line).or_insert(block.end_line);
        if block.end_line > *entry {
            *entry = block.end_line;
        }
    }
    mapping
}

/// Shared lexical reference resolution for a batch of symbols.
///
/// Each supported file is masked once; per-line identifier sets drive
/// candidate matching for every symbol. A line counts as a reference when
/// the dotted symbol sequence appears, or the short name appears together
/// with a call site, a `new` instantiation, an import hint, or an
/// inheritance hint. Declaration lines of the short name are excluded.
pub fn references_for_symbols_lexical(
    symbols: &[String],
    files: &[(String, String)],
    supports_path: &dyn Fn(&str) -> bool,
    top_k: Option<usize>,
) -> Result<BTreeMap<String, Vec<SymbolReference>>, AdapterContractError> {
    let rules = LexicalRules::default();
    let mut grouped: BTreeMap<String, Vec<SymbolReference>> = BTreeMap::new();
    let queries: Vec<Option<SymbolQuery>> = symbols
        .iter()
        .map(|symbol| SymbolQuery::compile(symbol))
        .collect();
    for symbol in symbols {
        grouped.entry(symbol.clone()).or_default();
    }

    for (path, text) in files {
        if !supports_path(path) {
            continue;
        }
        let masked = mask_comments_and_strings(text, &rules);
        let original_lines: Vec<&str> = text.lines().collect();
        let masked_lines: Vec<&str> = masked.lines().collect();
        // Identifier index per line, shared across symbols.
        let line_identifiers: Vec<BTreeSet<&str>> = masked_lines
            .iter()
            .map(|line| {
                IDENTIFIER_PATTERN
                    .find_iter(line)
                    .map(|found| found.as_str())
                    .collect()
            })
            .collect();

        for (symbol, query) in symbols.iter().zip(&queries) {
            let Some(query) = query else { continue };
            for (index, masked_line) in masked_lines.iter().enumerate() {
                let Some((kind, confidence)) =
                    query.classify_line(masked_line, &line_identifiers[index])
                else {
                    continue;
                };
                let evidence = bounded_evidence(original_lines.get(index).unwrap_or(&""));
                if evidence.is_empty() {
                    continue;
                }
                grouped.get_mut(symbol).expect("seeded above").push(SymbolReference {
                    symbol: symbol.clone(),
                    path: path.clone(),
                    line: index + 1,
                    kind: kind.to_string(),
                    evidence,
                    strategy: "lexical".to_string(),
                    confidence: confidence.to_string(),
                });
            }
        }
    }

    for references in grouped.values_mut() {
        let mut sorted = normalize_and_sort_references(std::mem::take(references))?;
        if let Some(limit) = top_k
            && limit >= 1
        {
            sorted.truncate(limit);
        }
        *references = sorted;
    }
    Ok(grouped)
}

/// Single-symbol convenience wrapper over the batch resolver.
pub fn references_for_symbol_lexical(
    symbol: &str,
    files: &[(String, String)],
    supports_path: &dyn Fn(&str) -> bool,
    top_k: Option<usize>,
) -> Result<Vec<SymbolReference>, AdapterContractError> {
    let grouped = references_for_symbols_lexical(
        std::slice::from_ref(&symbol.to_string()),
        files,
        supports_path,
        top_k,
    )?;
    Ok(grouped.into_values().next().unwrap_or_default())
}

/// Compiled per-symbol matching patterns, built once per request.
struct SymbolQuery {
    short_name: String,
    dotted: Option<Regex>,
    declaration: Regex,
    call_site: Regex,
    instantiation: Regex,
}

impl SymbolQuery {
    fn compile(symbol: &str) -> Option<Self> {
        let trimmed = symbol.trim();
        if trimmed.is_empty() {
            return None;
        }
        let short_name = trimmed
            .rsplit("::")
            .next()
            .unwrap_or(trimmed)
            .rsplit('.')
            .next()
            .unwrap_or(trimmed)
            .to_string();
        if short_name.is_empty() {
            return None;
        }
        let escaped_short = regex::escape(&short_name);
        let dotted = if trimmed.contains('.') || trimmed.contains("::") {
            // Accept either separator style for the full dotted sequence.
            let segments: Vec<String> = trimmed
                .split(['.'])
                .flat_map(|piece| piece.split("::"))
                .filter(|piece| !piece.is_empty())
                .map(|piece| regex::escape(piece))
                .collect();
            let pattern = format!(r"\b{}\b", segments.join(r"(?:\.|::)"));
            Some(Regex::new(&pattern).ok()?)
        } else {
            None
        };
        Some(Self {
            declaration: Regex::new(&format!(
                r"\b(?:{DECLARATION_KEYWORDS})\s+{escaped_short}\b"
            ))
            .ok()?,
            call_site: Regex::new(&format!(r"\b{escaped_short}\s*\(")).ok()?,
            instantiation: Regex::new(&format!(r"\bnew\s+{escaped_short}\b")).ok()?,
            short_name,
            dotted,
        })
    }

    /// Classify one masked line, or None when it is not a reference.
    fn classify_line(
        &self,
        masked_line: &str,
        identifiers: &BTreeSet<&str>,
    ) -> Option<(&'static str, &'static str)> {
        let short_present = identifiers.contains(self.short_name.as_str());
        let dotted_present = self
            .dotted
            .as_ref()
            .map(|pattern| pattern.is_match(masked_line))
            .unwrap_or(false);
        if !short_present && !dotted_present {
            return None;
        }
        if self.declaration.is_match(masked_line) {
            return None;
        }

        let import_hint = IMPORT_HINT.is_match(masked_line);
        let inheritance_hint = INHERITANCE_HINT.is_match(masked_line);
        let instantiation_hint = self.instantiation.is_match(masked_line);
        let call_hint = self.call_site.is_match(masked_line);
        if short_present || dotted_present {
            if import_hint {
                return Some(("import", "high"));
            }
            if inheritance_hint {
                return Some(("inheritance", "high"));
            }
            if instantiation_hint {
                return Some(("instantiation", "high"));
            }
            if call_hint {
                return Some(("call", "medium"));
            }
        }
        // No hint: only a full dotted sequence still counts, as a read.
        dotted_present.then_some(("read", "low"))
    }
}

/// Evidence line: trimmed, whitespace collapsed, bounded to 160 chars.
fn bounded_evidence(original_line: &str) -> String {
    let collapsed = original_line.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > EVIDENCE_MAX_CHARS {
        collapsed.chars().take(EVIDENCE_MAX_CHARS).collect()
    } else {
        collapsed
    }
}

fn blank(output: &mut [char], index: usize, len: usize) {
    for offset in 0..len {
        output[index + offset] = ' ';
    }
}

fn starts_with(chars: &[char], index: usize, marker: &str) -> bool {
    let marker_chars: Vec<char> = marker.chars().collect();
    chars.len() >= index + marker_chars.len()
        && chars[index..index + marker_chars.len()] == marker_chars[..]
}

fn match_any<'m>(chars: &[char], index: usize, markers: &[&'m str]) -> Option<&'m str> {
    markers
        .iter()
        .copied()
        .find(|marker| starts_with(chars, index, marker))
}

fn match_block<'m>(
    chars: &[char],
    index: usize,
    pairs: &[(&'m str, &'m str)],
) -> Option<(&'m str, &'m str)> {
    pairs
        .iter()
        .copied()
        .find(|(start, _)| starts_with(chars, index, start))
}

fn is_escaped(chars: &[char], index: usize, marker: &str, escape_char: char) -> bool {
    // Multi-character delimiters cannot be escaped.
    if marker.chars().count() > 1 {
        return false;
    }
    let mut backslashes = 0usize;
    let mut cursor = index;
    while cursor > 0 && chars[cursor - 1] == escape_char {
        backslashes += 1;
        cursor -= 1;
    }
    backslashes % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mask(text: &str) -> String {
        mask_comments_and_strings(text, &LexicalRules::default())
    }

    #[test]
    fn masks_line_comments_preserving_offsets() {
        let masked = mask("code // comment\nnext");
        assert_eq!(masked, "code           \nnext");
        assert_eq!(masked.len(), "code // comment\nnext".len());
    }

    #[test]
    fn masks_block_comments_across_lines() {
        let masked = mask("a /* one\ntwo */ b");
        assert_eq!(masked, "a       \n       b");
    }

    #[test]
    fn masks_strings_and_honours_escapes() {
        let source = r#"x = "a \" b" + y"#;
        let masked = mask(source);
        // The escaped quote does not terminate the string.
        assert_eq!(masked.chars().count(), source.chars().count());
        assert!(!masked.contains('b'));
        assert!(masked.ends_with("+ y"));

        // Even escape count means the delimiter closes.
        let source = r#"x = "a \\" + y"#;
        let masked = mask(source);
        assert_eq!(masked.chars().count(), source.chars().count());
        assert!(masked.ends_with("+ y"));
    }

    #[test]
    fn triple_quotes_win_over_single() {
        let masked = mask("s = '''it's fine''' tail");
        assert!(masked.contains("tail"));
        assert!(!masked.contains("fine"));
    }

    #[test]
    fn unterminated_regions_mask_to_eof() {
        assert_eq!(mask("a /* open\nstill"), "a        \n     ");
        assert_eq!(mask("a \"open\nstill"), "a      \n     ");
    }

    #[test]
    fn comment_markers_inside_strings_are_inert() {
        let masked = mask("p = \"// not a comment\"; q()");
        assert!(masked.contains("q()"));
        assert!(!masked.contains("not a comment"));
    }

    #[test]
    fn identifier_tokens_carry_line_and_columns() {
        let tokens = extract_identifier_tokens("alpha beta\n  $gamma");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].text, "alpha");
        assert_eq!((tokens[0].line, tokens[0].start_col, tokens[0].end_col), (1, 1, 5));
        assert_eq!(tokens[1].text, "beta");
        assert_eq!((tokens[1].line, tokens[1].start_col), (1, 7));
        assert_eq!(tokens[2].text, "$gamma");
        assert_eq!((tokens[2].line, tokens[2].start_col), (2, 3));
    }

    #[test]
    fn brace_scan_reports_blocks_and_imbalance() {
        let result = scan_brace_blocks("fn a() {\n  if x {\n  }\n}\n}", '{', '}');
        assert_eq!(result.blocks.len(), 2);
        assert_eq!(result.unmatched_closing, 1);
        assert_eq!(result.unclosed_opening, 0);
        let outer = result.blocks.iter().find(|b| b.depth == 1).unwrap();
        assert_eq!((outer.start_line, outer.end_line), (1, 4));
        let inner = result.blocks.iter().find(|b| b.depth == 2).unwrap();
        assert_eq!((inner.start_line, inner.end_line), (2, 3));

        let open = scan_brace_blocks("{ {", '{', '}');
        assert_eq!(open.unclosed_opening, 2);
    }

    #[test]
    fn line_depths_track_nesting() {
        assert_eq!(line_depths("a {\n b {\n }\n}\n"), vec![0, 1, 2, 1]);
    }

    fn files(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(path, text)| (path.to_string(), text.to_string()))
            .collect()
    }

    #[test]
    fn lexical_references_classify_by_hint() {
        let fixture = files(&[(
            "app.go",
            "import service\n\
             s := new Service\n\
             service.Run(ctx)\n\
             result := Run(1)\n\
             type Runner struct {}\n",
        )]);
        let refs = references_for_symbol_lexical("Run", &fixture, &|_| true, None).unwrap();
        let kinds: Vec<(&str, usize)> = refs
            .iter()
            .map(|r| (r.kind.as_str(), r.line))
            .collect();
        // Line 3 is a call on the dotted form, line 4 a plain call.
        assert!(kinds.contains(&("call", 3)));
        assert!(kinds.contains(&("call", 4)));
        for reference in &refs {
            assert_eq!(reference.strategy, "lexical");
        }
    }

    #[test]
    fn declaration_lines_are_excluded() {
        let fixture = files(&[(
            "Service.java",
            "class Service {}\npublic Service make() { return new Service(); }\n",
        )]);
        let refs = references_for_symbol_lexical("Service", &fixture, &|_| true, None).unwrap();
        assert!(refs.iter().all(|r| r.line != 1));
        let usage = refs.iter().find(|r| r.line == 2).unwrap();
        assert_eq!(usage.kind, "instantiation");
        assert_eq!(usage.confidence, "high");
    }

    #[test]
    fn import_hint_ranks_high() {
        let fixture = files(&[("m.ts", "import { Service } from './svc';\n")]);
        let refs = references_for_symbol_lexical("Service", &fixture, &|_| true, None).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "import");
        assert_eq!(refs[0].confidence, "high");
    }

    #[test]
    fn dotted_sequence_matches_either_separator() {
        let fixture = files(&[
            ("a.java", "value = Service.run();\n"),
            ("b.rs", "let v = Service::run();\n"),
        ]);
        let refs =
            references_for_symbol_lexical("Service.run", &fixture, &|_| true, None).unwrap();
        let paths: Vec<&str> = refs.iter().map(|r| r.path.as_str()).collect();
        assert!(paths.contains(&"a.java"));
        assert!(paths.contains(&"b.rs"));
    }

    #[test]
    fn evidence_is_collapsed_and_bounded() {
        let long_tail = "x".repeat(400);
        let fixture = files(&[(
            "w.cs",
            format!("    var s   =   new Widget();   // {long_tail}\n").as_str(),
        )]);
        let refs = references_for_symbol_lexical("Widget", &fixture, &|_| true, None).unwrap();
        assert_eq!(refs[0].kind, "instantiation");
        assert!(refs[0].evidence.starts_with("var s = new Widget();"));
        assert!(refs[0].evidence.chars().count() <= 160);
    }

    #[test]
    fn batch_resolver_groups_by_symbol() {
        let fixture = files(&[("m.go", "Run(1)\nStop(2)\n")]);
        let grouped = references_for_symbols_lexical(
            &["Run".to_string(), "Stop".to_string(), "Missing".to_string()],
            &fixture,
            &|_| true,
            None,
        )
        .unwrap();
        assert_eq!(grouped["Run"].len(), 1);
        assert_eq!(grouped["Stop"].len(), 1);
        assert!(grouped["Missing"].is_empty());
    }

    proptest! {
        /// Masking never changes length in characters or line structure.
        #[test]
        fn mask_preserves_shape(text in "[ -~\n]{0,200}") {
            let masked = mask(&text);
            prop_assert_eq!(masked.chars().count(), text.chars().count());
            prop_assert_eq!(masked.lines().count(), text.lines().count());
            // Newlines survive in place.
            let original_newlines: Vec<usize> = text
                .char_indices().filter(|(_, c)| *c == '\n').map(|(i, _)| i).collect();
            let masked_newlines: Vec<usize> = masked
                .char_indices().filter(|(_, c)| *c == '\n').map(|(i, _)| i).collect();
            prop_assert_eq!(original_newlines, masked_newlines);
        }
    }
}

//! Filepath: src/adapters/rust.rs
//! Lexical Rust adapter for deterministic symbol outlining.
//!
//! Top-level items match at brace depth 0; impl methods match at depth 1
//! inside their impl block and are named `Target.method`.

use std::sync::LazyLock;

use regex::Regex;

use crate::adapters::base::{
    AdapterContractError, LanguageAdapter, OutlineSymbol, SymbolReference,
    normalize_and_sort_symbols,
};
use crate::adapters::lexical::{
    LexicalRules, block_end_by_start_line, line_depths, mask_comments_and_strings,
    references_for_symbol_lexical, references_for_symbols_lexical,
};

static MOD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:pub\s+)?mod\s+([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern"));
static STRUCT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub\s+)?struct\s+([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern")
});
static ENUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:pub\s+)?enum\s+([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern"));
static TRAIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub\s+)?trait\s+([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern")
});
static CONST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?const\s+([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern")
});
static TYPE_ALIAS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub\s+)?type\s+([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern")
});
static FN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?:<[^>]*>)?\s*\(([^)]*)\)",
    )
    .expect("pattern")
});
static IMPL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*impl(?:<[^>]+>)?\s+(.+?)\s*\{").expect("pattern"));
static GENERIC_ARGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("pattern"));
static TRAILING_IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)$").expect("pattern"));

fn rust_rules() -> LexicalRules {
    // Single quotes stay live: masking lifetimes like 'a would eat code.
    LexicalRules {
        line_comment_prefixes: vec!["//"],
        block_comment_pairs: vec![("/*", "*/")],
        string_delimiters: vec!["\""],
        escape_char: '\\',
    }
}

/// Deterministic lexical adapter for Rust source files.
pub struct RustLexicalAdapter;

impl LanguageAdapter for RustLexicalAdapter {
    fn name(&self) -> &'static str {
        "rust_lexical"
    }

    fn supports_path(&self, path: &str) -> bool {
        path.to_lowercase().ends_with(".rs")
    }

    /// Extract top-level Rust items and impl methods deterministically.
    fn outline(
        &self,
        _path: &str,
        text: &str,
    ) -> Result<Vec<OutlineSymbol>, AdapterContractError> {
        let masked = mask_comments_and_strings(text, &rust_rules());
        let lines: Vec<&str> = masked.lines().collect();
        let depth_before = line_depths(&masked);
        let block_ends = block_end_by_start_line(&masked);

        let mut symbols: Vec<OutlineSymbol> = Vec::new();
        let mut impl_blocks: Vec<(usize, usize, Option<String>)> = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            let line_number = index + 1;
            if depth_before[index] != 0 {
                continue;
            }
            let end = |same_line: bool| {
                if same_line {
                    line_number
                } else {
                    block_ends
                        .get(&line_number)
                        .copied()
                        .unwrap_or(line_number)
                        .max(line_number)
                }
            };

            if let Some(found) = MOD_RE.captures(line) {
                symbols.push(OutlineSymbol::new("mod", found[1].to_string(), line_number, end(false)));
                continue;
            }
            if let Some(found) = STRUCT_RE.captures(line) {
                symbols.push(OutlineSymbol::new(
                    "struct",
                    found[1].to_string(),
                    line_number,
                    end(false),
                ));
                continue;
            }
            if let Some(found) = ENUM_RE.captures(line) {
                symbols.push(OutlineSymbol::new("enum", found[1].to_string(), line_number, end(false)));
                continue;
            }
            if let Some(found) = TRAIT_RE.captures(line) {
                symbols.push(OutlineSymbol::new(
                    "trait",
                    found[1].to_string(),
                    line_number,
                    end(false),
                ));
                continue;
            }
            if let Some(found) = IMPL_RE.captures(line) {
                let impl_target = parse_impl_target(&found[1]);
                let impl_end = end(false);
                symbols.push(OutlineSymbol::new(
                    "impl",
                    impl_target.clone().unwrap_or_else(|| "impl".to_string()),
                    line_number,
                    impl_end,
                ));
                impl_blocks.push((line_number, impl_end, impl_target));
                continue;
            }
            if let Some(found) = FN_RE.captures(line) {
                symbols.push(
                    OutlineSymbol::new("function", found[1].to_string(), line_number, end(false))
                        .with_signature(Some(format!("({})", found[2].trim()))),
                );
                continue;
            }
            if let Some(found) = CONST_RE.captures(line) {
                symbols.push(OutlineSymbol::new(
                    "const",
                    found[1].to_string(),
                    line_number,
                    line_number,
                ));
                continue;
            }
            if let Some(found) = TYPE_ALIAS_RE.captures(line) {
                symbols.push(OutlineSymbol::new(
                    "type",
                    found[1].to_string(),
                    line_number,
                    line_number,
                ));
            }
        }

        for (impl_start, impl_end, impl_target) in impl_blocks {
            extract_impl_methods(
                &lines,
                &depth_before,
                &block_ends,
                impl_start,
                impl_end,
                impl_target.as_deref(),
                &mut symbols,
            );
        }

        normalize_and_sort_symbols(symbols)
    }

    fn references_for_symbol(
        &self,
        symbol: &str,
        files: &[(String, String)],
        top_k: Option<usize>,
    ) -> Result<Vec<SymbolReference>, AdapterContractError> {
        references_for_symbol_lexical(symbol, files, &|path| self.supports_path(path), top_k)
    }

    fn references_for_symbols(
        &self,
        symbols: &[String],
        files: &[(String, String)],
        top_k: Option<usize>,
    ) -> Result<std::collections::BTreeMap<String, Vec<SymbolReference>>, AdapterContractError>
    {
        references_for_symbols_lexical(symbols, files, &|path| self.supports_path(path), top_k)
    }
}

/// Reduce an impl head to its target type name: `Display for Point` ->
/// `Point`, generics and references stripped.
fn parse_impl_target(impl_head: &str) -> Option<String> {
    let mut part = impl_head.split(" where ").next().unwrap_or(impl_head).trim();
    if let Some((_, target)) = part.split_once(" for ") {
        part = target.trim();
    }
    let cleaned = GENERIC_ARGS_RE.replace_all(part, "");
    let cleaned = cleaned
        .trim()
        .trim_start_matches('&')
        .trim_start_matches("mut ")
        .trim();
    if cleaned.is_empty() {
        return None;
    }
    TRAILING_IDENT_RE
        .captures(cleaned)
        .map(|found| found[1].to_string())
}

fn extract_impl_methods(
    lines: &[&str],
    depth_before: &[usize],
    block_ends: &std::collections::BTreeMap<usize, usize>,
    impl_start: usize,
    impl_end: usize,
    impl_target: Option<&str>,
    symbols: &mut Vec<OutlineSymbol>,
) {
    let start = impl_start + 1;
    let end = impl_end.min(lines.len());
    for line_number in start..=end {
        if depth_before[line_number - 1] != 1 {
            continue;
        }
        let Some(found) = FN_RE.captures(lines[line_number - 1]) else {
            continue;
        };
        let prefix = impl_target.unwrap_or("impl");
        let method_end = block_ends
            .get(&line_number)
            .copied()
            .unwrap_or(line_number)
            .max(line_number);
        symbols.push(
            OutlineSymbol::new(
                "method",
                format!("{prefix}.{}", &found[1]),
                line_number,
                method_end,
            )
            .with_signature(Some(format!("({})", found[2].trim()))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
pub mod codec;

pub struct Frame {
    len: usize,
}

pub enum Mode {
    Fast,
    Safe,
}

pub trait Encode {
    fn encode(&self) -> Vec<u8>;
}

impl Frame {
    pub fn new(len: usize) -> Self {
        Self { len }
    }

    fn grow(&mut self, by: usize) {
        self.len += by;
    }
}

impl Encode for Frame {
    fn encode(&self) -> Vec<u8> {
        vec![]
    }
}

pub const MAX_LEN: usize = 1024;

pub type Result<T> = std::result::Result<T, Error>;

pub async fn run_codec(input: &[u8]) -> usize {
    input.len()
}
";

    #[test]
    fn outline_covers_items_and_impl_methods() {
        let symbols = RustLexicalAdapter.outline("frame.rs", SOURCE).unwrap();
        let pairs: Vec<(&str, &str)> = symbols
            .iter()
            .map(|s| (s.kind.as_str(), s.name.as_str()))
            .collect();
        assert!(pairs.contains(&("mod", "codec")));
        assert!(pairs.contains(&("struct", "Frame")));
        assert!(pairs.contains(&("enum", "Mode")));
        assert!(pairs.contains(&("trait", "Encode")));
        assert!(pairs.contains(&("impl", "Frame")));
        assert!(pairs.contains(&("method", "Frame.new")));
        assert!(pairs.contains(&("method", "Frame.grow")));
        assert!(pairs.contains(&("method", "Frame.encode")));
        assert!(pairs.contains(&("const", "MAX_LEN")));
        assert!(pairs.contains(&("type", "Result")));
        assert!(pairs.contains(&("function", "run_codec")));
    }

    #[test]
    fn trait_impl_methods_take_the_target_name() {
        let symbols = RustLexicalAdapter.outline("frame.rs", SOURCE).unwrap();
        let encode = symbols
            .iter()
            .find(|s| s.kind == "method" && s.name == "Frame.encode")
            .unwrap();
        assert_eq!(encode.parent_symbol.as_deref(), Some("Frame"));
        assert_eq!(encode.scope_kind.as_deref(), Some("class"));
    }

    #[test]
    fn impl_target_parsing_handles_generics_and_for() {
        assert_eq!(parse_impl_target("Frame"), Some("Frame".to_string()));
        assert_eq!(parse_impl_target("Encode for Frame"), Some("Frame".to_string()));
        assert_eq!(
            parse_impl_target("Encode for Wrapper<T>"),
            Some("Wrapper".to_string())
        );
        assert_eq!(
            parse_impl_target("Iterator for &mut Cursor"),
            Some("Cursor".to_string())
        );
    }

    #[test]
    fn lifetimes_do_not_break_masking() {
        let source = "pub fn take<'a>(input: &'a str) -> &'a str {\n    input\n}\n";
        let symbols = RustLexicalAdapter.outline("l.rs", source).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "take");
    }

    #[test]
    fn nested_functions_are_not_top_level() {
        let source = "fn outer() {\n    fn inner() {}\n}\n";
        let symbols = RustLexicalAdapter.outline("n.rs", source).unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["outer"]);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let first = RustLexicalAdapter.outline("frame.rs", SOURCE).unwrap();
        let second = RustLexicalAdapter.outline("frame.rs", SOURCE).unwrap();
        assert_eq!(first, second);
    }
}

//! Filepath: src/adapters/java.rs
//! Lexical Java adapter for deterministic symbol outlining.

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

static PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*package\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*;")
        .expect("pattern")
});
static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|protected|private|abstract|final|static|sealed|non-sealed|strictfp)\s+)*(class|interface|enum|record)\s+([A-Za-z_][A-Za-z0-9_]*)\b",
    )
    .expect("pattern")
});
static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:@[A-Za-z_][A-Za-z0-9_]*(?:\([^)]*\))?\s*)*(?:(?:public|protected|private|abstract|final|static|synchronized|native|strictfp|default)\s+)*(?:(?:<[^>]+>\s*)?([A-Za-z_][A-Za-z0-9_<>\[\], ?.]*?)\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*(?:throws\s+[A-Za-z0-9_.,\s]+)?\s*([;{])",
    )
    .expect("pattern")
});

const METHOD_SKIP: &[&str] = &["if", "for", "while", "switch", "catch", "return", "new"];

fn java_rules() -> LexicalRules {
    LexicalRules {
        line_comment_prefixes: vec!["//"],
        block_comment_pairs: vec![("/*", "*/")],
        string_delimiters: vec!["\"", "'"],
        escape_char: '\\',
    }
}

struct JavaTypeBlock {
    name: String,
    qualified_name: String,
    start_line: usize,
    end_line: usize,
    depth: usize,
}

/// Deterministic lexical adapter for Java source files.
pub struct JavaLexicalAdapter;

impl LanguageAdapter for JavaLexicalAdapter {
    fn name(&self) -> &'static str {
        "java_lexical"
    }

    fn supports_path(&self, path: &str) -> bool {
        path.to_lowercase().ends_with(".java")
    }

    /// Extract package-aware top-level types and their members.
    fn outline(
        &self,
        _path: &str,
        text: &str,
    ) -> Result<Vec<OutlineSymbol>, AdapterContractError> {
        let masked = mask_comments_and_strings(text, &java_rules());
        let lines: Vec<&str> = masked.lines().collect();
        let depth_before = line_depths(&masked);
        let block_ends = block_end_by_start_line(&masked);
        let package_name = find_package(&lines);

        let mut symbols: Vec<OutlineSymbol> = Vec::new();
        let mut type_blocks: Vec<JavaTypeBlock> = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            let line_number = index + 1;
            if depth_before[index] != 0 {
                continue;
            }
            let Some(found) = TYPE_RE.captures(line) else {
                continue;
            };
            let kind = &found[1];
            let type_name = found[2].to_string();
            let qualified_name = match &package_name {
                Some(package) => format!("{package}.{type_name}"),
                None => type_name.clone(),
            };
            let end_line = block_ends
                .get(&line_number)
                .copied()
                .unwrap_or(line_number)
                .max(line_number);
            // Records normalise to the generic "type" kind.
            let symbol_kind = if kind == "record" { "type" } else { kind };
            symbols.push(
                OutlineSymbol::new(symbol_kind, qualified_name.clone(), line_number, end_line)
                    .with_signature(Some("()".to_string())),
            );
            type_blocks.push(JavaTypeBlock {
                name: type_name,
                qualified_name,
                start_line: line_number,
                end_line,
                depth: 1,
            });
        }

        for type_block in &type_blocks {
            extract_type_members(&lines, &depth_before, &block_ends, type_block, &mut symbols);
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

fn find_package(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find_map(|line| PACKAGE_RE.captures(line).map(|found| found[1].to_string()))
}

fn extract_type_members(
    lines: &[&str],
    depth_before: &[usize],
    block_ends: &std::collections::BTreeMap<usize, usize>,
    type_block: &JavaTypeBlock,
    symbols: &mut Vec<OutlineSymbol>,
) {
    let start = type_block.start_line + 1;
    let end = type_block.end_line.min(lines.len());
    for line_number in start..=end {
        let line = lines[line_number - 1];
        if depth_before[line_number - 1] != type_block.depth {
            continue;
        }
        let Some(found) = METHOD_RE.captures(line) else {
            continue;
        };
        let return_type = found.get(1);
        let member_name = found[2].to_string();
        let params = found[3].trim().to_string();
        let terminator = &found[4];
        if METHOD_SKIP.contains(&member_name.as_str()) {
            continue;
        }

        let kind = if member_name == type_block.name {
            "constructor"
        } else if return_type.is_none() {
            // Neither a constructor nor a typed member: not a method line.
            continue;
        } else {
            "method"
        };

        let symbol_end = if terminator == ";" {
            line_number
        } else {
            block_ends
                .get(&line_number)
                .copied()
                .unwrap_or(line_number)
                .max(line_number)
        };
        symbols.push(
            OutlineSymbol::new(
                kind,
                format!("{}.{member_name}", type_block.qualified_name),
                line_number,
                symbol_end,
            )
            .with_signature(Some(format!("({params})"))),
        );
    }
}

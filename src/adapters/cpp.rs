//! Filepath: src/adapters/cpp.rs
//! Lexical C/C++ adapter for deterministic symbol outlining.
//!
//! Declarations match at depth 0 and depth 1 (one namespace level); class
//! and struct bodies are rescanned at their member depth for methods.

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

static NAMESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*namespace\s+([A-Za-z_][A-Za-z0-9_:]*)\s*\{?").expect("pattern"));
static CLASS_STRUCT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:template\s*<[^>]+>\s*)?(class|struct)\s+([A-Za-z_][A-Za-z0-9_]*)\b")
        .expect("pattern")
});
static ENUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:enum(?:\s+class)?)\s+([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern")
});
static FREE_FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:inline|constexpr|static|virtual|friend|extern)\s+)*(?:[A-Za-z_~][A-Za-z0-9_:<>\s*&]+?)\s+([A-Za-z_~][A-Za-z0-9_:]*)\s*\(([^;{}()]*)\)\s*(?:const\s*)?(?:noexcept(?:\([^)]*\))?\s*)?(?:->\s*[^;{]+)?\s*([;{])",
    )
    .expect("pattern")
});
static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|protected|private)\s*:\s*)?(?:(?:inline|constexpr|virtual|static|friend|explicit)\s+)*(?:[A-Za-z_~][A-Za-z0-9_:<>\s*&]+?\s+)?([A-Za-z_~][A-Za-z0-9_]*)\s*\(([^;{}()]*)\)\s*(?:const\s*)?(?:noexcept(?:\([^)]*\))?\s*)?(?:->\s*[^;{]+)?\s*([;{])",
    )
    .expect("pattern")
});

const SKIP_NAMES: &[&str] = &["if", "for", "while", "switch", "catch", "return", "sizeof"];

fn cpp_rules() -> LexicalRules {
    LexicalRules {
        line_comment_prefixes: vec!["//"],
        block_comment_pairs: vec![("/*", "*/")],
        string_delimiters: vec!["\"", "'"],
        escape_char: '\\',
    }
}

const EXTENSIONS: &[&str] = &[".cpp", ".cc", ".cxx", ".hpp", ".hh", ".hxx", ".h", ".c"];

struct TypeBlock {
    name: String,
    start_line: usize,
    end_line: usize,
    depth: usize,
}

/// Deterministic lexical adapter for C and C++ source/header files.
pub struct CppLexicalAdapter;

impl LanguageAdapter for CppLexicalAdapter {
    fn name(&self) -> &'static str {
        "cpp_lexical"
    }

    fn supports_path(&self, path: &str) -> bool {
        let lowered = path.to_lowercase();
        EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
    }

    /// Extract namespace/type/function/method symbols deterministically.
    fn outline(
        &self,
        _path: &str,
        text: &str,
    ) -> Result<Vec<OutlineSymbol>, AdapterContractError> {
        let masked = mask_comments_and_strings(text, &cpp_rules());
        let lines: Vec<&str> = masked.lines().collect();
        let depth_before = line_depths(&masked);
        let block_ends = block_end_by_start_line(&masked);

        let mut symbols: Vec<OutlineSymbol> = Vec::new();
        let mut type_blocks: Vec<TypeBlock> = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            let line_number = index + 1;
            let current_depth = depth_before[index];
            if current_depth > 1 {
                continue;
            }
            let block_end = block_ends
                .get(&line_number)
                .copied()
                .unwrap_or(line_number)
                .max(line_number);

            if let Some(found) = NAMESPACE_RE.captures(line) {
                symbols.push(OutlineSymbol::new(
                    "namespace",
                    found[1].to_string(),
                    line_number,
                    block_end,
                ));
                continue;
            }
            if let Some(found) = CLASS_STRUCT_RE.captures(line) {
                let kind = found[1].to_string();
                let name = found[2].to_string();
                symbols.push(
                    OutlineSymbol::new(&kind, name.clone(), line_number, block_end)
                        .with_signature(Some("()".to_string())),
                );
                type_blocks.push(TypeBlock {
                    name,
                    start_line: line_number,
                    end_line: block_end,
                    depth: current_depth + 1,
                });
                continue;
            }
            if let Some(found) = ENUM_RE.captures(line) {
                symbols.push(OutlineSymbol::new(
                    "enum",
                    found[1].to_string(),
                    line_number,
                    block_end,
                ));
                continue;
            }
            if let Some(found) = FREE_FUNCTION_RE.captures(line) {
                let name = found[1].to_string();
                if SKIP_NAMES.contains(&name.as_str()) {
                    continue;
                }
                let end_line = if &found[3] == "{" { block_end } else { line_number };
                symbols.push(
                    OutlineSymbol::new("function", name, line_number, end_line)
                        .with_signature(Some(format!("({})", found[2].trim()))),
                );
            }
        }

        for type_block in &type_blocks {
            extract_type_methods(&lines, &depth_before, &block_ends, type_block, &mut symbols);
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

fn extract_type_methods(
    lines: &[&str],
    depth_before: &[usize],
    block_ends: &std::collections::BTreeMap<usize, usize>,
    type_block: &TypeBlock,
    symbols: &mut Vec<OutlineSymbol>,
) {
    let start = type_block.start_line + 1;
    let end = type_block.end_line.min(lines.len());
    for line_number in start..=end {
        if depth_before[line_number - 1] != type_block.depth {
            continue;
        }
        let Some(found) = METHOD_RE.captures(lines[line_number - 1]) else {
            continue;
        };
        let name = found[1].to_string();
        if SKIP_NAMES.contains(&name.as_str()) {
            continue;
        }
        let symbol_end = if &found[3] == "{" {
            block_ends
                .get(&line_number)
                .copied()
                .unwrap_or(line_number)
                .max(line_number)
        } else {
            line_number
        };
        symbols.push(
            OutlineSymbol::new(
                "method",
                format!("{}.{name}", type_block.name),
                line_number,
                symbol_end,
            )
            .with_signature(Some(format!("({})", found[2].trim()))),
        );
    }
}

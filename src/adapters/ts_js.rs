//! Filepath: src/adapters/ts_js.rs
//! Lexical TypeScript/JavaScript adapter.
//!
//! Depth-0 lines yield classes, interfaces, enums, type aliases,
//! functions, and exported bindings; class bodies are rescanned at their
//! member depth for methods. CommonJS `exports.x =` assignments count as
//! exported variables so plain JS modules outline too.

use std::sync::LazyLock;

use regex::Regex;

use crate::adapters::base::{
    AdapterContractError, LanguageAdapter, OutlineSymbol, SymbolReference,
    normalize_and_sort_symbols,
};
use crate::adapters::lexical::{
    BraceBlock, LexicalRules, line_depths, mask_comments_and_strings,
    references_for_symbol_lexical, references_for_symbols_lexical, scan_brace_blocks,
};

static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)\b")
        .expect("pattern")
});
static INTERFACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?interface\s+([A-Za-z_$][A-Za-z0-9_$]*)\b").expect("pattern")
});
static ENUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?enum\s+([A-Za-z_$][A-Za-z0-9_$]*)\b").expect("pattern")
});
static TYPE_ALIAS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?type\s+([A-Za-z_$][A-Za-z0-9_$]*)\b").expect("pattern")
});
static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:(async)\s+)?function\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*\(([^)]*)\)")
        .expect("pattern")
});
static EXPORT_BINDING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*export\s+(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\b").expect("pattern")
});
static COMMONJS_EXPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:module\.)?exports\.([A-Za-z_$][A-Za-z0-9_$]*)\s*=").expect("pattern")
});
static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|static|readonly|override|abstract|get|set|async)\s+)*([A-Za-z_$][A-Za-z0-9_$]*)\s*\(([^)]*)\)\s*\{?",
    )
    .expect("pattern")
});

const SKIP_METHOD_NAMES: &[&str] = &["if", "for", "while", "switch", "catch", "function", "return"];

const EXTENSIONS: &[&str] = &[".ts", ".tsx", ".mts", ".cts", ".js", ".jsx", ".mjs", ".cjs"];

fn ts_js_rules() -> LexicalRules {
    LexicalRules {
        line_comment_prefixes: vec!["//"],
        block_comment_pairs: vec![("/*", "*/")],
        string_delimiters: vec!["'", "\"", "`"],
        escape_char: '\\',
    }
}

/// Deterministic lexical adapter for TypeScript and JavaScript files.
pub struct TypeScriptJavaScriptLexicalAdapter;

impl LanguageAdapter for TypeScriptJavaScriptLexicalAdapter {
    fn name(&self) -> &'static str {
        "ts_js_lexical"
    }

    fn supports_path(&self, path: &str) -> bool {
        let lowered = path.to_lowercase();
        EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
    }

    /// Extract deterministic top-level and class-method symbols.
    fn outline(
        &self,
        _path: &str,
        text: &str,
    ) -> Result<Vec<OutlineSymbol>, AdapterContractError> {
        let masked = mask_comments_and_strings(text, &ts_js_rules());
        let lines: Vec<&str> = masked.lines().collect();
        let depth_before = line_depths(&masked);
        let blocks = scan_brace_blocks(&masked, '{', '}').blocks;

        let mut symbols: Vec<OutlineSymbol> = Vec::new();
        let mut class_blocks: Vec<(String, BraceBlock)> = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            let line_number = index + 1;
            if depth_before[index] != 0 {
                continue;
            }

            if let Some(found) = CLASS_RE.captures(line) {
                let name = found[1].to_string();
                let end_line = find_block_end(line_number, &blocks);
                symbols.push(
                    OutlineSymbol::new("class", name.clone(), line_number, end_line)
                        .with_signature(Some("()".to_string())),
                );
                class_blocks.push((
                    name,
                    BraceBlock {
                        start_line: line_number,
                        start_col: 1,
                        end_line,
                        end_col: 1,
                        depth: 1,
                    },
                ));
                continue;
            }
            if let Some(found) = INTERFACE_RE.captures(line) {
                symbols.push(
                    OutlineSymbol::new(
                        "interface",
                        found[1].to_string(),
                        line_number,
                        find_block_end(line_number, &blocks),
                    )
                    .with_signature(Some("()".to_string())),
                );
                continue;
            }
            if let Some(found) = ENUM_RE.captures(line) {
                symbols.push(
                    OutlineSymbol::new(
                        "enum",
                        found[1].to_string(),
                        line_number,
                        find_block_end(line_number, &blocks),
                    )
                    .with_signature(Some("()".to_string())),
                );
                continue;
            }
            if let Some(found) = TYPE_ALIAS_RE.captures(line) {
                symbols.push(OutlineSymbol::new(
                    "type_alias",
                    found[1].to_string(),
                    line_number,
                    line_number,
                ));
                continue;
            }
            if let Some(found) = FUNCTION_RE.captures(line) {
                let kind = if found.get(1).is_some() {
                    "async_function"
                } else {
                    "function"
                };
                symbols.push(
                    OutlineSymbol::new(
                        kind,
                        found[2].to_string(),
                        line_number,
                        find_block_end(line_number, &blocks),
                    )
                    .with_signature(Some(format!("({})", found[3].trim()))),
                );
                continue;
            }
            if let Some(found) = EXPORT_BINDING_RE.captures(line) {
                symbols.push(OutlineSymbol::new(
                    "exported_variable",
                    found[1].to_string(),
                    line_number,
                    line_number,
                ));
                continue;
            }
            if let Some(found) = COMMONJS_EXPORT_RE.captures(line) {
                symbols.push(OutlineSymbol::new(
                    "exported_variable",
                    found[1].to_string(),
                    line_number,
                    line_number,
                ));
            }
        }

        for (class_name, class_block) in &class_blocks {
            extract_class_methods(
                class_name,
                &lines,
                &depth_before,
                class_block,
                &blocks,
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

/// End line of the first block starting at or after `start_line`.
fn find_block_end(start_line: usize, blocks: &[BraceBlock]) -> usize {
    blocks
        .iter()
        .find(|block| block.start_line >= start_line)
        .map(|block| block.end_line)
        .unwrap_or(start_line)
}

fn extract_class_methods(
    class_name: &str,
    lines: &[&str],
    depth_before: &[usize],
    class_block: &BraceBlock,
    blocks: &[BraceBlock],
    symbols: &mut Vec<OutlineSymbol>,
) {
    let end_index = class_block.end_line.min(lines.len());
    for line_number in (class_block.start_line + 1)..=end_index {
        let line = lines[line_number - 1];
        if depth_before[line_number - 1] != class_block.depth {
            continue;
        }
        let Some(found) = METHOD_RE.captures(line) else {
            continue;
        };
        let method_name = found[1].to_string();
        if SKIP_METHOD_NAMES.contains(&method_name.as_str()) {
            continue;
        }
        let kind = if line.contains("async ") {
            "async_method"
        } else {
            "method"
        };
        let nested: Vec<BraceBlock> = blocks
            .iter()
            .filter(|block| block.depth >= class_block.depth + 1)
            .copied()
            .collect();
        let end_line = find_block_end(line_number, &nested);
        symbols.push(
            OutlineSymbol::new(
                kind,
                format!("{class_name}.{method_name}"),
                line_number,
                end_line.max(line_number),
            )
            .with_signature(Some(format!("({})", found[2].trim()))),
        );
    }
}

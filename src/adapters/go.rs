//! Filepath: src/adapters/go.rs
//! Lexical Go adapter for deterministic symbol outlining.

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

static PACKAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*package\s+([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern"));
static TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*type\s+([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern"));
static FUNC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*func\s*(?:\(([^)]*)\)\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)")
        .expect("pattern")
});
static CONST_VAR_SINGLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(const|var)\s+([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern"));
static CONST_VAR_GROUP_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(const|var)\s*\(").expect("pattern"));
static GROUP_ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\b").expect("pattern"));

fn go_rules() -> LexicalRules {
    LexicalRules {
        line_comment_prefixes: vec!["//"],
        block_comment_pairs: vec![("/*", "*/")],
        string_delimiters: vec!["\"", "'", "`"],
        escape_char: '\\',
    }
}

/// Deterministic lexical adapter for Go source files.
pub struct GoLexicalAdapter;

impl LanguageAdapter for GoLexicalAdapter {
    fn name(&self) -> &'static str {
        "go_lexical"
    }

    fn supports_path(&self, path: &str) -> bool {
        path.to_lowercase().ends_with(".go")
    }

    /// Extract package-level types, funcs, methods, consts, and vars.
    fn outline(
        &self,
        _path: &str,
        text: &str,
    ) -> Result<Vec<OutlineSymbol>, AdapterContractError> {
        let masked = mask_comments_and_strings(text, &go_rules());
        let lines: Vec<&str> = masked.lines().collect();
        let depth_before = line_depths(&masked);
        let block_ends = block_end_by_start_line(&masked);
        let package_name = find_package(&lines);

        let mut symbols: Vec<OutlineSymbol> = Vec::new();
        let mut index = 0usize;
        while index < lines.len() {
            let line_number = index + 1;
            let line = lines[index];
            if depth_before[index] != 0 {
                index += 1;
                continue;
            }

            if let Some(found) = TYPE_RE.captures(line) {
                let end = block_end(&block_ends, line_number);
                symbols.push(OutlineSymbol::new(
                    "type",
                    qualify(&package_name, &found[1]),
                    line_number,
                    end,
                ));
                index += 1;
                continue;
            }

            if let Some(found) = FUNC_RE.captures(line) {
                let receiver = found.get(1).map(|m| m.as_str());
                let name = &found[2];
                let params = found[3].trim();
                let end = block_end(&block_ends, line_number);
                let (kind, symbol_name) = match receiver {
                    None => ("function", qualify(&package_name, name)),
                    Some(receiver) => {
                        let method_base = match parse_receiver_type(receiver) {
                            Some(receiver_type) => format!("{receiver_type}.{name}"),
                            None => name.to_string(),
                        };
                        ("method", qualify(&package_name, &method_base))
                    }
                };
                symbols.push(
                    OutlineSymbol::new(kind, symbol_name, line_number, end)
                        .with_signature(Some(format!("({params})"))),
                );
                index += 1;
                continue;
            }

            if let Some(found) = CONST_VAR_SINGLE_RE.captures(line) {
                symbols.push(OutlineSymbol::new(
                    &found[1],
                    qualify(&package_name, &found[2]),
                    line_number,
                    line_number,
                ));
                index += 1;
                continue;
            }

            if let Some(found) = CONST_VAR_GROUP_START_RE.captures(line) {
                // const ( ... ) / var ( ... ) groups: one symbol per entry.
                let decl_kind = found[1].to_string();
                let group_end = find_group_end(&lines, index);
                for group_index in (index + 1)..group_end {
                    if depth_before[group_index] != 0 {
                        continue;
                    }
                    if let Some(entry) = GROUP_ENTRY_RE.captures(lines[group_index]) {
                        symbols.push(OutlineSymbol::new(
                            &decl_kind,
                            qualify(&package_name, &entry[1]),
                            group_index + 1,
                            group_index + 1,
                        ));
                    }
                }
                index = group_end + 1;
                continue;
            }

            index += 1;
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

fn block_end(block_ends: &std::collections::BTreeMap<usize, usize>, line_number: usize) -> usize {
    block_ends
        .get(&line_number)
        .copied()
        .unwrap_or(line_number)
        .max(line_number)
}

fn parse_receiver_type(receiver: &str) -> Option<String> {
    let stripped = receiver.trim();
    if stripped.is_empty() {
        return None;
    }
    let type_part = stripped
        .split_whitespace()
        .next_back()
        .unwrap_or(stripped)
        .trim_start_matches('*');
    (!type_part.is_empty()).then(|| type_part.to_string())
}

/// Index of the line closing a `const (` / `var (` group.
fn find_group_end(lines: &[&str], start_index: usize) -> usize {
    let mut depth = 0i64;
    for (offset, line) in lines[start_index..].iter().enumerate() {
        for character in line.chars() {
            if character == '(' {
                depth += 1;
            } else if character == ')' {
                depth -= 1;
                if depth == 0 {
                    return start_index + offset;
                }
            }
        }
    }
    lines.len().saturating_sub(1)
}

fn qualify(package_name: &Option<String>, name: &str) -> String {
    match package_name {
        Some(package) => format!("{package}.{name}"),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
package svc

// Service handles requests.
type Service struct {
\tname string
}

func NewService(name string) *Service {
\treturn &Service{name: name}
}

func (s *Service) Run(ctx Context) error {
\treturn nil
}

const MaxRetries = 3

var (
\tDefaultTimeout = 30
\tdebugMode      = false
)
";

    #[test]
    fn outline_covers_types_funcs_methods_consts_vars() {
        let symbols = GoLexicalAdapter.outline("svc.go", SOURCE).unwrap();
        let names: Vec<(&str, &str)> = symbols
            .iter()
            .map(|s| (s.kind.as_str(), s.name.as_str()))
            .collect();
        assert!(names.contains(&("type", "svc.Service")));
        assert!(names.contains(&("function", "svc.NewService")));
        assert!(names.contains(&("method", "svc.Service.Run")));
        assert!(names.contains(&("const", "svc.MaxRetries")));
        assert!(names.contains(&("var", "svc.DefaultTimeout")));
        assert!(names.contains(&("var", "svc.debugMode")));
    }

    #[test]
    fn type_ranges_span_their_blocks() {
        let symbols = GoLexicalAdapter.outline("svc.go", SOURCE).unwrap();
        let service = symbols.iter().find(|s| s.kind == "type").unwrap();
        assert_eq!(service.start_line, 4);
        assert_eq!(service.end_line, 6);
        let run = symbols.iter().find(|s| s.kind == "method").unwrap();
        assert!(run.end_line > run.start_line);
        assert_eq!(run.signature.as_deref(), Some("(ctx Context)"));
    }

    #[test]
    fn nested_declarations_are_ignored() {
        let source = "package p\n\nfunc outer() {\n\ttype hidden struct{}\n}\n";
        let symbols = GoLexicalAdapter.outline("p.go", source).unwrap();
        assert!(symbols.iter().all(|s| !s.name.contains("hidden")));
    }

    #[test]
    fn outline_is_sorted_and_stable() {
        let first = GoLexicalAdapter.outline("svc.go", SOURCE).unwrap();
        let second = GoLexicalAdapter.outline("svc.go", SOURCE).unwrap();
        assert_eq!(first, second);
        for pair in first.windows(2) {
            let left = (pair[0].start_line, pair[0].end_line, &pair[0].name);
            let right = (pair[1].start_line, pair[1].end_line, &pair[1].name);
            assert!(left <= right);
        }
    }

    #[test]
    fn references_use_the_shared_lexical_resolver() {
        let files = vec![(
            "main.go".to_string(),
            "package main\n\nimport \"svc\"\n\nfunc main() {\n\ts := svc.NewService(\"x\")\n\ts.Run(nil)\n}\n"
                .to_string(),
        )];
        let refs = GoLexicalAdapter
            .references_for_symbol("NewService", &files, None)
            .unwrap();
        assert!(refs.iter().any(|r| r.kind == "call"));
        assert!(refs.iter().all(|r| r.strategy == "lexical"));
    }
}

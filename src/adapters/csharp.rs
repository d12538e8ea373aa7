//! Filepath: src/adapters/csharp.rs
//! Lexical C# adapter for deterministic symbol outlining.
//!
//! Namespaces are tracked so types qualify as `Ns.Type`; type bodies are
//! rescanned at member depth for methods, properties, and events.

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
    LazyLock::new(|| Regex::new(r"^\s*namespace\s+([A-Za-z_][A-Za-z0-9_.]*)\b").expect("pattern"));
static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|internal|abstract|sealed|static|partial)\s+)*(class|struct|interface|enum|record)\s+([A-Za-z_][A-Za-z0-9_]*)\b",
    )
    .expect("pattern")
});
static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|internal|static|virtual|override|abstract|async|sealed|new)\s+)*(?:[A-Za-z_][A-Za-z0-9_<>\[\],?.\s]*\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*((?:=>|[;{]))?",
    )
    .expect("pattern")
});
static PROPERTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|internal|static|virtual|override|abstract)\s+)*[A-Za-z_][A-Za-z0-9_<>\[\],?.\s]*\s+([A-Za-z_][A-Za-z0-9_]*)\s*\{\s*(?:get|set|init)\b",
    )
    .expect("pattern")
});
static EVENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|internal|static)\s+)*event\s+[A-Za-z_][A-Za-z0-9_<>\[\],?.\s]*\s+([A-Za-z_][A-Za-z0-9_]*)\s*;",
    )
    .expect("pattern")
});

const METHOD_SKIP: &[&str] = &["if", "for", "while", "switch", "catch", "return", "new"];

fn csharp_rules() -> LexicalRules {
    LexicalRules {
        line_comment_prefixes: vec!["//"],
        block_comment_pairs: vec![("/*", "*/")],
        string_delimiters: vec!["\"", "'"],
        escape_char: '\\',
    }
}

struct TypeBlock {
    name: String,
    start_line: usize,
    end_line: usize,
    member_depth: usize,
}

/// Deterministic lexical adapter for C# source files.
pub struct CSharpLexicalAdapter;

impl LanguageAdapter for CSharpLexicalAdapter {
    fn name(&self) -> &'static str {
        "csharp_lexical"
    }

    fn supports_path(&self, path: &str) -> bool {
        path.to_lowercase().ends_with(".cs")
    }

    /// Extract namespace, type, method, property, and event symbols.
    fn outline(
        &self,
        _path: &str,
        text: &str,
    ) -> Result<Vec<OutlineSymbol>, AdapterContractError> {
        let masked = mask_comments_and_strings(text, &csharp_rules());
        let lines: Vec<&str> = masked.lines().collect();
        let depth_before = line_depths(&masked);
        let block_ends = block_end_by_start_line(&masked);

        let mut symbols: Vec<OutlineSymbol> = Vec::new();
        let mut type_blocks: Vec<TypeBlock> = Vec::new();
        let mut current_namespace: Option<String> = None;
        let mut namespace_depth: usize = 0;

        for (index, line) in lines.iter().enumerate() {
            let line_number = index + 1;
            // Types live at depth 0 (file-scoped namespaces) or at the
            // namespace's brace depth.
            if depth_before[index] != namespace_depth && depth_before[index] != 0 {
                continue;
            }

            if let Some(found) = NAMESPACE_RE.captures(line) {
                current_namespace = Some(found[1].to_string());
                // Block-scoped namespaces push members one level deeper;
                // file-scoped (`namespace X;`) keep them at depth 0.
                namespace_depth = if line.contains('{') || !line.trim_end().ends_with(';') {
                    depth_before[index] + 1
                } else {
                    depth_before[index]
                };
                symbols.push(OutlineSymbol::new(
                    "namespace",
                    found[1].to_string(),
                    line_number,
                    declaration_end(line_number, line, &block_ends, 3),
                ));
                continue;
            }

            if let Some(found) = TYPE_RE.captures(line) {
                let kind = found[1].to_string();
                let type_name = &found[2];
                let qualified = match &current_namespace {
                    Some(namespace) => format!("{namespace}.{type_name}"),
                    None => type_name.to_string(),
                };
                let type_end = declaration_end(line_number, line, &block_ends, 3);
                symbols.push(
                    OutlineSymbol::new(&kind, qualified.clone(), line_number, type_end)
                        .with_signature(Some("()".to_string())),
                );
                type_blocks.push(TypeBlock {
                    name: qualified,
                    start_line: line_number,
                    end_line: type_end,
                    member_depth: depth_before[index] + 1,
                });
            }
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

fn extract_type_members(
    lines: &[&str],
    depth_before: &[usize],
    block_ends: &std::collections::BTreeMap<usize, usize>,
    type_block: &TypeBlock,
    symbols: &mut Vec<OutlineSymbol>,
) {
    let start = type_block.start_line + 1;
    let end = type_block.end_line.min(lines.len());
    let simple_type_name = type_block.name.rsplit('.').next().unwrap_or(&type_block.name);
    for line_number in start..=end {
        if depth_before[line_number - 1] != type_block.member_depth {
            continue;
        }
        let line = lines[line_number - 1];

        if let Some(found) = EVENT_RE.captures(line) {
            symbols.push(OutlineSymbol::new(
                "event",
                format!("{}.{}", type_block.name, &found[1]),
                line_number,
                line_number,
            ));
            continue;
        }

        if let Some(found) = PROPERTY_RE.captures(line) {
            let end_line = block_ends
                .get(&line_number)
                .copied()
                .unwrap_or(line_number)
                .max(line_number);
            symbols.push(OutlineSymbol::new(
                "property",
                format!("{}.{}", type_block.name, &found[1]),
                line_number,
                end_line,
            ));
            continue;
        }

        let Some(found) = METHOD_RE.captures(line) else {
            continue;
        };
        let member_name = found[1].to_string();
        if METHOD_SKIP.contains(&member_name.as_str()) {
            continue;
        }
        let params = found[2].trim().to_string();
        let terminator = found.get(3).map(|m| m.as_str());
        let kind = if member_name == simple_type_name {
            "constructor"
        } else {
            "method"
        };
        let end_line = match terminator {
            Some(";") | Some("=>") => line_number,
            _ => declaration_end(line_number, line, &block_ends, 2),
        };
        symbols.push(
            OutlineSymbol::new(
                kind,
                format!("{}.{member_name}", type_block.name),
                line_number,
                end_line,
            )
            .with_signature(Some(format!("({params})"))),
        );
    }
}

/// End line of a declaration whose opening brace may sit a few lines down.
fn declaration_end(
    line_number: usize,
    line_text: &str,
    block_ends: &std::collections::BTreeMap<usize, usize>,
    lookahead: usize,
) -> usize {
    if line_text.trim_end().ends_with(';') {
        return line_number;
    }
    if let Some(direct) = block_ends.get(&line_number) {
        return (*direct).max(line_number);
    }
    for candidate in (line_number + 1)..=(line_number + lookahead) {
        if let Some(end_line) = block_ends.get(&candidate) {
            return (*end_line).max(line_number);
        }
    }
    line_number
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
namespace Acme.Billing
{
    public class Invoice
    {
        public Invoice(string id)
        {
            Id = id;
        }

        public string Id { get; set; }

        public event EventHandler Paid;

        public decimal Total(decimal rate)
        {
            return rate * 2;
        }

        public override string ToString() => Id;
    }

    public interface IClock
    {
        DateTime Now();
    }
}
";

    #[test]
    fn outline_qualifies_types_with_namespace() {
        let symbols = CSharpLexicalAdapter.outline("Invoice.cs", SOURCE).unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Acme.Billing"));
        assert!(names.contains(&"Acme.Billing.Invoice"));
        assert!(names.contains(&"Acme.Billing.IClock"));
    }

    #[test]
    fn members_cover_constructor_property_event_methods() {
        let symbols = CSharpLexicalAdapter.outline("Invoice.cs", SOURCE).unwrap();
        let kinds: Vec<(&str, &str)> = symbols
            .iter()
            .map(|s| (s.kind.as_str(), s.name.as_str()))
            .collect();
        assert!(kinds.contains(&("constructor", "Acme.Billing.Invoice.Invoice")));
        assert!(kinds.contains(&("property", "Acme.Billing.Invoice.Id")));
        assert!(kinds.contains(&("event", "Acme.Billing.Invoice.Paid")));
        assert!(kinds.contains(&("method", "Acme.Billing.Invoice.Total")));
        assert!(kinds.contains(&("method", "Acme.Billing.Invoice.ToString")));
    }

    #[test]
    fn expression_bodied_members_end_on_their_line() {
        let symbols = CSharpLexicalAdapter.outline("Invoice.cs", SOURCE).unwrap();
        let to_string = symbols
            .iter()
            .find(|s| s.name.ends_with(".ToString"))
            .unwrap();
        assert_eq!(to_string.start_line, to_string.end_line);
    }

    #[test]
    fn file_scoped_namespaces_keep_types_at_depth_zero() {
        let source = "namespace Acme.Flat;\n\npublic class Widget\n{\n    public void Spin()\n    {\n    }\n}\n";
        let symbols = CSharpLexicalAdapter.outline("Widget.cs", source).unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Acme.Flat.Widget"));
        assert!(names.contains(&"Acme.Flat.Widget.Spin"));
    }
}

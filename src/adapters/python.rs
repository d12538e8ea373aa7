//! Filepath: src/adapters/python.rs
//! Python AST adapter built on Tree-sitter.
//!
//! Outlines walk the full parse tree, so classes and functions declared
//! inside conditionals and nested scopes are captured with dotted names, a
//! parent chain, and a control-stack context (`if>try` style). Reference
//! candidates come from import statements, class bases, and call
//! expressions; a bounded per-file cache keyed on the content hash avoids
//! reparsing when the same file is queried for several symbols.

use std::collections::BTreeMap;
use std::sync::Arc;

use moka::sync::Cache;
use sha2::{Digest, Sha256};
use tree_sitter::{Language, Node, Parser};

use crate::adapters::base::{
    AdapterContractError, LanguageAdapter, OutlineSymbol, SymbolReference,
    normalize_and_sort_references, normalize_and_sort_symbols, normalize_optional_text,
};

/// One usage candidate harvested from a parsed file.
#[derive(Debug, Clone)]
struct ReferenceCandidate {
    line: usize,
    symbol: String,
    kind: &'static str,
    evidence: String,
    confidence: &'static str,
}

type CachedCandidates = Arc<(String, Vec<ReferenceCandidate>)>;

/// Python-first adapter with AST-based structural outlines.
pub struct PythonAstAdapter {
    language: Language,
    // path -> (sha256 of text, candidates); bounded, content-addressed.
    candidate_cache: Cache<String, CachedCandidates>,
}

impl PythonAstAdapter {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_python::LANGUAGE.into(),
            candidate_cache: Cache::new(256),
        }
    }

    fn parse(&self, text: &str) -> Option<tree_sitter::Tree> {
        let mut parser = Parser::new();
        parser.set_language(&self.language).ok()?;
        parser.parse(text, None)
    }

    fn reference_candidates(&self, path: &str, text: &str) -> Option<CachedCandidates> {
        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        if let Some(cached) = self.candidate_cache.get(path)
            && cached.0 == digest
        {
            return Some(cached);
        }
        let tree = self.parse(text)?;
        let mut candidates = Vec::new();
        collect_reference_candidates(tree.root_node(), text.as_bytes(), &mut candidates);
        let entry: CachedCandidates = Arc::new((digest, candidates));
        self.candidate_cache.insert(path.to_string(), entry.clone());
        Some(entry)
    }
}

impl Default for PythonAstAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAdapter for PythonAstAdapter {
    fn name(&self) -> &'static str {
        "python"
    }

    fn supports_path(&self, path: &str) -> bool {
        path.to_lowercase().ends_with(".py")
    }

    /// Extract classes, methods, and functions with line ranges and
    /// signatures. Best effort: unparsable text yields an empty outline.
    fn outline(
        &self,
        _path: &str,
        text: &str,
    ) -> Result<Vec<OutlineSymbol>, AdapterContractError> {
        let Some(tree) = self.parse(text) else {
            return Ok(Vec::new());
        };
        let mut collector = OutlineCollector {
            bytes: text.as_bytes(),
            scope_stack: Vec::new(),
            control_stack: Vec::new(),
            symbols: Vec::new(),
        };
        collector.visit(tree.root_node());
        normalize_and_sort_symbols(collector.symbols)
    }

    fn references_for_symbol(
        &self,
        symbol: &str,
        files: &[(String, String)],
        top_k: Option<usize>,
    ) -> Result<Vec<SymbolReference>, AdapterContractError> {
        let grouped = self.references_for_symbols(&[symbol.to_string()], files, top_k)?;
        Ok(grouped.into_values().next().unwrap_or_default())
    }

    /// Batch resolution shares the per-file candidate pass across symbols.
    fn references_for_symbols(
        &self,
        symbols: &[String],
        files: &[(String, String)],
        top_k: Option<usize>,
    ) -> Result<BTreeMap<String, Vec<SymbolReference>>, AdapterContractError> {
        let mut grouped: BTreeMap<String, Vec<SymbolReference>> = BTreeMap::new();
        for symbol in symbols {
            grouped.entry(symbol.clone()).or_default();
        }

        for (path, text) in files {
            if !self.supports_path(path) {
                continue;
            }
            let Some(candidates) = self.reference_candidates(path, text) else {
                continue;
            };
            for symbol in symbols {
                if symbol.trim().is_empty() {
                    continue;
                }
                let short_symbol = symbol.rsplit('.').next().unwrap_or(symbol);
                let matches = grouped.get_mut(symbol).expect("seeded above");
                for candidate in &candidates.1 {
                    if !candidate_matches_symbol(&candidate.symbol, symbol, short_symbol) {
                        continue;
                    }
                    // A dotted attribute that only matches the short name is
                    // weaker evidence than an exact match.
                    let confidence = if candidate.symbol != *symbol
                        && candidate.symbol.ends_with(&format!(".{short_symbol}"))
                    {
                        "medium"
                    } else {
                        candidate.confidence
                    };
                    matches.push(SymbolReference {
                        symbol: symbol.clone(),
                        path: path.clone(),
                        line: candidate.line,
                        kind: candidate.kind.to_string(),
                        evidence: candidate.evidence.clone(),
                        strategy: "ast".to_string(),
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
}

/// Control-flow nodes contributing to `decl_context`.
///
/// The grammar reuses `for_statement`/`with_statement` for the async
/// forms, gated by a leading `async` token, so the qualifier has to be
/// read off the node to keep `async_for`/`async_with` distinct.
fn control_label(node: Node) -> Option<&'static str> {
    let is_async = node
        .child(0)
        .map(|first| first.kind() == "async")
        .unwrap_or(false);
    match node.kind() {
        "if_statement" => Some("if"),
        "for_statement" => Some(if is_async { "async_for" } else { "for" }),
        "while_statement" => Some("while"),
        "try_statement" => Some("try"),
        "with_statement" => Some(if is_async { "async_with" } else { "with" }),
        "match_statement" => Some("match"),
        _ => None,
    }
}

struct OutlineCollector<'t> {
    bytes: &'t [u8],
    // (scope kind, local name) pairs, innermost last.
    scope_stack: Vec<(&'static str, String)>,
    control_stack: Vec<&'static str>,
    symbols: Vec<OutlineSymbol>,
}

impl<'t> OutlineCollector<'t> {
    fn visit(&mut self, node: Node<'t>) {
        match node.kind() {
            "class_definition" => self.visit_class(node),
            "function_definition" => self.visit_function(node),
            _ => {
                if let Some(label) = control_label(node) {
                    self.control_stack.push(label);
                    self.visit_children(node);
                    self.control_stack.pop();
                } else {
                    self.visit_children(node);
                }
            }
        }
    }

    fn visit_children(&mut self, node: Node<'t>) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn visit_class(&mut self, node: Node<'t>) {
        let Some(name) = self.field_text(node, "name") else {
            self.visit_children(node);
            return;
        };
        self.symbols.push(OutlineSymbol {
            kind: "class".to_string(),
            name: self.qualified_name(&name),
            signature: class_signature(node, self.bytes),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            doc: docstring_first_line(node, self.bytes),
            parent_symbol: self.parent_symbol(),
            scope_kind: Some(self.scope_kind().to_string()),
            is_conditional: Some(!self.control_stack.is_empty()),
            decl_context: self.decl_context(),
        });
        self.scope_stack.push(("class", name));
        self.visit_children(node);
        self.scope_stack.pop();
    }

    fn visit_function(&mut self, node: Node<'t>) {
        let Some(name) = self.field_text(node, "name") else {
            self.visit_children(node);
            return;
        };
        let in_class = self
            .scope_stack
            .last()
            .map(|(kind, _)| *kind == "class")
            .unwrap_or(false);
        let is_async = node
            .child(0)
            .map(|first| first.kind() == "async")
            .unwrap_or(false);
        let kind = match (in_class, is_async) {
            (true, true) => "async_method",
            (true, false) => "method",
            (false, true) => "async_function",
            (false, false) => "function",
        };
        let signature = self
            .field_text(node, "parameters")
            .and_then(|params| normalize_optional_text(Some(&params)));
        self.symbols.push(OutlineSymbol {
            kind: kind.to_string(),
            name: self.qualified_name(&name),
            signature,
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            doc: docstring_first_line(node, self.bytes),
            parent_symbol: self.parent_symbol(),
            scope_kind: Some(self.scope_kind().to_string()),
            is_conditional: Some(!self.control_stack.is_empty()),
            decl_context: self.decl_context(),
        });
        self.scope_stack.push(("function", name));
        self.visit_children(node);
        self.scope_stack.pop();
    }

    fn field_text(&self, node: Node, field: &str) -> Option<String> {
        node.child_by_field_name(field)?
            .utf8_text(self.bytes)
            .ok()
            .map(str::to_string)
    }

    fn qualified_name(&self, local_name: &str) -> String {
        if self.scope_stack.is_empty() {
            return local_name.to_string();
        }
        let mut parts: Vec<&str> = self
            .scope_stack
            .iter()
            .map(|(_, name)| name.as_str())
            .collect();
        parts.push(local_name);
        parts.join(".")
    }

    fn parent_symbol(&self) -> Option<String> {
        if self.scope_stack.is_empty() {
            return None;
        }
        Some(
            self.scope_stack
                .iter()
                .map(|(_, name)| name.as_str())
                .collect::<Vec<_>>()
                .join("."),
        )
    }

    fn scope_kind(&self) -> &'static str {
        self.scope_stack
            .last()
            .map(|(kind, _)| *kind)
            .unwrap_or("module")
    }

    fn decl_context(&self) -> Option<String> {
        (!self.control_stack.is_empty()).then(|| self.control_stack.join(">"))
    }
}

/// Class signature from the superclass argument list, `()` when bare.
fn class_signature(node: Node, bytes: &[u8]) -> Option<String> {
    match node.child_by_field_name("superclasses") {
        Some(superclasses) => superclasses
            .utf8_text(bytes)
            .ok()
            .and_then(|text| normalize_optional_text(Some(text))),
        None => Some("()".to_string()),
    }
}

/// First line of a PEP 257 docstring: the leading string expression of the
/// body block, quotes and prefixes stripped.
fn docstring_first_line(node: Node, bytes: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first_statement = body.named_child(0)?;
    if first_statement.kind() != "expression_statement" {
        return None;
    }
    let literal = first_statement.named_child(0)?;
    if literal.kind() != "string" {
        return None;
    }
    let raw = literal.utf8_text(bytes).ok()?;
    let unquoted = unquote_python_string(raw);
    let first = unquoted.trim().lines().next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

/// Strip Python string prefixes and quotes; enough for docstring capture.
fn unquote_python_string(raw: &str) -> String {
    let trimmed = raw.trim();
    let prefix_len = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .count();
    let rest = &trimmed[prefix_len..];
    for quotes in ["\"\"\"", "'''"] {
        if rest.len() >= 6 && rest.starts_with(quotes) && rest.ends_with(quotes) {
            return rest[3..rest.len() - 3].to_string();
        }
    }
    for quote in ['"', '\''] {
        if rest.len() >= 2 && rest.starts_with(quote) && rest.ends_with(quote) {
            return rest[1..rest.len() - 1].to_string();
        }
    }
    rest.to_string()
}

/// Dotted name of an identifier / attribute chain / call target.
fn dotted_name(node: Node, bytes: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => node.utf8_text(bytes).ok().map(str::to_string),
        "attribute" => {
            let value = dotted_name(node.child_by_field_name("object")?, bytes)?;
            let attr = node
                .child_by_field_name("attribute")?
                .utf8_text(bytes)
                .ok()?;
            Some(format!("{value}.{attr}"))
        }
        "call" => dotted_name(node.child_by_field_name("function")?, bytes),
        _ => None,
    }
}

fn collect_reference_candidates(
    node: Node,
    bytes: &[u8],
    candidates: &mut Vec<ReferenceCandidate>,
) {
    let line = node.start_position().row + 1;
    match node.kind() {
        "import_statement" => {
            // import a.b, c as d -> one candidate per imported module.
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                let target = match child.kind() {
                    "dotted_name" => child.utf8_text(bytes).ok().map(str::to_string),
                    "aliased_import" => child
                        .child_by_field_name("name")
                        .and_then(|name| name.utf8_text(bytes).ok())
                        .map(str::to_string),
                    _ => None,
                };
                if let Some(symbol) = target {
                    candidates.push(ReferenceCandidate {
                        line,
                        evidence: format!("import {symbol}"),
                        symbol,
                        kind: "import",
                        confidence: "high",
                    });
                }
            }
        }
        "import_from_statement" => {
            let module = node
                .child_by_field_name("module_name")
                .and_then(|name| name.utf8_text(bytes).ok())
                .unwrap_or("")
                .to_string();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                // Skip the module name itself; collect the imported names.
                if Some(child) == node.child_by_field_name("module_name") {
                    continue;
                }
                let imported = match child.kind() {
                    "dotted_name" => child.utf8_text(bytes).ok().map(str::to_string),
                    "aliased_import" => child
                        .child_by_field_name("name")
                        .and_then(|name| name.utf8_text(bytes).ok())
                        .map(str::to_string),
                    "wildcard_import" => None,
                    _ => None,
                };
                if let Some(name) = imported {
                    let joined = format!("{module}.{name}")
                        .trim_matches('.')
                        .to_string();
                    let shown_module = if module.is_empty() { "." } else { &module };
                    candidates.push(ReferenceCandidate {
                        line,
                        symbol: joined,
                        kind: "import",
                        evidence: format!("from {shown_module} import {name}"),
                        confidence: "high",
                    });
                }
            }
        }
        "class_definition" => {
            let class_name = node
                .child_by_field_name("name")
                .and_then(|name| name.utf8_text(bytes).ok())
                .unwrap_or("");
            if let Some(superclasses) = node.child_by_field_name("superclasses") {
                let mut cursor = superclasses.walk();
                for base in superclasses.named_children(&mut cursor) {
                    if let Some(dotted) = dotted_name(base, bytes) {
                        candidates.push(ReferenceCandidate {
                            line,
                            evidence: format!("class {class_name}({dotted})"),
                            symbol: dotted,
                            kind: "inheritance",
                            confidence: "high",
                        });
                    }
                }
            }
        }
        "call" => {
            if let Some(function) = node.child_by_field_name("function")
                && let Some(dotted) = dotted_name(function, bytes)
            {
                let last = dotted.rsplit('.').next().unwrap_or(&dotted);
                let kind = if last.chars().next().is_some_and(char::is_uppercase) {
                    "instantiation"
                } else {
                    "call"
                };
                let confidence = if dotted.contains('.') { "high" } else { "medium" };
                candidates.push(ReferenceCandidate {
                    line,
                    evidence: format!("{dotted}()"),
                    symbol: dotted,
                    kind,
                    confidence,
                });
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        collect_reference_candidates(child, bytes, candidates);
    }
}

fn candidate_matches_symbol(candidate: &str, symbol: &str, short_symbol: &str) -> bool {
    candidate == symbol
        || candidate == short_symbol
        || candidate.ends_with(&format!(".{short_symbol}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline_of(text: &str) -> Vec<OutlineSymbol> {
        PythonAstAdapter::new().outline("m.py", text).unwrap()
    }

    #[test]
    fn outline_orders_class_method_function() {
        let symbols = outline_of(
            "class A:\n    def m(self):\n        pass\n\ndef f(x):\n    return x\n",
        );
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "A.m", "f"]);

        let method = &symbols[1];
        assert_eq!(method.kind, "method");
        assert_eq!(method.parent_symbol.as_deref(), Some("A"));
        assert_eq!(method.scope_kind.as_deref(), Some("class"));
        assert_eq!(method.signature.as_deref(), Some("(self)"));

        let function = &symbols[2];
        assert_eq!(function.kind, "function");
        assert_eq!(function.scope_kind.as_deref(), Some("module"));
        assert_eq!(function.parent_symbol, None);
    }

    #[test]
    fn conditional_and_nested_declarations_are_captured() {
        let symbols = outline_of(
            "if True:\n    try:\n        def inner():\n            pass\n    except Exception:\n        pass\n",
        );
        let inner = symbols.iter().find(|s| s.name == "inner").unwrap();
        assert_eq!(inner.is_conditional, Some(true));
        assert_eq!(inner.decl_context.as_deref(), Some("if>try"));
    }

    #[test]
    fn async_control_constructs_keep_their_qualifier() {
        let symbols = outline_of(
            "async def outer():\n    async with ctx() as c:\n        async for item in c:\n            def inner():\n                pass\n",
        );
        let inner = symbols.iter().find(|s| s.name == "outer.inner").unwrap();
        assert_eq!(inner.decl_context.as_deref(), Some("async_with>async_for"));
        assert_eq!(inner.is_conditional, Some(true));

        // The plain forms keep their unqualified labels.
        let symbols = outline_of(
            "with ctx() as c:\n    for item in c:\n        def plain():\n            pass\n",
        );
        let plain = symbols.iter().find(|s| s.name == "plain").unwrap();
        assert_eq!(plain.decl_context.as_deref(), Some("with>for"));
    }

    #[test]
    fn async_and_docstrings_are_reported() {
        let symbols = outline_of(
            "class S:\n    \"\"\"Service doc.\n    More.\"\"\"\n    async def run(self, x):\n        pass\n",
        );
        let class = symbols.iter().find(|s| s.name == "S").unwrap();
        assert_eq!(class.doc.as_deref(), Some("Service doc."));
        assert_eq!(class.signature.as_deref(), Some("()"));
        let run = symbols.iter().find(|s| s.name == "S.run").unwrap();
        assert_eq!(run.kind, "async_method");
        assert_eq!(run.signature.as_deref(), Some("(self, x)"));
    }

    #[test]
    fn class_bases_shape_the_signature() {
        let symbols = outline_of("class Child(Base, mixin.Extra):\n    pass\n");
        let child = symbols.iter().find(|s| s.name == "Child").unwrap();
        assert_eq!(child.signature.as_deref(), Some("(Base, mixin.Extra)"));
    }

    #[test]
    fn broken_source_yields_empty_outline() {
        // Tree-sitter recovers from partial syntax; a fully broken file
        // still produces no declared symbols.
        let symbols = outline_of(")))(((");
        assert!(symbols.is_empty());
    }

    #[test]
    fn outline_is_deterministic_across_calls() {
        let text = "class A:\n    def m(self):\n        pass\n";
        assert_eq!(outline_of(text), outline_of(text));
    }

    fn fixture() -> Vec<(String, String)> {
        vec![
            (
                "app.py".to_string(),
                "import service\nfrom service import Service\n\nclass Worker(Service):\n    pass\n\nhandle = Service()\nresult = service.run()\n".to_string(),
            ),
            ("notes.md".to_string(), "Service everywhere\n".to_string()),
        ]
    }

    #[test]
    fn references_cover_import_inheritance_instantiation_call() {
        let adapter = PythonAstAdapter::new();
        let refs = adapter
            .references_for_symbol("Service", &fixture(), None)
            .unwrap();
        let kinds: Vec<&str> = refs.iter().map(|r| r.kind.as_str()).collect();
        assert!(kinds.contains(&"import"));
        assert!(kinds.contains(&"inheritance"));
        assert!(kinds.contains(&"instantiation"));
        for reference in &refs {
            assert_eq!(reference.strategy, "ast");
            assert_eq!(reference.path, "app.py");
        }

        // Dotted call matches the short name of service.run.
        let run_refs = adapter
            .references_for_symbol("service.run", &fixture(), None)
            .unwrap();
        assert!(run_refs.iter().any(|r| r.kind == "call"));
    }

    #[test]
    fn references_are_sorted_and_repeatable() {
        let adapter = PythonAstAdapter::new();
        let first = adapter
            .references_for_symbol("Service", &fixture(), None)
            .unwrap();
        let second = adapter
            .references_for_symbol("Service", &fixture(), None)
            .unwrap();
        assert_eq!(first, second);
        let mut resorted = first.clone();
        resorted.sort_by(|a, b| {
            (a.path.as_str(), a.line, a.symbol.as_str(), a.kind.as_str())
                .cmp(&(b.path.as_str(), b.line, b.symbol.as_str(), b.kind.as_str()))
        });
        assert_eq!(first, resorted);
    }

    #[test]
    fn batch_resolution_shares_the_candidate_pass() {
        let adapter = PythonAstAdapter::new();
        let grouped = adapter
            .references_for_symbols(
                &["Service".to_string(), "service.run".to_string()],
                &fixture(),
                Some(10),
            )
            .unwrap();
        assert!(!grouped["Service"].is_empty());
        assert!(!grouped["service.run"].is_empty());
    }

    #[test]
    fn top_k_truncates_references() {
        let adapter = PythonAstAdapter::new();
        let refs = adapter
            .references_for_symbol("Service", &fixture(), Some(1))
            .unwrap();
        assert_eq!(refs.len(), 1);
    }
}

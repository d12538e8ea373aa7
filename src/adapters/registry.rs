//! Filepath: src/adapters/registry.rs
//! Adapter registry with deterministic first-match selection.

use crate::adapters::base::LanguageAdapter;

/// Ordered adapter registry with one explicit fallback.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn LanguageAdapter>>,
    fallback: Option<Box<dyn LanguageAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter in deterministic insertion order.
    pub fn register(&mut self, adapter: Box<dyn LanguageAdapter>) {
        self.adapters.push(adapter);
    }

    /// Register the fallback consulted when nothing else matches.
    pub fn register_fallback(&mut self, adapter: Box<dyn LanguageAdapter>) {
        self.fallback = Some(adapter);
    }

    /// Select the first adapter that supports the path, else the fallback.
    pub fn select(&self, path: &str) -> Option<&dyn LanguageAdapter> {
        self.adapters
            .iter()
            .find(|adapter| adapter.supports_path(path))
            .map(Box::as_ref)
            .or(self.fallback.as_deref())
    }

    /// Registered adapter names in deterministic order, fallback last.
    pub fn names(&self) -> Vec<&'static str> {
        let mut ordered: Vec<&'static str> =
            self.adapters.iter().map(|adapter| adapter.name()).collect();
        if let Some(fallback) = &self.fallback {
            ordered.push(fallback.name());
        }
        ordered
    }

    /// All non-fallback adapters with their registration index, for
    /// callers that group work per adapter.
    pub fn adapters(&self) -> impl Iterator<Item = (usize, &dyn LanguageAdapter)> {
        self.adapters
            .iter()
            .enumerate()
            .map(|(index, adapter)| (index, adapter.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fallback::LexicalFallbackAdapter;
    use crate::adapters::go::GoLexicalAdapter;
    use crate::adapters::rust::RustLexicalAdapter;

    fn registry() -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(GoLexicalAdapter));
        registry.register(Box::new(RustLexicalAdapter));
        registry.register_fallback(Box::new(LexicalFallbackAdapter));
        registry
    }

    #[test]
    fn selects_first_supporting_adapter() {
        let registry = registry();
        assert_eq!(registry.select("main.go").unwrap().name(), "go_lexical");
        assert_eq!(registry.select("lib.rs").unwrap().name(), "rust_lexical");
    }

    #[test]
    fn unsupported_paths_fall_back() {
        let registry = registry();
        assert_eq!(registry.select("README.md").unwrap().name(), "lexical");
    }

    #[test]
    fn names_preserve_registration_order() {
        assert_eq!(
            registry().names(),
            vec!["go_lexical", "rust_lexical", "lexical"]
        );
    }

    #[test]
    fn empty_registry_without_fallback_selects_nothing() {
        let registry = AdapterRegistry::new();
        assert!(registry.select("x.py").is_none());
    }
}

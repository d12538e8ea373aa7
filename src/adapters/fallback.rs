//! Filepath: src/adapters/fallback.rs
//! Fallback adapter for content-only files (Markdown, config, data).

use crate::adapters::base::{AdapterContractError, LanguageAdapter, OutlineSymbol};

/// Accepts every path, yields no symbols and no references.
pub struct LexicalFallbackAdapter;

impl LanguageAdapter for LexicalFallbackAdapter {
    fn name(&self) -> &'static str {
        "lexical"
    }

    fn supports_path(&self, _path: &str) -> bool {
        true
    }

    fn outline(
        &self,
        _path: &str,
        _text: &str,
    ) -> Result<Vec<OutlineSymbol>, AdapterContractError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_everything_and_emits_nothing() {
        let adapter = LexicalFallbackAdapter;
        assert!(adapter.supports_path("README.md"));
        assert!(adapter.supports_path("conf/settings.toml"));
        assert!(adapter.outline("README.md", "# Title\n").unwrap().is_empty());
        assert!(
            adapter
                .references_for_symbol("Anything", &[], None)
                .unwrap()
                .is_empty()
        );
    }
}

//! Filepath: src/adapters/runtime.rs
//! Runtime adapter registry construction from effective config.

use crate::adapters::cpp::CppLexicalAdapter;
use crate::adapters::csharp::CSharpLexicalAdapter;
use crate::adapters::fallback::LexicalFallbackAdapter;
use crate::adapters::go::GoLexicalAdapter;
use crate::adapters::java::JavaLexicalAdapter;
use crate::adapters::python::PythonAstAdapter;
use crate::adapters::registry::AdapterRegistry;
use crate::adapters::rust::RustLexicalAdapter;
use crate::adapters::ts_js::TypeScriptJavaScriptLexicalAdapter;
use crate::config::EffectiveConfig;

/// Build the default adapter registry.
///
/// The lexical family is always on in a stable order; the Python AST
/// adapter is toggleable and, when disabled, `.py` files fall through to
/// the fallback.
pub fn build_adapter_registry(config: &EffectiveConfig) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    if config.adapters.python_enabled {
        registry.register(Box::new(PythonAstAdapter::new()));
    }
    registry.register(Box::new(TypeScriptJavaScriptLexicalAdapter));
    registry.register(Box::new(JavaLexicalAdapter));
    registry.register(Box::new(GoLexicalAdapter));
    registry.register(Box::new(RustLexicalAdapter));
    registry.register(Box::new(CppLexicalAdapter));
    registry.register(Box::new(CSharpLexicalAdapter));
    registry.register_fallback(Box::new(LexicalFallbackAdapter));
    registry
}

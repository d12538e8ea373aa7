//! Filepath: src/tools/registry.rs
//! Deterministic tool registration and dispatch primitives.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::index::store::IndexSchemaUnsupported;
use crate::security::paths::PathBlocked;
use crate::security::policy::PolicyBlocked;

/// Failure surface of a tool handler, translated by the dispatcher into
/// the protocol's error / blocked envelopes.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Sandbox or policy refusal; becomes a blocked envelope.
    #[error("{reason}")]
    Blocked { reason: String, hint: String },
    /// Deterministic dispatch failure with an explicit protocol code.
    #[error("{message}")]
    Dispatch { code: String, message: String },
    /// Stored index schema does not match this build.
    #[error(transparent)]
    Schema(#[from] IndexSchemaUnsupported),
    /// Anything else; detail never leaks to the caller.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ToolError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::Dispatch {
            code: "INVALID_PARAMS".to_string(),
            message: message.into(),
        }
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::Dispatch {
            code: "UNKNOWN_TOOL".to_string(),
            message: format!("Unknown tool: {name}"),
        }
    }
}

impl From<PathBlocked> for ToolError {
    fn from(blocked: PathBlocked) -> Self {
        Self::Blocked {
            reason: blocked.reason,
            hint: blocked.hint,
        }
    }
}

impl From<PolicyBlocked> for ToolError {
    fn from(blocked: PolicyBlocked) -> Self {
        Self::Blocked {
            reason: blocked.reason,
            hint: blocked.hint,
        }
    }
}

pub type ToolHandler = Box<dyn Fn(&Map<String, Value>) -> Result<Value, ToolError>>;

/// In-memory tool registry preserving deterministic insertion order.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: IndexMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named handler.
    pub fn register(&mut self, name: &str, handler: ToolHandler) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Registered tool names in deterministic order.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Dispatch to a registered tool by name.
    pub fn dispatch(&self, name: &str, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        match self.handlers.get(name) {
            Some(handler) => handler(arguments),
            None => Err(ToolError::unknown_tool(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dispatches_in_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register("repo.alpha", Box::new(|_| Ok(json!({"ok": 1}))));
        registry.register("repo.beta", Box::new(|_| Ok(json!({"ok": 2}))));
        assert_eq!(registry.names(), vec!["repo.alpha", "repo.beta"]);

        let result = registry.dispatch("repo.beta", &Map::new()).unwrap();
        assert_eq!(result, json!({"ok": 2}));
    }

    #[test]
    fn unknown_tool_is_a_typed_error() {
        let registry = ToolRegistry::new();
        let err = registry.dispatch("repo.nope", &Map::new()).unwrap_err();
        match err {
            ToolError::Dispatch { code, message } => {
                assert_eq!(code, "UNKNOWN_TOOL");
                assert!(message.contains("repo.nope"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn blocked_errors_carry_reason_and_hint() {
        let err: ToolError = PolicyBlocked {
            reason: "File is denylisted by security policy.".to_string(),
            hint: "Use a non-sensitive file path under repo_root.".to_string(),
        }
        .into();
        match err {
            ToolError::Blocked { reason, hint } => {
                assert!(reason.contains("denylisted"));
                assert!(!hint.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

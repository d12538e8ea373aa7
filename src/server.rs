//! Filepath: src/server.rs
//! JSON-line request dispatcher.
//!
//! One JSON object per input line, one per output line, strictly
//! request-sequential. Every request produces exactly one audit record,
//! whatever its outcome. Responses over the byte budget are replaced by a
//! blocked envelope; internal failures never leak detail to the caller.

use std::cell::Cell;
use std::io::{BufRead, Write};
use std::rc::Rc;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::{debug, error};

use crate::config::EffectiveConfig;
use crate::logging::audit::{AuditEvent, sanitize_arguments, utc_timestamp};
use crate::tools::builtin::{ServerContext, register_builtin_tools};
use crate::tools::registry::{ToolError, ToolRegistry};

/// Normalized incoming request.
struct Request {
    request_id: String,
    method: String,
    params: Map<String, Value>,
}

/// Deterministic STDIO server for tool routing.
pub struct StdioServer {
    ctx: Rc<ServerContext>,
    registry: ToolRegistry,
    fallback_request_counter: Cell<u64>,
}

impl StdioServer {
    pub fn new(config: EffectiveConfig) -> Result<Self> {
        let ctx = Rc::new(ServerContext::new(config)?);
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, ctx.clone());
        Ok(Self {
            ctx,
            registry,
            fallback_request_counter: Cell::new(0),
        })
    }

    /// Process JSON-line requests until EOF; one response per request.
    pub fn serve(&self, input: impl BufRead, mut output: impl Write) -> Result<()> {
        for line in input.lines() {
            let raw_line = line.context("read request line")?;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let response = self.handle_json_line(trimmed);
            writeln!(output, "{response}").context("write response line")?;
            output.flush().context("flush response")?;
        }
        Ok(())
    }

    /// Handle a single JSON-line request and return its envelope.
    pub fn handle_json_line(&self, raw_line: &str) -> Value {
        let payload: Value = match serde_json::from_str(raw_line) {
            Ok(payload) => payload,
            Err(_) => {
                let request_id = self.next_request_id();
                let envelope = error_response(
                    &request_id,
                    "INVALID_JSON",
                    "Request must be valid JSON.",
                );
                self.append_audit(&request_id, "unknown", &Map::new(), &envelope);
                return envelope;
            }
        };
        self.handle_payload(payload)
    }

    fn handle_payload(&self, payload: Value) -> Value {
        let request = match self.parse_request(payload) {
            Ok(request) => request,
            Err((request_id, envelope)) => {
                self.append_audit(&request_id, "unknown", &Map::new(), &envelope);
                return envelope;
            }
        };

        // Unwrap the tools/call wrapper form when present.
        let (tool_name, arguments) = if request.method == "tools/call" {
            let name = request.params.get("name").and_then(Value::as_str);
            let Some(name) = name.filter(|name| !name.is_empty()) else {
                let envelope = error_response(
                    &request.request_id,
                    "INVALID_PARAMS",
                    "tools/call params.name must be a non-empty string.",
                );
                self.append_audit(&request.request_id, "tools/call", &Map::new(), &envelope);
                return envelope;
            };
            let arguments = match request.params.get("arguments") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => {
                    let envelope = error_response(
                        &request.request_id,
                        "INVALID_PARAMS",
                        "tools/call params.arguments must be an object.",
                    );
                    self.append_audit(&request.request_id, name, &Map::new(), &envelope);
                    return envelope;
                }
            };
            (name.to_string(), arguments)
        } else {
            (request.method.clone(), request.params.clone())
        };

        let envelope = self.dispatch_to_envelope(&request.request_id, &tool_name, &arguments);
        let envelope = self.enforce_response_budget(&request.request_id, envelope);
        self.append_audit(&request.request_id, &tool_name, &arguments, &envelope);
        envelope
    }

    fn dispatch_to_envelope(
        &self,
        request_id: &str,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Value {
        match self.registry.dispatch(tool_name, arguments) {
            Ok(mut result) => {
                // Handler-attached warnings lift into the envelope.
                let warnings = match result.as_object_mut() {
                    Some(object) => match object.remove("__warnings__") {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    },
                    None => Vec::new(),
                };
                success_response(request_id, result, warnings)
            }
            Err(ToolError::Blocked { reason, hint }) => {
                blocked_response(request_id, &reason, &hint)
            }
            Err(ToolError::Dispatch { code, message }) => {
                error_response(request_id, &code, &message)
            }
            Err(ToolError::Schema(schema)) => error_response(
                request_id,
                "INDEX_SCHEMA_UNSUPPORTED",
                &format!(
                    "Index schema version {} is unsupported; expected {}. \
                     Run repo.refresh_index with force=true to rebuild.",
                    schema.found, schema.expected
                ),
            ),
            Err(ToolError::Internal(detail)) => {
                // Detail goes to the operator log only, never the caller.
                error!(tool = tool_name, error = %detail, "tool execution failed");
                error_response(
                    request_id,
                    "INTERNAL_ERROR",
                    "Unhandled server error while executing tool.",
                )
            }
        }
    }

    /// Replace any over-budget response with a small blocked envelope.
    fn enforce_response_budget(&self, request_id: &str, envelope: Value) -> Value {
        let encoded_len = envelope.to_string().len();
        if encoded_len <= self.ctx.config.limits.max_total_bytes_per_response {
            return envelope;
        }
        debug!(
            bytes = encoded_len,
            limit = self.ctx.config.limits.max_total_bytes_per_response,
            "response over byte budget"
        );
        blocked_response(
            request_id,
            "Response exceeds max_total_bytes_per_response limit.",
            "Narrow the request or lower the requested limits.",
        )
    }

    fn parse_request(&self, payload: Value) -> Result<Request, (String, Value)> {
        let Value::Object(object) = payload else {
            let request_id = self.next_request_id();
            let envelope = error_response(
                &request_id,
                "INVALID_REQUEST",
                "Request must be an object.",
            );
            return Err((request_id, envelope));
        };

        let request_id = self.extract_request_id(object.get("id"));
        let method = match object.get("method") {
            Some(Value::String(method)) if !method.is_empty() => method.clone(),
            _ => {
                let envelope = error_response(
                    &request_id,
                    "INVALID_REQUEST",
                    "Request method must be a non-empty string.",
                );
                return Err((request_id, envelope));
            }
        };
        let params = match object.get("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                let envelope = error_response(
                    &request_id,
                    "INVALID_PARAMS",
                    "Request params must be an object.",
                );
                return Err((request_id, envelope));
            }
        };
        Ok(Request {
            request_id,
            method,
            params,
        })
    }

    fn extract_request_id(&self, raw: Option<&Value>) -> String {
        match raw {
            Some(Value::String(text)) if !text.is_empty() => text.clone(),
            Some(Value::Number(number)) if number.is_i64() || number.is_u64() => {
                number.to_string()
            }
            _ => self.next_request_id(),
        }
    }

    fn next_request_id(&self) -> String {
        let next = self.fallback_request_counter.get() + 1;
        self.fallback_request_counter.set(next);
        format!("req-{next:06}")
    }

    /// Exactly one audit record per request; append failures only log.
    fn append_audit(
        &self,
        request_id: &str,
        tool: &str,
        arguments: &Map<String, Value>,
        envelope: &Value,
    ) {
        let ok = envelope.get("ok").and_then(Value::as_bool).unwrap_or(false);
        let blocked = envelope
            .get("blocked")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let error_code = envelope
            .get("error")
            .and_then(|error| error.get("code"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let event = AuditEvent {
            timestamp: utc_timestamp(),
            request_id: request_id.to_string(),
            tool: tool.to_string(),
            ok,
            blocked,
            error_code,
            metadata: sanitize_arguments(arguments),
        };
        if let Err(error) = self.ctx.audit.append(&event) {
            error!(error = %error, "failed to append audit event");
        }
    }
}

fn success_response(request_id: &str, result: Value, warnings: Vec<Value>) -> Value {
    json!({
        "request_id": request_id,
        "ok": true,
        "result": result,
        "warnings": warnings,
        "blocked": false,
    })
}

fn error_response(request_id: &str, code: &str, message: &str) -> Value {
    json!({
        "request_id": request_id,
        "ok": false,
        "result": {},
        "warnings": [],
        "blocked": false,
        "error": {"code": code, "message": message},
    })
}

fn blocked_response(request_id: &str, reason: &str, hint: &str) -> Value {
    json!({
        "request_id": request_id,
        "ok": false,
        "result": {"reason": reason, "hint": hint},
        "warnings": [],
        "blocked": true,
        "error": {"code": "PATH_BLOCKED", "message": reason},
    })
}

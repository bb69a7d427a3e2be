//! JSON-RPC 2.0 framing for the stdio protocol.
//!
//! Inbound lines are decoded once, at the boundary, into [`Incoming`]; every
//! malformed shape becomes a [`DecodeError`] that already knows which `id`
//! and error code to answer with.

use serde::Serialize;
use serde_json::Value;

use crate::tools::ToolCall;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-06-18";
pub const SERVER_NAME: &str = "instruction-executor";

pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }

    pub fn internal(detail: impl std::fmt::Display) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: format!("Internal error: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

/// One response line. Exactly one of `result` / `error` is present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: Outcome::Error(error),
        }
    }
}

/// Methods that expect a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initialize,
    ListTools,
    CallTool(ToolCall),
}

impl Call {
    pub fn method(&self) -> &'static str {
        match self {
            Call::Initialize => "initialize",
            Call::ListTools => "tools/list",
            Call::CallTool(_) => "tools/call",
        }
    }
}

/// A decoded request line.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Call { id: Value, call: Call },
    /// No `id`: handled, never answered.
    Notification { method: String },
}

/// A line that cannot be dispatched, with the response it should get.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub id: Value,
    pub error: RpcError,
}

impl DecodeError {
    pub fn into_response(self) -> Response {
        Response::error(self.id, self.error)
    }
}

/// Parse one protocol line. Anything that is not JSON is answered with a
/// null id.
pub fn parse_value(line: &str) -> Result<Value, DecodeError> {
    serde_json::from_str(line).map_err(|err| DecodeError {
        id: Value::Null,
        error: RpcError::internal(err),
    })
}

pub fn decode(value: &Value) -> Result<Incoming, DecodeError> {
    let Some(object) = value.as_object() else {
        return Err(DecodeError {
            id: Value::Null,
            error: RpcError::invalid_params("Request must be a JSON object"),
        });
    };
    let id = object.get("id").filter(|id| !id.is_null()).cloned();
    let reject = |error: RpcError| DecodeError {
        id: id.clone().unwrap_or(Value::Null),
        error,
    };

    let Some(method) = object.get("method").and_then(Value::as_str) else {
        return Err(reject(RpcError::invalid_params("Missing method")));
    };
    let Some(id) = id.clone() else {
        return Ok(Incoming::Notification {
            method: method.to_string(),
        });
    };
    let params = object.get("params").unwrap_or(&Value::Null);

    let call = match method {
        "initialize" => Call::Initialize,
        "tools/list" => Call::ListTools,
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Err(reject(RpcError::invalid_params("Missing tool name")));
            };
            let arguments = params.get("arguments").unwrap_or(&Value::Null);
            Call::CallTool(ToolCall::parse(name, arguments).map_err(reject)?)
        }
        other => {
            return Err(reject(RpcError::invalid_params(format!(
                "Unknown method: {other}"
            ))));
        }
    };
    Ok(Incoming::Call { id, call })
}

/// Free text carried inside a request's params: tool arguments, a bare
/// message, or chat-style message content.
pub fn nested_texts(request: &Value) -> Vec<&str> {
    let Some(params) = request.get("params") else {
        return Vec::new();
    };
    let mut texts = Vec::new();
    if let Some(arguments) = params.get("arguments") {
        texts.extend(
            ["user_input", "message"]
                .into_iter()
                .filter_map(|key| arguments.get(key).and_then(Value::as_str)),
        );
    }
    if let Some(message) = params.get("message").and_then(Value::as_str) {
        texts.push(message);
    }
    if let Some(messages) = params.get("messages").and_then(Value::as_array) {
        texts.extend(messages.iter().filter_map(|message| {
            message
                .get("content")
                .and_then(|content| content.get("text"))
                .and_then(Value::as_str)
        }));
    }
    texts
}

#[derive(Debug, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: &'static str,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Serialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Serialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl InitializeResult {
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME,
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

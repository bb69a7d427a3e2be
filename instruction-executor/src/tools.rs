//! The closed set of tools exposed over `tools/call`.

use serde::Serialize;
use serde_json::{Value, json};

use crate::protocol::RpcError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    StartExecution,
    ExecuteNextStep { user_input: Option<String> },
    GetCurrentState,
    ResetExecution,
    GetHistory,
    RunFullExecution,
    ClearCache,
}

impl ToolCall {
    /// Build a call from its wire name and `arguments` object.
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, RpcError> {
        let call = match name {
            "start_execution" => ToolCall::StartExecution,
            "execute_next_step" => {
                let user_input = match arguments.get("user_input") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(text)) => Some(text.clone()),
                    Some(_) => {
                        return Err(RpcError::invalid_params("user_input must be a string"));
                    }
                };
                ToolCall::ExecuteNextStep { user_input }
            }
            "get_current_state" => ToolCall::GetCurrentState,
            "reset_execution" => ToolCall::ResetExecution,
            "get_history" => ToolCall::GetHistory,
            "run_full_execution" => ToolCall::RunFullExecution,
            "clear_cache" => ToolCall::ClearCache,
            other => return Err(RpcError::invalid_params(format!("Unknown tool: {other}"))),
        };
        Ok(call)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::StartExecution => "start_execution",
            ToolCall::ExecuteNextStep { .. } => "execute_next_step",
            ToolCall::GetCurrentState => "get_current_state",
            ToolCall::ResetExecution => "reset_execution",
            ToolCall::GetHistory => "get_history",
            ToolCall::RunFullExecution => "run_full_execution",
            ToolCall::ClearCache => "clear_cache",
        }
    }
}

/// Entry in the `tools/list` response.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn no_arguments() -> Value {
    json!({"type": "object", "properties": {}})
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "start_execution",
            title: "Start Execution",
            description: "Reload the step source, reset, and return the initial prompt",
            input_schema: no_arguments(),
        },
        ToolDefinition {
            name: "execute_next_step",
            title: "Execute Next Step",
            description: "Hand off the step at the cursor and record the reply",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_input": {
                        "type": "string",
                        "description": "User text for this step (default: 'Next step toward achieving the final goal:')"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "get_current_state",
            title: "Get Current State",
            description: "Snapshot of the cursor, goal flag, history and step source",
            input_schema: no_arguments(),
        },
        ToolDefinition {
            name: "reset_execution",
            title: "Reset Execution",
            description: "Reset the execution to start over",
            input_schema: no_arguments(),
        },
        ToolDefinition {
            name: "get_history",
            title: "Get History",
            description: "Get the execution history",
            input_schema: no_arguments(),
        },
        ToolDefinition {
            name: "run_full_execution",
            title: "Run Full Execution",
            description: "Run steps until the goal is achieved, the steps run out, or the step ceiling is hit",
            input_schema: no_arguments(),
        },
        ToolDefinition {
            name: "clear_cache",
            title: "Clear Cache",
            description: "Reload the step source, reset, and truncate the diagnostic log",
            input_schema: no_arguments(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

/// MCP tool result: text content plus an error flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub content: Vec<TextContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text.into(), false)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text.into(), true)
    }

    fn new(text: String, is_error: bool) -> Self {
        Self {
            content: vec![TextContent { kind: "text", text }],
            is_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_and_parse_agree() {
        let definitions = tool_definitions();
        assert_eq!(definitions.len(), 7);
        for definition in &definitions {
            let call = ToolCall::parse(definition.name, &Value::Null).expect("known tool");
            assert_eq!(call.name(), definition.name);
            assert_eq!(definition.input_schema["type"], "object");
        }
    }

    #[test]
    fn execute_next_step_reads_user_input() {
        assert_eq!(
            ToolCall::parse("execute_next_step", &json!({"user_input": "go"})),
            Ok(ToolCall::ExecuteNextStep {
                user_input: Some("go".to_string())
            })
        );
        assert_eq!(
            ToolCall::parse("execute_next_step", &json!({})),
            Ok(ToolCall::ExecuteNextStep { user_input: None })
        );
        let err = ToolCall::parse("execute_next_step", &json!({"user_input": 3}))
            .expect_err("wrong type");
        assert_eq!(err.code, crate::protocol::INVALID_PARAMS);
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let err = ToolCall::parse("nonexistent_tool", &Value::Null).expect_err("unknown");
        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "Unknown tool: nonexistent_tool");
    }

    #[test]
    fn tool_result_shape() {
        let value = serde_json::to_value(ToolResult::error("no steps")).expect("json");
        assert_eq!(
            value,
            json!({"content": [{"type": "text", "text": "no steps"}], "isError": true})
        );
    }
}

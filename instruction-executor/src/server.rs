//! Request dispatcher: one JSON request per input line, at most one JSON
//! response per output line.
//!
//! The dispatcher owns the execution state, the interruption handler and
//! every collaborator. Requests are handled strictly in order; nothing is
//! read until the previous response has been written.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument};

use crate::core::classifier::{InterruptionDecision, TextSource, classify, classify_from};
use crate::core::interruption::{AutoConfirmPolicy, InterruptionHandler};
use crate::core::state::ExecutionState;
use crate::execution::{self, DEFAULT_USER_INPUT, ExecEnv, NextStepOutcome, RunLimits};
use crate::io::config::ServerConfig;
use crate::io::diagnostic_log::DiagnosticLog;
use crate::io::handoff::StepRunner;
use crate::io::prompt::{PromptInputs, render_step_prompt};
use crate::io::relay::Relay;
use crate::io::step_source::StepSource;
use crate::protocol::{
    Call, Incoming, InitializeResult, Response, RpcError, decode, nested_texts, parse_value,
};
use crate::tools::{ToolCall, ToolResult, tool_definitions};

const NO_HISTORY: &str = "No execution history yet.";
const START_INPUT: &str = "Start the execution";
const PREVIEW_CHARS: usize = 200;

/// Everything the dispatcher needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub source: StepSource,
    pub log: DiagnosticLog,
    pub policy: AutoConfirmPolicy,
    pub limits: RunLimits,
}

impl ServerSettings {
    /// Resolve config paths against `cwd`.
    pub fn from_config(cfg: &ServerConfig, cwd: &Path) -> Self {
        Self {
            source: StepSource::resolve(cfg.instructions_path.as_deref(), cwd),
            log: DiagnosticLog::new(cwd.join(&cfg.log_path)),
            policy: cfg.auto_confirm.policy(),
            limits: RunLimits {
                max_steps: cfg.max_steps,
                step_delay: cfg.step_delay(),
            },
        }
    }
}

pub struct Dispatcher<R, B> {
    source: StepSource,
    log: DiagnosticLog,
    limits: RunLimits,
    state: ExecutionState,
    handler: InterruptionHandler,
    runner: R,
    relay: B,
    /// Answer to the last interruption, used as the next step's user text.
    carried_input: Option<String>,
}

impl<R: StepRunner, B: Relay> Dispatcher<R, B> {
    pub fn new(settings: ServerSettings, runner: R, relay: B) -> Self {
        let ServerSettings {
            source,
            log,
            policy,
            limits,
        } = settings;
        log.info(format!("Server started (step source {})", source.path().display()));
        let mut dispatcher = Self {
            source,
            log,
            limits,
            state: ExecutionState::new(),
            handler: InterruptionHandler::new(policy),
            runner,
            relay,
            carried_input: None,
        };
        if let Err(err) = dispatcher.reload_steps() {
            dispatcher
                .log
                .error(format!("Error loading instructions: {err:#}"));
        }
        dispatcher
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Serve until EOF. Only stream failures end the loop with an error.
    pub fn serve(&mut self, mut input: impl BufRead, mut output: impl Write) -> Result<()> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = input.read_until(b'\n', &mut buf).context("read request line")?;
            if read == 0 {
                info!("input closed");
                self.log.info("Input closed, shutting down");
                return Ok(());
            }
            let response = match std::str::from_utf8(&buf) {
                Ok(line) => self.handle_line(line),
                Err(err) => {
                    self.log.error(format!("Undecodable request line: {err}"));
                    Some(Response::error(Value::Null, RpcError::internal(err)))
                }
            };
            if let Some(response) = response {
                write_response(&mut output, &response)?;
            }
        }
    }

    /// Handle one line. `None` for blank lines and notifications.
    pub fn handle_line(&mut self, line: &str) -> Option<Response> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let value = match parse_value(line) {
            Ok(value) => value,
            Err(err) => {
                self.log.error(format!("Malformed request: {}", err.error.message));
                return Some(err.into_response());
            }
        };
        self.log_interactions(line, &value);

        let (id, call) = match decode(&value) {
            Ok(Incoming::Call { id, call }) => (id, call),
            Ok(Incoming::Notification { method }) => {
                debug!(method = %method, "notification");
                self.log.info(format!("Notification: {method}"));
                return None;
            }
            Err(err) => {
                self.log.error(format!("Rejected request: {}", err.error.message));
                return Some(err.into_response());
            }
        };

        match self.dispatch(call) {
            Ok(result) => Some(Response::success(id, result)),
            Err(err) => {
                self.log.error(format!("Request failed: {err:#}"));
                Some(failure_response(id, &err))
            }
        }
    }

    /// Annotate the diagnostic log; never affects dispatch.
    fn log_interactions(&self, line: &str, value: &Value) {
        let method = value.get("method").and_then(Value::as_str).unwrap_or("?");
        self.log.info(format!("Received request: {method}"));
        let raw = classify(line);
        if raw.matched {
            self.log.info(format!(
                "Possible user interaction detected in request: {}",
                describe(&raw)
            ));
        }
        for text in nested_texts(value) {
            let decision = classify_from(text, TextSource::Extracted);
            if decision.matched {
                self.log.info(format!(
                    "Possible user interaction detected in message: {} {text:?}",
                    describe(&decision)
                ));
            }
        }
    }

    #[instrument(skip_all, fields(method = call.method()))]
    fn dispatch(&mut self, call: Call) -> Result<Value> {
        match call {
            Call::Initialize => {
                serde_json::to_value(InitializeResult::current()).context("serialize initialize")
            }
            Call::ListTools => Ok(json!({ "tools": tool_definitions() })),
            Call::CallTool(tool) => {
                let name = tool.name();
                let result = self.call_tool(tool)?;
                serde_json::to_value(result).with_context(|| format!("serialize {name} result"))
            }
        }
    }

    #[instrument(skip_all, fields(tool = tool.name()))]
    fn call_tool(&mut self, tool: ToolCall) -> Result<ToolResult> {
        self.log.info(format!("Calling tool: {}", tool.name()));
        match tool {
            ToolCall::StartExecution => self.start_execution(),
            ToolCall::ExecuteNextStep { user_input } => Ok(self.execute_next_step(user_input)),
            ToolCall::GetCurrentState => self.current_state(),
            ToolCall::ResetExecution => Ok(self.reset_execution()),
            ToolCall::GetHistory => Ok(ToolResult::text(
                self.state.history_text().unwrap_or_else(|| NO_HISTORY.to_string()),
            )),
            ToolCall::RunFullExecution => Ok(self.run_full_execution()),
            ToolCall::ClearCache => Ok(self.clear_cache()),
        }
    }

    fn start_execution(&mut self) -> Result<ToolResult> {
        if let Err(err) = self.reload_steps() {
            return Ok(load_error(&err));
        }
        self.reset();
        let instructions = self.source.render();
        let prompt = render_step_prompt(&PromptInputs {
            instructions: &instructions,
            history: None,
            user_input: START_INPUT,
            step_number: 1,
            step: self.state.current_step_data(),
        })?;
        self.log.info("Execution started");
        Ok(ToolResult::text(format!(
            "Execution started. Initial prompt:\n\n{prompt}"
        )))
    }

    fn execute_next_step(&mut self, user_input: Option<String>) -> ToolResult {
        if let Err(err) = self.reload_steps() {
            return load_error(&err);
        }
        let user_input = user_input
            .or_else(|| self.carried_input.take())
            .unwrap_or_else(|| DEFAULT_USER_INPUT.to_string());
        let instructions = self.source.render();
        let env = ExecEnv {
            runner: &self.runner,
            relay: &self.relay,
            log: &self.log,
            limits: self.limits,
            instructions: &instructions,
        };
        match execution::execute_next_step(&mut self.state, &mut self.handler, &env, &user_input) {
            Ok(outcome) => {
                if let NextStepOutcome::Ran { report, .. } = &outcome {
                    self.carried_input = report
                        .interruption
                        .as_ref()
                        .map(|interruption| interruption.answer.clone());
                }
                ToolResult::text(outcome.render())
            }
            Err(err) => {
                self.log.error(format!("Step execution failed: {err:#}"));
                ToolResult::error(format!("Step execution failed: {err:#}"))
            }
        }
    }

    fn current_state(&self) -> Result<ToolResult> {
        let rendered = self.source.render();
        let snapshot = json!({
            "current_step": self.state.current_step(),
            "goal_achieved": self.state.goal_achieved(),
            "history_length": self.state.history().len(),
            "total_steps": self.state.steps().len(),
            "instructions_file": self.source.path().display().to_string(),
            "instructions_content": preview(&rendered),
        });
        let text = serde_json::to_string_pretty(&snapshot).context("serialize state snapshot")?;
        Ok(ToolResult::text(text))
    }

    fn reset_execution(&mut self) -> ToolResult {
        self.reset();
        if let Err(err) = self.reload_steps() {
            return ToolResult::error(format!(
                "Execution reset. Error loading instructions: {err:#}"
            ));
        }
        self.log.info("Execution reset");
        ToolResult::text("Execution reset. Ready to start again.")
    }

    fn run_full_execution(&mut self) -> ToolResult {
        self.carried_input = None;
        let steps = match self.source.load_steps() {
            Ok(steps) => steps,
            Err(err) => return load_error(&err),
        };
        if steps.is_empty() {
            self.log.error("No steps found in instructions");
            return ToolResult::error(format!(
                "No steps found in {}",
                self.source.path().display()
            ));
        }
        self.state.load_steps(steps);

        let instructions = self.source.render();
        let env = ExecEnv {
            runner: &self.runner,
            relay: &self.relay,
            log: &self.log,
            limits: self.limits,
            instructions: &instructions,
        };
        match execution::run_full_execution(&mut self.state, &mut self.handler, &env) {
            Ok(outcome) => ToolResult::text(outcome.render()),
            Err(err) => ToolResult::error(format!("Execution failed: {err:#}")),
        }
    }

    fn clear_cache(&mut self) -> ToolResult {
        self.log.truncate();
        self.reset();
        if let Err(err) = self.reload_steps() {
            return load_error(&err);
        }
        self.log.info("Cache cleared");
        ToolResult::text("Cache cleared and instructions reloaded successfully.")
    }

    fn reset(&mut self) {
        self.state.reset();
        self.handler.reset();
        self.relay.discard_pending();
        self.carried_input = None;
    }

    fn reload_steps(&mut self) -> Result<usize> {
        let steps = self.source.load_steps()?;
        let count = steps.len();
        self.state.load_steps(steps);
        debug!(steps = count, "steps reloaded");
        Ok(count)
    }
}

fn write_response(output: &mut impl Write, response: &Response) -> Result<()> {
    let mut line = serde_json::to_string(response).context("serialize response")?;
    line.push('\n');
    output.write_all(line.as_bytes()).context("write response")?;
    output.flush().context("flush response")
}

/// A handler that fails outright still answers its own request, with -32603.
fn failure_response(id: Value, err: &anyhow::Error) -> Response {
    error!(err = %format!("{err:#}"), "request failed");
    Response::error(id, RpcError::internal(format!("{err:#}")))
}

fn load_error(err: &anyhow::Error) -> ToolResult {
    ToolResult::error(format!("Error loading instructions: {err:#}"))
}

fn describe(decision: &InterruptionDecision) -> String {
    format!(
        "{} ({})",
        decision.pattern_kind.as_str(),
        decision.matched_token.as_deref().unwrap_or("")
    )
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::INTERNAL_ERROR;
    use crate::test_support::{RecordingRelay, ScriptedRunner, dispatcher, write_instructions};

    fn call(id: i64, tool: &str) -> String {
        let params = json!({"name": tool, "arguments": {}});
        json!({"jsonrpc": "2.0", "id": id, "method": "tools/call", "params": params}).to_string()
    }

    fn empty_server(dir: &Path) -> Dispatcher<ScriptedRunner, RecordingRelay> {
        dispatcher(dir, ScriptedRunner::default(), RecordingRelay::default())
    }

    fn result_text(response: &Response) -> String {
        let value = serde_json::to_value(response).expect("json");
        value["result"]["content"][0]["text"]
            .as_str()
            .expect("text content")
            .to_string()
    }

    #[test]
    fn preview_truncates_by_chars() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(250);
        let cut = preview(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 3);
    }

    #[test]
    fn blank_lines_and_notifications_get_no_response() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut server = empty_server(temp.path());
        assert_eq!(server.handle_line("   \n"), None);
        assert_eq!(
            server.handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
            None
        );
    }

    #[test]
    fn handler_failure_answers_with_the_request_id() {
        let err = anyhow::anyhow!("disk full").context("serialize get_current_state result");
        let value = serde_json::to_value(failure_response(json!("req-7"), &err)).expect("json");
        assert_eq!(value["id"], "req-7");
        assert_eq!(value["error"]["code"], INTERNAL_ERROR);
        assert_eq!(
            value["error"]["message"],
            "Internal error: serialize get_current_state result: disk full"
        );
        assert!(value.get("result").is_none());
    }

    #[test]
    fn resets_drop_queued_relay_answers() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_instructions(temp.path(), &["a"]);
        let mut server = empty_server(temp.path());
        assert!(server.relay.discards().is_empty());

        server.handle_line(&call(1, "reset_execution")).expect("response");
        server.handle_line(&call(2, "start_execution")).expect("response");
        server.handle_line(&call(3, "clear_cache")).expect("response");
        assert_eq!(server.relay.discards().len(), 3);
    }

    #[test]
    fn start_execution_resets_and_returns_prompt() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_instructions(temp.path(), &["read file A", "write file B"]);
        let mut server = dispatcher(
            temp.path(),
            ScriptedRunner::new(["read it"]),
            RecordingRelay::default(),
        );

        server.handle_line(&call(1, "execute_next_step")).expect("response");
        assert_eq!(server.state().current_step(), 1);

        let response = server.handle_line(&call(2, "start_execution")).expect("response");
        let text = result_text(&response);
        assert!(text.starts_with("Execution started. Initial prompt:\n\n"));
        assert!(text.contains("Step 1: read file A"));
        assert!(text.contains("# Fixture instructions"));
        assert_eq!(server.state().current_step(), 0);
    }

    #[test]
    fn execute_next_step_carries_interruption_answer() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_instructions(temp.path(), &["a", "b", "c"]);
        let runner = ScriptedRunner::new(["Would you like to proceed?", "ok", "ok"]);
        let mut server = dispatcher(temp.path(), runner, RecordingRelay::default());

        let first =
            result_text(&server.handle_line(&call(1, "execute_next_step")).expect("response"));
        assert!(first.contains("answered by auto-confirm"));

        server.handle_line(&call(2, "execute_next_step")).expect("response");
        let history = server.state().history_text().expect("history");
        assert!(history.contains("USER: y\n"));

        let explicit = json!({
            "id": 3,
            "method": "tools/call",
            "params": {"name": "execute_next_step", "arguments": {"user_input": "custom"}}
        });
        server.handle_line(&explicit.to_string()).expect("response");
        assert_eq!(server.state().history()[4].text, "custom");
    }

    #[test]
    fn run_full_execution_without_steps_is_an_error_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut server = empty_server(temp.path());
        let response = server.handle_line(&call(9, "run_full_execution")).expect("response");
        let value = serde_json::to_value(&response).expect("json");
        assert_eq!(value["id"], 9);
        assert_eq!(value["result"]["isError"], true);
        assert!(
            value["result"]["content"][0]["text"]
                .as_str()
                .expect("text")
                .starts_with("No steps found")
        );
    }

    #[test]
    fn malformed_step_source_is_reported_as_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("instructions.json"), "{ not json").expect("write");
        let mut server = empty_server(temp.path());

        let response = server.handle_line(&call(1, "get_current_state")).expect("response");
        let snapshot: Value =
            serde_json::from_str(&result_text(&response)).expect("snapshot json");
        assert!(
            snapshot["instructions_content"]
                .as_str()
                .expect("content")
                .starts_with("# Error reading instructions")
        );

        let response = server.handle_line(&call(2, "clear_cache")).expect("response");
        assert!(result_text(&response).starts_with("Error loading instructions"));
    }

    #[test]
    fn clear_cache_truncates_log_and_resets() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_instructions(temp.path(), &["a"]);
        let mut server = dispatcher(
            temp.path(),
            ScriptedRunner::new(["progress"]),
            RecordingRelay::default(),
        );
        server.handle_line(&call(1, "execute_next_step")).expect("response");
        assert_eq!(server.state().current_step(), 1);

        let response = server.handle_line(&call(2, "clear_cache")).expect("response");
        assert_eq!(
            result_text(&response),
            "Cache cleared and instructions reloaded successfully."
        );
        assert_eq!(server.state().current_step(), 0);

        let log = std::fs::read_to_string(temp.path().join("execution.log")).expect("log");
        assert!(!log.contains("Step 1: a"));
        assert!(log.contains("Cache cleared"));
    }

    #[test]
    fn interaction_markers_are_logged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut server = empty_server(temp.path());
        let request = json!({
            "id": 1,
            "method": "tools/call",
            "params": {"name": "execute_next_step", "arguments": {"user_input": "Which one?"}}
        });
        server.handle_line(&request.to_string()).expect("response");

        let log = std::fs::read_to_string(temp.path().join("execution.log")).expect("log");
        assert!(log.contains("Received request: tools/call"));
        assert!(log.contains("Possible user interaction detected in message: question"));
    }
}

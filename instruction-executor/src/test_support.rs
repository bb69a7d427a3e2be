//! Test-only helpers: scripted collaborators and step document fixtures.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::json;

use crate::core::interruption::AutoConfirmPolicy;
use crate::core::types::Step;
use crate::execution::RunLimits;
use crate::io::diagnostic_log::DiagnosticLog;
use crate::io::handoff::{StepRequest, StepRunner};
use crate::io::relay::{Relay, RelayMessage};
use crate::io::step_source::{DEFAULT_FILE_NAME, StepSource};
use crate::server::{Dispatcher, ServerSettings};

/// Step runner that replays canned replies and records every request.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    replies: RefCell<VecDeque<Result<String, String>>>,
    requests: RefCell<Vec<StepRequest>>,
}

impl ScriptedRunner {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(replies.into_iter().map(|reply| Ok(reply.into())))
    }

    /// `Err` entries make the corresponding step fail.
    pub fn from_results(replies: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests.borrow().clone()
    }
}

impl StepRunner for ScriptedRunner {
    fn run(&self, request: &StepRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        match self.replies.borrow_mut().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted runner has no reply for step {}", request.step_number)),
        }
    }
}

/// Relay that records notifications and hands out canned answers immediately.
///
/// Canned answers stand for replies to the next question, so discards are
/// recorded but leave them queued.
#[derive(Debug, Default)]
pub struct RecordingRelay {
    messages: RefCell<Vec<RelayMessage>>,
    answers: RefCell<VecDeque<String>>,
    discards: RefCell<Vec<usize>>,
}

impl RecordingRelay {
    pub fn with_answers<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: RefCell::new(answers.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<RelayMessage> {
        self.messages.borrow().clone()
    }

    /// Number of messages already sent at each `discard_pending` call.
    pub fn discards(&self) -> Vec<usize> {
        self.discards.borrow().clone()
    }
}

impl Relay for RecordingRelay {
    fn session_id(&self) -> &str {
        "build-test"
    }

    fn notify(&self, message: &RelayMessage) {
        self.messages.borrow_mut().push(message.clone());
    }

    fn wait_for_answer(&self, _timeout: Duration) -> Option<String> {
        self.answers.borrow_mut().pop_front()
    }

    fn discard_pending(&self) {
        let sent = self.messages.borrow().len();
        self.discards.borrow_mut().push(sent);
    }
}

/// Numbered steps from descriptions.
pub fn steps(descriptions: &[&str]) -> Vec<Step> {
    descriptions
        .iter()
        .zip(1..)
        .map(|(description, step)| Step {
            step,
            description: (*description).to_string(),
        })
        .collect()
}

/// Write an `instructions.json` with the given step descriptions into `dir`.
pub fn write_instructions(dir: &Path, descriptions: &[&str]) -> PathBuf {
    let path = dir.join(DEFAULT_FILE_NAME);
    let doc = json!({
        "goal": "Finish the fixture task",
        "description": "Fixture instructions",
        "steps": steps(descriptions),
        "success_criteria": ["all steps recorded"],
    });
    let mut payload = serde_json::to_string_pretty(&doc).expect("serialize fixture");
    payload.push('\n');
    fs::write(&path, payload).expect("write instructions fixture");
    path
}

/// Settings pointing at `dir`, with no step delay and an immediate idle timeout.
pub fn settings(dir: &Path) -> ServerSettings {
    ServerSettings {
        source: StepSource::new(dir.join(DEFAULT_FILE_NAME)),
        log: DiagnosticLog::new(dir.join("execution.log")),
        policy: AutoConfirmPolicy {
            idle_timeout: Duration::ZERO,
            ..AutoConfirmPolicy::default()
        },
        limits: RunLimits {
            max_steps: 10,
            step_delay: Duration::ZERO,
        },
    }
}

/// Dispatcher over `dir` with scripted collaborators.
pub fn dispatcher(
    dir: &Path,
    runner: ScriptedRunner,
    relay: RecordingRelay,
) -> Dispatcher<ScriptedRunner, RecordingRelay> {
    Dispatcher::new(settings(dir), runner, relay)
}

//! Step hand-off boundary.
//!
//! The [`StepRunner`] trait decouples the execution loop from whatever
//! actually carries out a step. The server never interprets step text itself;
//! it renders a prompt, hands it over, and records the reply. Tests use
//! scripted runners that return predetermined replies.

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::types::Step;

/// Parameters for one hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRequest {
    pub step: Step,
    /// 1-based position of the step in this run.
    pub step_number: usize,
    /// User text paired with this step in the history.
    pub user_input: String,
    /// Fully rendered prompt.
    pub prompt: String,
}

/// Abstraction over step execution backends.
pub trait StepRunner {
    /// Hand the step over and return the reply text.
    fn run(&self, request: &StepRequest) -> Result<String>;
}

/// Default runner: acknowledges the hand-off and returns control.
///
/// The acknowledgement carries only the step number. Replies are scanned for
/// questions, and step text echoed back would be read as one.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandoffRunner;

impl StepRunner for HandoffRunner {
    #[instrument(skip_all, fields(step = request.step.step, prompt_bytes = request.prompt.len()))]
    fn run(&self, request: &StepRequest) -> Result<String> {
        debug!("handing off step");
        Ok(format!("Step {} handed off", request.step.step))
    }
}

//! Step orchestration shared by `run_full_execution` and `execute_next_step`.
//!
//! One step is: arm the interruption handler, render the prompt, hand it to
//! the [`StepRunner`], record the exchange, then scan the reply for a
//! blocking question. A detected question is answered by policy, by a human
//! through the relay, or by the idle-timeout guard; the answer becomes the
//! user text of the next step.

use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::InterruptionDecision;
use crate::core::interruption::{InterruptionHandler, Resolution};
use crate::core::state::ExecutionState;
use crate::core::types::{RunStop, Step};
use crate::io::diagnostic_log::DiagnosticLog;
use crate::io::handoff::{StepRequest, StepRunner};
use crate::io::prompt::{PromptInputs, render_step_prompt};
use crate::io::relay::{Relay, RelayMessage};

pub const DEFAULT_USER_INPUT: &str = "Next step toward achieving the final goal:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Step ceiling for one full run.
    pub max_steps: usize,
    pub step_delay: std::time::Duration,
}

/// Collaborators borrowed for the duration of one request.
pub struct ExecEnv<'a, R, B> {
    pub runner: &'a R,
    pub relay: &'a B,
    pub log: &'a DiagnosticLog,
    pub limits: RunLimits,
    /// Rendered step document, embedded in every prompt.
    pub instructions: &'a str,
}

/// Who answered a detected interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOrigin {
    AutoConfirm,
    Relay,
    /// Nobody answered before the idle timeout.
    IdleGuard,
}

impl AnswerOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerOrigin::AutoConfirm => "auto-confirm",
            AnswerOrigin::Relay => "relay",
            AnswerOrigin::IdleGuard => "idle timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptionReport {
    pub decision: InterruptionDecision,
    pub answer: String,
    pub origin: AnswerOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step_number: usize,
    pub step: Step,
    pub user_input: String,
    pub response: String,
    pub interruption: Option<InterruptionReport>,
}

impl StepReport {
    pub fn render(&self) -> String {
        let mut out = format!(
            "Step {}: {}\nUSER: {}\nAI: {}",
            self.step_number, self.step.description, self.user_input, self.response
        );
        if let Some(report) = &self.interruption {
            let token = report.decision.matched_token.as_deref().unwrap_or("");
            out.push_str(&format!(
                "\nInterruption detected ({}: {token:?}), answered by {}: {:?}",
                report.decision.pattern_kind.as_str(),
                report.origin.as_str(),
                report.answer
            ));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub steps_executed: usize,
    pub stop: RunStop,
    pub steps: Vec<StepReport>,
}

impl RunOutcome {
    pub fn summary(&self) -> String {
        match self.stop {
            RunStop::GoalAchieved => format!("Goal achieved in {} steps!", self.steps_executed),
            stop => format!(
                "Execution stopped after {} steps, goal not achieved ({})",
                self.steps_executed,
                stop.as_str()
            ),
        }
    }

    pub fn render(&self) -> String {
        let transcript: Vec<String> = self.steps.iter().map(StepReport::render).collect();
        format!("{}\n\n{}", self.summary(), transcript.join("\n\n"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStepOutcome {
    GoalAlreadyAchieved,
    StepsExhausted,
    Ran { report: StepReport, goal_achieved: bool },
}

impl NextStepOutcome {
    pub fn render(&self) -> String {
        match self {
            NextStepOutcome::GoalAlreadyAchieved => {
                "Goal already achieved. Use start_execution to begin a new sequence.".to_string()
            }
            NextStepOutcome::StepsExhausted => {
                "All steps completed. Use reset_execution to start over.".to_string()
            }
            NextStepOutcome::Ran {
                report,
                goal_achieved,
            } => {
                let mut out = report.render();
                if *goal_achieved {
                    out.push_str("\n\nGoal achieved!");
                }
                out
            }
        }
    }
}

/// Reset, then run steps until the goal is reached, the steps run out, or
/// the ceiling is hit. The caller loads the steps beforehand.
#[instrument(skip_all, fields(steps = state.steps().len(), max_steps = env.limits.max_steps))]
pub fn run_full_execution<R: StepRunner, B: Relay>(
    state: &mut ExecutionState,
    handler: &mut InterruptionHandler,
    env: &ExecEnv<'_, R, B>,
) -> Result<RunOutcome> {
    state.reset();
    handler.reset();
    env.relay.discard_pending();
    env.relay.notify(&RelayMessage::BuildStart {
        build_id: env.relay.session_id().to_string(),
        description: format!("run_full_execution: {} steps", state.steps().len()),
    });
    env.log.info(format!(
        "Full execution started ({} steps, ceiling {})",
        state.steps().len(),
        env.limits.max_steps
    ));

    let mut user_input = DEFAULT_USER_INPUT.to_string();
    let mut steps = Vec::new();
    let stop = loop {
        if state.goal_achieved() {
            break RunStop::GoalAchieved;
        }
        if state.steps_exhausted() {
            break RunStop::StepsExhausted;
        }
        if state.current_step() >= env.limits.max_steps {
            break RunStop::CeilingReached;
        }
        if state.current_step() > 0 && !env.limits.step_delay.is_zero() {
            thread::sleep(env.limits.step_delay);
        }

        let report = match execute_step(state, handler, env, &user_input) {
            Ok(report) => report,
            Err(err) => {
                let message = format!("{err:#}");
                env.log.error(format!("Full execution failed: {message}"));
                env.relay.notify(&RelayMessage::BuildError {
                    message: message.clone(),
                });
                return Err(err);
            }
        };
        user_input = report
            .interruption
            .as_ref()
            .map_or_else(|| DEFAULT_USER_INPUT.to_string(), |i| i.answer.clone());
        steps.push(report);
    };

    let outcome = RunOutcome {
        steps_executed: steps.len(),
        stop,
        steps,
    };
    let summary = outcome.summary();
    info!(steps = outcome.steps_executed, stop = stop.as_str(), "full execution finished");
    env.log.info(&summary);
    env.relay.notify(&RelayMessage::BuildComplete { message: summary });
    Ok(outcome)
}

/// Run the step at the cursor, if any.
pub fn execute_next_step<R: StepRunner, B: Relay>(
    state: &mut ExecutionState,
    handler: &mut InterruptionHandler,
    env: &ExecEnv<'_, R, B>,
    user_input: &str,
) -> Result<NextStepOutcome> {
    if state.goal_achieved() {
        return Ok(NextStepOutcome::GoalAlreadyAchieved);
    }
    if state.steps_exhausted() {
        env.log.info("No more steps to execute");
        return Ok(NextStepOutcome::StepsExhausted);
    }
    let report = execute_step(state, handler, env, user_input)?;
    Ok(NextStepOutcome::Ran {
        report,
        goal_achieved: state.goal_achieved(),
    })
}

#[instrument(skip_all, fields(step = state.current_step() + 1))]
fn execute_step<R: StepRunner, B: Relay>(
    state: &mut ExecutionState,
    handler: &mut InterruptionHandler,
    env: &ExecEnv<'_, R, B>,
    user_input: &str,
) -> Result<StepReport> {
    let step = state
        .current_step_data()
        .cloned()
        .ok_or_else(|| anyhow!("no step at cursor {}", state.current_step()))?;
    let step_number = state.current_step() + 1;
    handler.arm();

    let history = state.history_text();
    let prompt = render_step_prompt(&PromptInputs {
        instructions: env.instructions,
        history: history.as_deref(),
        user_input,
        step_number,
        step: Some(&step),
    })
    .context("render step prompt")?;

    let request = StepRequest {
        step: step.clone(),
        step_number,
        user_input: user_input.to_string(),
        prompt,
    };
    let response = env
        .runner
        .run(&request)
        .with_context(|| format!("step {} ({})", step.step, step.description))?;

    state.advance(user_input, &response);
    let progress = format!("Step {step_number}: {}", step.description);
    env.log.info(&progress);
    env.relay.notify(&RelayMessage::BuildProgress { message: progress });
    debug!(goal_achieved = state.goal_achieved(), "step recorded");

    let interruption = if handler.detect_interruption(&response) {
        Some(resolve_interruption(handler, env, &response))
    } else {
        None
    };

    Ok(StepReport {
        step_number,
        step,
        user_input: user_input.to_string(),
        response,
        interruption,
    })
}

/// Answer a detected interruption by policy, relay, or idle timeout.
fn resolve_interruption<R, B: Relay>(
    handler: &mut InterruptionHandler,
    env: &ExecEnv<'_, R, B>,
    question: &str,
) -> InterruptionReport {
    let decision = handler
        .pending()
        .cloned()
        .unwrap_or_else(InterruptionDecision::none);
    env.log.info(format!(
        "Interruption detected: {} ({})",
        decision.pattern_kind.as_str(),
        decision.matched_token.as_deref().unwrap_or("")
    ));

    let report = |answer: String, origin: AnswerOrigin| InterruptionReport {
        decision: decision.clone(),
        answer,
        origin,
    };

    match handler.handle_interruption() {
        Resolution::Answer(answer) => {
            info!(kind = decision.pattern_kind.as_str(), "interruption auto-confirmed");
            env.log.info(format!("Auto-confirmed interruption with {answer:?}"));
            report(answer, AnswerOrigin::AutoConfirm)
        }
        Resolution::Surface => {
            env.relay.discard_pending();
            env.relay.notify(&RelayMessage::BuildQuestion {
                message: question.to_string(),
            });
            let Some(deadline) = handler.idle_deadline() else {
                let answer = handler.policy().response_text.clone();
                handler.reset();
                return report(answer, AnswerOrigin::IdleGuard);
            };
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if let Some(answer) = env.relay.wait_for_answer(remaining) {
                    handler.supply_answer();
                    info!("interruption answered through relay");
                    env.log.info(format!("Relay answered interruption: {answer:?}"));
                    return report(answer, AnswerOrigin::Relay);
                }
                if let Some(answer) = handler.resolve_if_idle(Instant::now()) {
                    warn!(
                        timeout_secs = handler.policy().idle_timeout.as_secs(),
                        "no answer before idle timeout; auto-answering"
                    );
                    env.log.warn(format!(
                        "Idle timeout elapsed; auto-answered interruption with {answer:?}"
                    ));
                    return report(answer, AnswerOrigin::IdleGuard);
                }
            }
        }
    }
}

//! Execution state machine: a cursor over externally supplied steps plus the
//! interaction history and a sticky goal flag.
//!
//! Invariants:
//! - `history.len()` is always even and equals `2 * current_step` between resets.
//! - `goal_achieved` only goes from false to true; `reset` is the only way back.

use crate::core::types::{Actor, GOAL_TOKEN, Interaction, Step};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionState {
    current_step: usize,
    history: Vec<Interaction>,
    goal_achieved: bool,
    steps: Vec<Step>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the step list. The cursor is left where it is.
    pub fn load_steps(&mut self, steps: Vec<Step>) {
        self.steps = steps;
    }

    /// Step at the cursor, or `None` once the cursor is past the end.
    pub fn current_step_data(&self) -> Option<&Step> {
        self.steps.get(self.current_step)
    }

    /// Record one user/ai exchange and move the cursor forward.
    pub fn advance(&mut self, actor_text: &str, response_text: &str) {
        self.history.push(Interaction {
            actor: Actor::User,
            text: actor_text.to_string(),
        });
        self.history.push(Interaction {
            actor: Actor::Ai,
            text: response_text.to_string(),
        });
        self.current_step += 1;

        if response_text.to_uppercase().contains(GOAL_TOKEN) {
            self.goal_achieved = true;
        }
    }

    pub fn reset(&mut self) {
        self.current_step = 0;
        self.history.clear();
        self.goal_achieved = false;
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn goal_achieved(&self) -> bool {
        self.goal_achieved
    }

    pub fn history(&self) -> &[Interaction] {
        &self.history
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// True once the cursor has run past the last known step.
    pub fn steps_exhausted(&self) -> bool {
        self.current_step_data().is_none()
    }

    /// History rendered one `ACTOR: text` record per line.
    pub fn history_text(&self) -> Option<String> {
        if self.history.is_empty() {
            return None;
        }
        let lines: Vec<String> = self.history.iter().map(ToString::to_string).collect();
        Some(lines.join("\n"))
    }
}

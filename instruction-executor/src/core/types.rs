//! Shared deterministic types for core logic.
//!
//! These types define stable contracts between core components and the
//! step source. They must not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token whose presence (case-insensitive) in a response marks the goal achieved.
pub const GOAL_TOKEN: &str = "DONE";

/// One ordered unit of an externally defined task sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Ordering key as written in the step source (positive).
    pub step: u32,
    /// Free-text instruction handed off to the step runner.
    pub description: String,
}

/// Who produced an entry in the execution history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    Ai,
}

impl Actor {
    pub fn label(self) -> &'static str {
        match self {
            Actor::User => "USER",
            Actor::Ai => "AI",
        }
    }
}

/// One history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub actor: Actor,
    pub text: String,
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.actor.label(), self.text)
    }
}

/// Reason a full execution run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStop {
    /// A response contained the goal token.
    GoalAchieved,
    /// The cursor ran past the last known step.
    StepsExhausted,
    /// The per-run step ceiling was reached first.
    CeilingReached,
}

impl RunStop {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStop::GoalAchieved => "goal achieved",
            RunStop::StepsExhausted => "no more steps",
            RunStop::CeilingReached => "step ceiling reached",
        }
    }
}

//! Auto-confirm policy and per-run interruption state machine.
//!
//! ```text
//! Idle --arm--> Armed --detect--> Triggered --handle(enabled)--> Idle
//!                                     |
//!                                     +--handle(disabled)--> Surfaced --answer--> Idle
//!
//! Triggered | Surfaced --idle_timeout elapsed--> Idle (auto-answer regardless of policy)
//! reset: any state --> Idle
//! ```
//!
//! Callers pass `Instant`s in explicitly where timing matters so the state
//! machine stays deterministic under test.

use std::time::{Duration, Instant};

use crate::core::classifier::{InterruptionDecision, TextSource, classify_from};

/// How a run reacts to a detected interruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoConfirmPolicy {
    /// Answer automatically instead of surfacing the prompt.
    pub enabled: bool,
    /// Text sent when auto-confirming.
    pub response_text: String,
    /// A pending interruption older than this is auto-answered even when
    /// `enabled` is false.
    pub idle_timeout: Duration,
}

impl Default for AutoConfirmPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            response_text: "y\n".to_string(),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerState {
    Idle,
    Armed,
    Triggered {
        decision: InterruptionDecision,
        since: Instant,
    },
    Surfaced {
        decision: InterruptionDecision,
        since: Instant,
    },
}

/// Outcome of [`InterruptionHandler::handle_interruption`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Send this text as the answer.
    Answer(String),
    /// Policy forbids auto-answering; the caller must surface the prompt and
    /// wait for a real answer.
    Surface,
}

#[derive(Debug, Clone)]
pub struct InterruptionHandler {
    policy: AutoConfirmPolicy,
    state: HandlerState,
}

impl InterruptionHandler {
    pub fn new(policy: AutoConfirmPolicy) -> Self {
        Self {
            policy,
            state: HandlerState::Idle,
        }
    }

    pub fn policy(&self) -> &AutoConfirmPolicy {
        &self.policy
    }

    pub fn state(&self) -> &HandlerState {
        &self.state
    }

    /// Start watching for interruptions. No-op unless idle.
    pub fn arm(&mut self) {
        if self.state == HandlerState::Idle {
            self.state = HandlerState::Armed;
        }
    }

    /// True if `text` looks like a blocking question.
    pub fn detect_interruption(&mut self, text: &str) -> bool {
        self.detect_interruption_at(text, Instant::now())
    }

    /// Like [`Self::detect_interruption`], stamping the idle timer with `now`.
    ///
    /// Only the first detection while armed triggers; later detections are
    /// still reported but do not restart the timer.
    pub fn detect_interruption_at(&mut self, text: &str, now: Instant) -> bool {
        let decision = classify_from(text, TextSource::Extracted);
        if !decision.matched {
            return false;
        }
        if self.state == HandlerState::Armed {
            self.state = HandlerState::Triggered {
                decision,
                since: now,
            };
        }
        true
    }

    /// The decision that triggered the handler, while one is pending.
    pub fn pending(&self) -> Option<&InterruptionDecision> {
        match &self.state {
            HandlerState::Triggered { decision, .. } | HandlerState::Surfaced { decision, .. } => {
                Some(decision)
            }
            HandlerState::Idle | HandlerState::Armed => None,
        }
    }

    pub fn handle_interruption(&mut self) -> Resolution {
        if self.policy.enabled {
            self.state = HandlerState::Idle;
            return Resolution::Answer(self.policy.response_text.clone());
        }
        if let HandlerState::Triggered { decision, since } = &self.state {
            self.state = HandlerState::Surfaced {
                decision: decision.clone(),
                since: *since,
            };
        }
        Resolution::Surface
    }

    /// Resolve a pending interruption with an externally supplied answer.
    ///
    /// Returns false if nothing was pending.
    pub fn supply_answer(&mut self) -> bool {
        if self.pending().is_none() {
            return false;
        }
        self.state = HandlerState::Idle;
        true
    }

    /// When the pending interruption stops waiting for a real answer.
    pub fn idle_deadline(&self) -> Option<Instant> {
        match &self.state {
            HandlerState::Triggered { since, .. } | HandlerState::Surfaced { since, .. } => {
                Some(*since + self.policy.idle_timeout)
            }
            HandlerState::Idle | HandlerState::Armed => None,
        }
    }

    /// Livelock guard: auto-answer a pending interruption once the idle
    /// timeout has elapsed, regardless of `enabled`.
    pub fn resolve_if_idle(&mut self, now: Instant) -> Option<String> {
        let deadline = self.idle_deadline()?;
        if now < deadline {
            return None;
        }
        self.state = HandlerState::Idle;
        Some(self.policy.response_text.clone())
    }

    pub fn reset(&mut self) {
        self.state = HandlerState::Idle;
    }
}

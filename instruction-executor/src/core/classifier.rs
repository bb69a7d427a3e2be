//! Deterministic classification of text that may be asking a human a question.
//!
//! Tiers are checked most specific first (see [`crate::core::patterns`]):
//!
//! 1. chat-prompt phrases (substring) -> [`PatternKind::ChatPrompt`]
//! 2. interaction keywords (whole word) -> [`PatternKind::GenericInteraction`]
//! 3. `?` or question keywords (substring) -> [`PatternKind::Question`], only
//!    for [`TextSource::Extracted`] text.
//!
//! Classification is total: every input yields a decision, and the decision
//! records which token fired.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::patterns::{QUESTION_MARK, Tier, vocabulary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    None,
    GenericInteraction,
    ChatPrompt,
    Question,
}

impl PatternKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::None => "none",
            PatternKind::GenericInteraction => "generic_interaction",
            PatternKind::ChatPrompt => "chat_prompt",
            PatternKind::Question => "question",
        }
    }
}

/// Where the classified text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// A raw protocol line. The question tier is skipped.
    RawLine,
    /// Text lifted out of a nested message payload or a step response.
    Extracted,
}

/// Result of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterruptionDecision {
    pub matched: bool,
    pub pattern_kind: PatternKind,
    /// The vocabulary entry that fired.
    pub matched_token: Option<String>,
}

impl InterruptionDecision {
    pub fn none() -> Self {
        Self {
            matched: false,
            pattern_kind: PatternKind::None,
            matched_token: None,
        }
    }

    fn hit(pattern_kind: PatternKind, token: &str) -> Self {
        Self {
            matched: true,
            pattern_kind,
            matched_token: Some(token.to_string()),
        }
    }
}

static INTERACTION_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vocabulary(Tier::Interaction)
        .iter()
        .map(|keyword| {
            let pattern = format!(r"\b{}\b", regex::escape(keyword));
            (*keyword, Regex::new(&pattern).unwrap())
        })
        .collect()
});

/// Classify a raw protocol line.
pub fn classify(text: &str) -> InterruptionDecision {
    classify_from(text, TextSource::RawLine)
}

/// Classify text, enabling the question tier for extracted payload text.
pub fn classify_from(text: &str, source: TextSource) -> InterruptionDecision {
    let lowered = text.to_lowercase();
    if lowered.trim().is_empty() {
        return InterruptionDecision::none();
    }

    if let Some(phrase) = vocabulary(Tier::ChatPrompt)
        .iter()
        .find(|phrase| lowered.contains(*phrase))
    {
        return InterruptionDecision::hit(PatternKind::ChatPrompt, phrase);
    }

    if let Some((keyword, _)) = INTERACTION_RES.iter().find(|(_, re)| re.is_match(&lowered)) {
        return InterruptionDecision::hit(PatternKind::GenericInteraction, keyword);
    }

    if source == TextSource::Extracted {
        if lowered.contains(QUESTION_MARK) {
            return InterruptionDecision::hit(PatternKind::Question, QUESTION_MARK);
        }
        if let Some(keyword) = vocabulary(Tier::Question)
            .iter()
            .find(|keyword| lowered.contains(*keyword))
        {
            return InterruptionDecision::hit(PatternKind::Question, keyword);
        }
    }

    InterruptionDecision::none()
}

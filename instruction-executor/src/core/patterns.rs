//! Versioned trigger vocabulary for the interruption classifier.
//!
//! Each tier is an ordered table; the classifier reports the first entry that
//! matches, so order is part of the contract. Entries are lowercase because
//! the classifier lowercases input before matching.

/// Bump whenever an entry is added, removed, or reordered.
pub const VOCABULARY_VERSION: u32 = 1;

/// Classification tiers, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Multi-word phrases that directly address a human.
    ChatPrompt,
    /// Single words weakly correlated with user interaction (whole-word match).
    Interaction,
    /// Last-resort keywords for text lifted out of a nested payload.
    Question,
}

pub const CHAT_PROMPT_PHRASES: &[&str] = &[
    "what would you like",
    "please provide",
    "do you want",
    "would you prefer",
    "please confirm",
    "would you like",
    "are you sure",
    "please specify",
    "please choose",
    "please select",
    "please enter",
    "can you provide",
    "let me know",
    "press enter",
    "(y/n)",
    "[y/n]",
];

pub const INTERACTION_KEYWORDS: &[&str] = &[
    "user", "input", "prompt", "question", "ask", "confirm", "choose", "select", "enter", "provide",
];

/// Checked before [`QUESTION_KEYWORDS`].
pub const QUESTION_MARK: &str = "?";

pub const QUESTION_KEYWORDS: &[&str] = &["please", "enter", "input", "choose", "select", "confirm"];

/// Table for a tier, in scan order.
pub fn vocabulary(tier: Tier) -> &'static [&'static str] {
    match tier {
        Tier::ChatPrompt => CHAT_PROMPT_PHRASES,
        Tier::Interaction => INTERACTION_KEYWORDS,
        Tier::Question => QUESTION_KEYWORDS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TIERS: [Tier; 3] = [Tier::ChatPrompt, Tier::Interaction, Tier::Question];

    #[test]
    fn entries_are_lowercase_and_trimmed() {
        for tier in TIERS {
            for entry in vocabulary(tier) {
                assert!(!entry.is_empty(), "{tier:?} has empty entry");
                assert_eq!(*entry, entry.to_lowercase(), "{tier:?}: {entry}");
                assert_eq!(*entry, entry.trim(), "{tier:?}: {entry}");
            }
        }
    }

    #[test]
    fn tiers_have_no_duplicates() {
        for tier in TIERS {
            let table = vocabulary(tier);
            let unique: HashSet<_> = table.iter().collect();
            assert_eq!(unique.len(), table.len(), "{tier:?} has duplicates");
        }
    }

    #[test]
    fn chat_prompts_are_phrases() {
        for phrase in CHAT_PROMPT_PHRASES {
            assert!(
                phrase.contains(' ') || phrase.contains('/'),
                "chat prompt entry should be a phrase: {phrase}"
            );
        }
    }

    #[test]
    fn interaction_keywords_are_single_words() {
        for keyword in INTERACTION_KEYWORDS {
            assert!(keyword.chars().all(|c| c.is_ascii_alphabetic()), "{keyword}");
        }
    }

    #[test]
    fn question_keywords_are_pinned() {
        assert_eq!(
            QUESTION_KEYWORDS,
            &["please", "enter", "input", "choose", "select", "confirm"]
        );
        assert_eq!(QUESTION_MARK, "?");
    }

    /// Pins the table sizes to the version so edits must bump it.
    #[test]
    fn version_matches_table_shape() {
        assert_eq!(VOCABULARY_VERSION, 1);
        assert_eq!(CHAT_PROMPT_PHRASES.len(), 16);
        assert_eq!(INTERACTION_KEYWORDS.len(), 10);
    }
}

//! Detection of the phrase the intake assistant emits once it has gathered
//! the full history.

use std::collections::HashSet;

use crate::core::message::MessageId;

pub const SENTINEL_PHRASE: &str = "thanks! i've collected everything i need.";

/// Apostrophe spellings that appear in model output, including the
/// mis-decoded form of U+2019.
const APOSTROPHE_VARIANTS: [&str; 7] = [
    "\u{2019}", // right single quotation mark
    "\u{2018}", // left single quotation mark
    "\u{02BC}", // modifier letter apostrophe
    "\u{2032}", // prime
    "\u{FF07}", // fullwidth apostrophe
    "\u{00B4}", // acute accent
    "\u{00E2}\u{20AC}\u{2122}",
];

/// Lower-case `text` and fold apostrophe variants into `'`.
pub fn normalize(text: &str) -> String {
    let mut normalized = text.to_lowercase();
    for variant in APOSTROPHE_VARIANTS {
        if normalized.contains(variant) {
            normalized = normalized.replace(variant, "'");
        }
    }
    normalized
}

/// Pure containment test, anywhere in `text`.
pub fn contains_sentinel(text: &str) -> bool {
    normalize(text).contains(SENTINEL_PHRASE)
}

/// Fires at most once per assistant message.
#[derive(Debug, Default)]
pub struct CompletionSentinel {
    fired: HashSet<MessageId>,
}

impl CompletionSentinel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only on the first check for `message` that sees the
    /// phrase; later checks for the same message return `false`.
    pub fn check(&mut self, message: MessageId, full_text: &str) -> bool {
        if self.fired.contains(&message) {
            return false;
        }
        if contains_sentinel(full_text) {
            self.fired.insert(message);
            return true;
        }
        false
    }

    pub fn has_fired(&self, message: MessageId) -> bool {
        self.fired.contains(&message)
    }

    pub fn reset(&mut self) {
        self.fired.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitively() {
        assert!(contains_sentinel("Thanks! I've collected everything I need."));
        assert!(contains_sentinel("THANKS! I'VE COLLECTED EVERYTHING I NEED."));
    }

    #[test]
    fn matches_curly_and_misdecoded_apostrophes() {
        assert!(contains_sentinel("Thanks! I\u{2019}ve collected everything I need."));
        assert!(contains_sentinel("Thanks! I\u{00E2}\u{20AC}\u{2122}ve collected everything I need."));
    }

    #[test]
    fn normalize_leaves_whitespace_alone() {
        assert_eq!(normalize("Thanks!  I\u{2019}VE\tcollected"), "thanks!  i've\tcollected");
        assert!(!contains_sentinel("Thanks!  I've collected everything I need."));
    }

    #[test]
    fn matches_anywhere_in_the_text() {
        assert!(contains_sentinel(
            "Okay. Thanks! I've collected everything I need. A doctor will follow up."
        ));
    }

    #[test]
    fn rejects_other_phrasings() {
        assert!(!contains_sentinel("Thanks, I still need more info."));
        assert!(!contains_sentinel("Thanks! I've collected everything I need"));
        assert!(!contains_sentinel("Thank you. I\u{2019}ve collected enough information for now."));
    }

    #[test]
    fn fires_once_per_message() {
        let mut sentinel = CompletionSentinel::new();
        let message = MessageId::new();

        assert!(!sentinel.check(message, "Thanks! I've collected"));
        assert!(sentinel.check(message, "Thanks! I've collected everything I need."));
        assert!(!sentinel.check(
            message,
            "Thanks! I've collected everything I need. Please wait."
        ));
        assert!(sentinel.has_fired(message));

        let other = MessageId::new();
        assert!(sentinel.check(other, "thanks! i've collected everything i need."));
    }
}

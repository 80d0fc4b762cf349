//! Termination phrases - marker strings that end a review loop

/// Phrases a reviewer uses to signal that no further revision is needed
pub const DEFAULT_TERMINATION_PHRASES: &[&str] = &[
    "assignment is completed",
    "no issues found",
    "perfect",
    "a+",
    "assignment is complete",
];

/// Case-insensitive substring matcher over a fixed phrase set.
///
/// Empty phrases are dropped since they would match every reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationPhrases {
    phrases: Vec<String>,
}

impl TerminationPhrases {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// First phrase (in configured order) contained in `text`
    pub fn find(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        self.phrases
            .iter()
            .find(|p| haystack.contains(p.as_str()))
            .map(String::as_str)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.phrases.iter().map(String::as_str)
    }
}

impl Default for TerminationPhrases {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATION_PHRASES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_is_case_insensitive() {
        let phrases = TerminationPhrases::default();
        assert_eq!(phrases.find("The Assignment Is Completed."), Some("assignment is completed"));
        assert!(phrases.matches("NO ISSUES FOUND in this script"));
        assert!(phrases.matches("Grade: A+"));
    }

    #[test]
    fn test_substring_containment() {
        let phrases = TerminationPhrases::default();
        assert!(phrases.matches("this is imperfect"));
        assert!(!phrases.matches("Please fix the indentation on line 2."));
    }

    #[test]
    fn test_custom_phrases_lowercased_and_empty_dropped() {
        let phrases = TerminationPhrases::new(["LGTM", ""]);
        assert_eq!(phrases.iter().collect::<Vec<_>>(), vec!["lgtm"]);
        assert!(phrases.matches("lgtm, ship it"));
        assert!(!TerminationPhrases::new([""]).matches("anything"));
    }
}

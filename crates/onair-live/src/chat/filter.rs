//! Whole-word profanity masking.

use regex::{Regex, RegexBuilder};
use tracing::warn;

/// Replacement for every matched word, regardless of its length.
pub const MASK: &str = "****";

const DENYLIST: &[&str] = &[
    "asshole", "bastard", "bitch", "bollocks", "crap", "damn", "dick", "fuck", "fucking",
    "idiot", "moron", "piss", "shit", "slut", "whore",
];

/// Masks denylisted words. Matching is case-insensitive and whole-word,
/// so `classic` is left alone and the mask itself never re-matches.
#[derive(Debug, Clone)]
pub struct WordFilter {
    pattern: Option<Regex>,
}

impl WordFilter {
    /// Built-in denylist plus `extra` words. Extra entries that are not
    /// plain words are ignored.
    pub fn new(extra: &[String]) -> Self {
        let mut words: Vec<String> = DENYLIST.iter().map(|w| w.to_string()).collect();
        for word in extra {
            let word = word.trim().to_lowercase();
            if word.is_empty() || !word.chars().all(|c| c.is_alphanumeric() || c == '_') {
                warn!(word = %word, "Ignoring banned word that is not a plain word");
                continue;
            }
            if !words.contains(&word) {
                words.push(word);
            }
        }
        // Longest first so alternation prefers "fucking" over "fuck".
        words.sort_by_key(|w| std::cmp::Reverse(w.len()));

        let alternation = words
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = match RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
            .case_insensitive(true)
            .build()
        {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(error = %e, "Failed to build word filter, filtering disabled");
                None
            }
        };
        Self { pattern }
    }

    pub fn filter(&self, text: &str) -> String {
        match &self.pattern {
            Some(re) => re.replace_all(text, MASK).into_owned(),
            None => text.to_string(),
        }
    }

    #[cfg(test)]
    pub fn is_clean(&self, text: &str) -> bool {
        self.pattern.as_ref().map_or(true, |re| !re.is_match(text))
    }
}

impl Default for WordFilter {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_whole_words_case_insensitively() {
        let filter = WordFilter::default();
        assert_eq!(filter.filter("well DAMN that is crap"), "well **** that is ****");
        assert_eq!(filter.filter("a classic scrap of shitake"), "a classic scrap of shitake");
    }

    #[test]
    fn mask_length_is_fixed() {
        let filter = WordFilter::default();
        assert_eq!(filter.filter("fucking"), MASK);
        assert_eq!(filter.filter("piss"), MASK);
    }

    #[test]
    fn filtering_is_idempotent() {
        let filter = WordFilter::new(&["spoiler".to_string()]);
        let samples = [
            "damn damn damn",
            "Spoiler: the idiot did it!",
            "nothing to see",
            "crap,shit;moron",
        ];
        for text in samples {
            let once = filter.filter(text);
            assert_eq!(filter.filter(&once), once, "not idempotent for {text:?}");
            assert!(filter.is_clean(&once));
        }
    }

    #[test]
    fn extra_words_extend_the_list() {
        let filter = WordFilter::new(&["  Spoiler ".to_string(), "not a word!".to_string()]);
        assert_eq!(filter.filter("no spoiler please"), "no **** please");
        assert_eq!(filter.filter("not a word!"), "not a word!");
    }
}

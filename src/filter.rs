use anyhow::{Context, Result};
use regex::Regex;

use crate::message::Message;

/// Selects messages by text, either as a case-insensitive substring or a regex.
#[derive(Clone, Debug)]
pub struct ActiveFilter {
    /// The pattern as given
    pub pattern: String,
    matcher: Matcher,
}

#[derive(Clone, Debug)]
enum Matcher {
    /// Lowercased needle
    Substring(String),
    Regex(Regex),
}

impl ActiveFilter {
    /// Build a filter; an invalid regex is an error rather than a silent fallback.
    pub fn new(pattern: String, is_regex: bool) -> Result<Self> {
        let matcher = if is_regex {
            let regex = Regex::new(&pattern).with_context(|| format!("invalid filter regex {pattern:?}"))?;
            Matcher::Regex(regex)
        } else {
            Matcher::Substring(pattern.to_lowercase())
        };
        Ok(Self { pattern, matcher })
    }

    pub fn is_regex(&self) -> bool {
        matches!(self.matcher, Matcher::Regex(_))
    }

    pub fn matches(&self, message: &Message) -> bool {
        match &self.matcher {
            Matcher::Regex(regex) => regex.is_match(&message.text),
            Matcher::Substring(needle) => message.text.to_lowercase().contains(needle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::test_utils::msg;

    fn with_text(text: &str) -> Message {
        let mut m = (*msg(0)).clone();
        m.text = text.to_string();
        m
    }

    #[test]
    fn test_substring_is_case_insensitive() {
        let filter = ActiveFilter::new("ErRoR".to_string(), false).unwrap();
        assert!(!filter.is_regex());
        assert!(filter.matches(&with_text("2024 ERROR disk full")));
        assert!(!filter.matches(&with_text("2024 INFO all good")));
    }

    #[test]
    fn test_regex_match() {
        let filter = ActiveFilter::new(r"id=\d+".to_string(), true).unwrap();
        assert!(filter.is_regex());
        assert!(filter.matches(&with_text("request id=42 done")));
        assert!(!filter.matches(&with_text("request id=abc done")));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        assert!(ActiveFilter::new("(unclosed".to_string(), true).is_err());
        assert!(ActiveFilter::new("(unclosed".to_string(), false).is_ok());
    }
}

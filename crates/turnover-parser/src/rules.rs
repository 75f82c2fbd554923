//! Named extraction rules: one regex, one capture, one field.

use regex::Regex;
use turnover_core::{Result, TurnoverError};

/// A single named pattern. The first capture group is the extracted value.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    pub name: String,
    regex: Regex,
}

impl ExtractionRule {
    pub fn new(name: &str, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| TurnoverError::Config(format!("rule '{name}': {e}")))?;
        Ok(Self {
            name: name.to_string(),
            regex,
        })
    }

    /// Extract the first capture of the first match, trimmed. Empty captures
    /// count as no match.
    pub fn apply(&self, text: &str) -> Option<String> {
        self.regex.captures_iter(text).find_map(|caps| {
            let value = caps.get(1).map_or("", |m| m.as_str()).trim();
            (!value.is_empty()).then(|| value.to_string())
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Try rules in declared order; the first one that extracts something wins.
pub fn first_match<'a>(rules: &'a [ExtractionRule], text: &str) -> Option<(&'a str, String)> {
    rules.iter().find_map(|rule| {
        rule.apply(text).map(|value| {
            tracing::debug!("rule '{}' matched '{}'", rule.name, value);
            (rule.name.as_str(), value)
        })
    })
}

//! Tag rule domain entity

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a rule's match text is tested against a description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Case-insensitive containment
    #[default]
    Substring,
    /// Case-insensitive equality of the whole description
    FullString,
    /// Case-insensitive regular expression
    Regex,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Substring => "substring",
            MatchMode::FullString => "full_string",
            MatchMode::Regex => "regex",
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "substring" | "contains" => Ok(MatchMode::Substring),
            "full_string" | "exact" => Ok(MatchMode::FullString),
            "regex" => Ok(MatchMode::Regex),
            other => Err(format!("unknown match mode '{}'", other)),
        }
    }
}

/// A user-defined rule that tags (and optionally renames) matching rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRule {
    pub id: Uuid,
    pub match_text: String,
    pub match_mode: MatchMode,
    pub tag: String,
    /// Overwrites the row description when the rule matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_description: Option<String>,
}

impl TagRule {
    pub fn new(match_text: impl Into<String>, match_mode: MatchMode, tag: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            match_text: match_text.into(),
            match_mode,
            tag: tag.into(),
            replacement_description: None,
        }
    }

    pub fn with_replacement(mut self, description: impl Into<String>) -> Self {
        self.replacement_description = Some(description.into());
        self
    }

    /// Rules with blank match text or tag are kept in the list but never applied
    pub fn is_active(&self) -> bool {
        !self.match_text.trim().is_empty() && !self.tag.trim().is_empty()
    }

    /// Replacement description, if one is set and non-blank
    pub fn replacement(&self) -> Option<&str> {
        self.replacement_description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_rules_need_text_and_tag() {
        assert!(TagRule::new("uber", MatchMode::Substring, "Transport").is_active());
        assert!(!TagRule::new("  ", MatchMode::Substring, "Transport").is_active());
        assert!(!TagRule::new("uber", MatchMode::Substring, "").is_active());
    }

    #[test]
    fn test_blank_replacement_is_ignored() {
        let rule = TagRule::new("uber", MatchMode::Substring, "Transport").with_replacement(" ");
        assert_eq!(rule.replacement(), None);
        let rule = rule.with_replacement("Uber");
        assert_eq!(rule.replacement(), Some("Uber"));
    }

    #[test]
    fn test_match_mode_round_trip_names() {
        assert_eq!("full_string".parse::<MatchMode>(), Ok(MatchMode::FullString));
        assert_eq!("full-string".parse::<MatchMode>(), Ok(MatchMode::FullString));
        assert_eq!(
            serde_json::to_string(&MatchMode::FullString).unwrap(),
            "\"full_string\""
        );
        assert!("glob".parse::<MatchMode>().is_err());
    }
}

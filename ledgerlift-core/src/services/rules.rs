//! Tag rule engine - description matching, tagging and renaming
//!
//! A rule pass only visits rows that no earlier pass has matched. That makes
//! "apply" safe to repeat: editing or adding rules and re-running never tags
//! or renames an already-processed row a second time, while rows nothing has
//! matched yet stay eligible for the new rules.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{MatchMode, ReviewRow, TagRule};

/// Compiled form of one rule's match strategy
#[derive(Debug)]
enum Matcher {
    /// Lowercased needle
    Substring(String),
    /// Lowercased full text
    FullString(String),
    /// `None` when the pattern failed to compile; never matches
    Regex(Option<Regex>),
}

/// A rule with its matcher prepared for repeated evaluation
#[derive(Debug)]
pub struct CompiledRule {
    rule: TagRule,
    matcher: Matcher,
}

impl CompiledRule {
    pub fn compile(rule: &TagRule) -> Self {
        let matcher = match rule.match_mode {
            MatchMode::Substring => Matcher::Substring(rule.match_text.to_lowercase()),
            MatchMode::FullString => Matcher::FullString(rule.match_text.to_lowercase()),
            MatchMode::Regex => Matcher::Regex(compile_pattern(rule)),
        };
        Self {
            rule: rule.clone(),
            matcher,
        }
    }

    /// False for regex rules whose pattern does not compile
    pub fn is_valid(&self) -> bool {
        !matches!(self.matcher, Matcher::Regex(None))
    }

    /// Test a description; `lowered` must be `description.to_lowercase()`
    fn matches_prepared(&self, description: &str, lowered: &str) -> bool {
        match &self.matcher {
            Matcher::Substring(needle) => lowered.contains(needle.as_str()),
            Matcher::FullString(text) => lowered == text,
            Matcher::Regex(Some(re)) => re.is_match(description),
            Matcher::Regex(None) => false,
        }
    }

    pub fn is_match(&self, description: &str) -> bool {
        self.matches_prepared(description, &description.to_lowercase())
    }
}

fn compile_pattern(rule: &TagRule) -> Option<Regex> {
    match RegexBuilder::new(&rule.match_text)
        .case_insensitive(true)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            // Pattern text is user data; log the rule id only
            warn!(rule_id = %rule.id, error = %e, "tag rule has an invalid regex; treating as no match");
            None
        }
    }
}

/// Count how many rows a candidate rule would match
///
/// Read-only preview: ignores `rules_applied` and never touches the rows.
pub fn match_count(rule: &TagRule, rows: &[ReviewRow]) -> usize {
    if !rule.is_active() {
        return 0;
    }
    let compiled = CompiledRule::compile(rule);
    rows.iter().filter(|r| compiled.is_match(r.description())).count()
}

/// Summary of one rule pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleApplication {
    /// Active rules taking part in the pass
    pub rules_evaluated: usize,
    /// Rows not yet processed by an earlier pass
    pub rows_eligible: usize,
    /// Eligible rows at least one rule matched
    pub rows_matched: usize,
    /// New tags added across all rows
    pub tags_added: usize,
    /// Rows whose description was replaced
    pub descriptions_rewritten: usize,
    /// Regex rules skipped because their pattern is invalid
    pub invalid_rules: Vec<Uuid>,
}

/// The active subset of a rule list, compiled once per pass
#[derive(Debug)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    /// Compile the active rules, keeping list order
    pub fn new(rules: &[TagRule]) -> Self {
        let rules = rules
            .iter()
            .filter(|r| r.is_active())
            .map(CompiledRule::compile)
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules matching a description, in list order
    pub fn matching<'a>(&'a self, description: &'a str) -> impl Iterator<Item = &'a TagRule> + 'a {
        let lowered = description.to_lowercase();
        self.rules
            .iter()
            .filter(move |c| c.matches_prepared(description, &lowered))
            .map(|c| &c.rule)
    }

    /// Run the pass over every eligible row
    pub fn apply(&self, rows: &mut [ReviewRow]) -> RuleApplication {
        let mut result = RuleApplication {
            rules_evaluated: self.rules.len(),
            invalid_rules: self
                .rules
                .iter()
                .filter(|c| !c.is_valid())
                .map(|c| c.rule.id)
                .collect(),
            ..Default::default()
        };

        for row in rows.iter_mut().filter(|r| !r.rules_applied) {
            result.rows_eligible += 1;
            let outcome = self.apply_to_row(row);
            if outcome.matched {
                result.rows_matched += 1;
                result.tags_added += outcome.tags_added;
                if outcome.description_rewritten {
                    result.descriptions_rewritten += 1;
                }
            }
        }

        debug!(
            rules = result.rules_evaluated,
            eligible = result.rows_eligible,
            matched = result.rows_matched,
            "applied tag rules"
        );

        result
    }

    /// Apply every matching rule to one row
    ///
    /// All rules see the description as it was before the pass; when several
    /// matching rules carry a replacement, the last one in list order wins.
    fn apply_to_row(&self, row: &mut ReviewRow) -> RowOutcome {
        let original = row.description().to_string();
        let lowered = original.to_lowercase();
        let mut outcome = RowOutcome::default();
        let mut replacement: Option<&str> = None;

        for compiled in &self.rules {
            if !compiled.matches_prepared(&original, &lowered) {
                continue;
            }
            outcome.matched = true;
            if row.add_tag(&compiled.rule.tag) {
                outcome.tags_added += 1;
            }
            if let Some(desc) = compiled.rule.replacement() {
                replacement = Some(desc);
            }
        }

        if let Some(desc) = replacement {
            if row.transaction.description != desc {
                row.transaction.description = desc.to_string();
                outcome.description_rewritten = true;
            }
        }

        if outcome.matched {
            row.rules_applied = true;
        }

        outcome
    }
}

#[derive(Debug, Default)]
struct RowOutcome {
    matched: bool,
    tags_added: usize,
    description_rewritten: bool,
}

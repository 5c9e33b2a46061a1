//! Rules command - manage and test tag rules

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use uuid::Uuid;

use super::{get_context, get_logger, log_event, parse_mapping_args, read_input, LogEvent};
use crate::output;
use ledgerlift_core::adapters::duckdb::DuckDbStore;
use ledgerlift_core::adapters::memory::MemoryStore;
use ledgerlift_core::ports::TagRuleStore;
use ledgerlift_core::services::rules::CompiledRule;
use ledgerlift_core::services::{ImportService, RuleEngine};
use ledgerlift_core::{MatchMode, ReviewRow, TagRule};

/// Matching rows shown by `rules test`
const SAMPLE_MATCHES: usize = 10;

#[derive(Subcommand)]
pub enum RulesCommands {
    /// List rules in evaluation order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a rule at the end of the list
    Add {
        /// Text (or pattern) to look for in descriptions
        match_text: String,
        /// Tag to add when the rule matches
        #[arg(long)]
        tag: String,
        /// How to match: substring, full_string or regex
        #[arg(long, default_value = "substring")]
        mode: MatchMode,
        /// Replace the description of matching rows
        #[arg(long, value_name = "DESCRIPTION")]
        replace: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change an existing rule
    Update {
        /// Rule ID (or a unique prefix of it)
        id: String,
        /// New match text
        #[arg(long = "match")]
        match_text: Option<String>,
        /// New tag
        #[arg(long)]
        tag: Option<String>,
        /// New match mode
        #[arg(long)]
        mode: Option<MatchMode>,
        /// New replacement description
        #[arg(long, value_name = "DESCRIPTION", conflicts_with = "clear_replace")]
        replace: Option<String>,
        /// Stop replacing descriptions
        #[arg(long)]
        clear_replace: bool,
    },
    /// Delete a rule
    Remove {
        /// Rule ID (or a unique prefix of it)
        id: String,
    },
    /// Count how many rows of a CSV a rule would match, without saving anything
    Test {
        /// Text (or pattern) to look for in descriptions
        match_text: String,
        /// CSV file to test against; reads stdin when omitted
        file: Option<PathBuf>,
        /// How to match: substring, full_string or regex
        #[arg(long, default_value = "substring")]
        mode: MatchMode,
        /// Map a column to a field, as in `lift import`
        #[arg(long = "map", value_name = "COLUMN=FIELD")]
        map: Vec<String>,
    },
}

/// Find a rule by full ID or unique ID prefix
fn resolve_rule<'a>(rules: &'a [TagRule], id: &str) -> Result<&'a TagRule> {
    let id = id.trim().to_lowercase();
    if let Ok(uuid) = Uuid::parse_str(&id) {
        if let Some(rule) = rules.iter().find(|r| r.id == uuid) {
            return Ok(rule);
        }
        bail!("Rule {} not found", id);
    }

    let matches: Vec<&TagRule> = rules
        .iter()
        .filter(|r| !id.is_empty() && r.id.to_string().starts_with(&id))
        .collect();
    match matches.as_slice() {
        [rule] => Ok(*rule),
        [] => bail!("Rule {} not found", id),
        _ => bail!("Rule ID prefix '{}' is ambiguous ({} rules)", id, matches.len()),
    }
}

fn validate(rule: &TagRule) -> Result<()> {
    if !rule.is_active() {
        bail!("A rule needs both match text and a tag");
    }
    if !CompiledRule::compile(rule).is_valid() {
        bail!("Invalid regular expression: {}", rule.match_text);
    }
    Ok(())
}

/// The durable rule store and active profile
fn open_store() -> Result<(Arc<DuckDbStore>, String)> {
    let ctx = get_context()?;
    Ok((ctx.store.clone(), ctx.profile_id().to_string()))
}

pub async fn run(command: RulesCommands) -> Result<()> {
    let logger = get_logger();

    match command {
        RulesCommands::List { json } => {
            let (store, profile_id) = open_store()?;
            let rules = store.list_rules(&profile_id).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&rules)?);
                return Ok(());
            }

            if rules.is_empty() {
                println!("No rules defined. Use 'lift rules add' to create one.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["ID", "Match", "Mode", "Tag", "Replace With"]);
            for rule in &rules {
                let id = rule.id.to_string();
                table.add_row(vec![
                    id[..8].to_string(),
                    rule.match_text.clone(),
                    rule.match_mode.to_string(),
                    rule.tag.clone(),
                    rule.replacement_description.clone().unwrap_or_default(),
                ]);
            }
            println!("{}", table);
        }
        RulesCommands::Add {
            match_text,
            tag,
            mode,
            replace,
            json,
        } => {
            let (store, profile_id) = open_store()?;
            let mut rule = TagRule::new(match_text.trim(), mode, tag.trim());
            if let Some(description) = replace {
                rule = rule.with_replacement(description);
            }
            validate(&rule)?;

            store.create_rule(&profile_id, &rule).await?;
            log_event(&logger, LogEvent::new("rule_created").with_command("rules"));

            if json {
                println!("{}", serde_json::to_string_pretty(&rule)?);
            } else {
                output::success(&format!("Added rule {} ({} → {})", rule.id, rule.match_text, rule.tag));
            }
        }
        RulesCommands::Update {
            id,
            match_text,
            tag,
            mode,
            replace,
            clear_replace,
        } => {
            let (store, profile_id) = open_store()?;
            let rules = store.list_rules(&profile_id).await?;
            let mut rule = resolve_rule(&rules, &id)?.clone();

            if let Some(text) = match_text {
                rule.match_text = text.trim().to_string();
            }
            if let Some(tag) = tag {
                rule.tag = tag.trim().to_string();
            }
            if let Some(mode) = mode {
                rule.match_mode = mode;
            }
            if let Some(description) = replace {
                rule.replacement_description = Some(description);
            } else if clear_replace {
                rule.replacement_description = None;
            }
            validate(&rule)?;

            store.update_rule(&profile_id, &rule).await?;
            log_event(&logger, LogEvent::new("rule_updated").with_command("rules"));
            output::success(&format!("Updated rule {}", rule.id));
        }
        RulesCommands::Remove { id } => {
            let (store, profile_id) = open_store()?;
            let rules = store.list_rules(&profile_id).await?;
            let rule = resolve_rule(&rules, &id)?;
            if !store.delete_rule(&profile_id, rule.id).await? {
                bail!("Rule {} not found", rule.id);
            }
            log_event(&logger, LogEvent::new("rule_deleted").with_command("rules"));
            output::success(&format!("Removed rule {}", rule.id));
        }
        RulesCommands::Test {
            match_text,
            file,
            mode,
            map,
        } => test_rule(match_text, mode, file, map).await?,
    }

    Ok(())
}

/// First `limit` rows the rule matches, in file order
fn sample_matches<'a>(rule: &TagRule, rows: &'a [ReviewRow], limit: usize) -> Vec<&'a ReviewRow> {
    let engine = RuleEngine::new(std::slice::from_ref(rule));
    rows.iter()
        .filter(|r| engine.matching(r.description()).next().is_some())
        .take(limit)
        .collect()
}

/// Load a CSV into a scratch session and preview a rule against it
async fn test_rule(
    match_text: String,
    mode: MatchMode,
    file: Option<PathBuf>,
    map: Vec<String>,
) -> Result<()> {
    // Placeholder tag; previews only look at the match
    let rule = TagRule::new(match_text.trim(), mode, "preview");
    validate(&rule)?;

    let text = read_input(file.as_deref())?;
    let scratch = Arc::new(MemoryStore::new());
    let service = ImportService::new("preview", scratch.clone(), scratch);

    service.upload(text).await?;
    if map.is_empty() {
        service.auto_map()?;
    } else {
        service.set_mapping(parse_mapping_args(&map)?)?;
    }
    service.apply_mapping().await?;

    let count = service.preview_rule(&rule);
    let snapshot = service.snapshot();
    output::labeled("Preview:", &format!("{} of {} row(s) match", count, snapshot.rows.len()));

    for row in sample_matches(&rule, &snapshot.rows, SAMPLE_MATCHES) {
        println!("  {} {}", format!("#{}", row.index()).dimmed(), row.description());
    }
    if count > SAMPLE_MATCHES {
        println!("  {}", format!("... and {} more", count - SAMPLE_MATCHES).dimmed());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerlift_core::CandidateTransaction;

    fn rules() -> Vec<TagRule> {
        vec![
            TagRule::new("uber", MatchMode::Substring, "Transport"),
            TagRule::new("netflix", MatchMode::Substring, "Subscriptions"),
        ]
    }

    #[test]
    fn test_resolve_rule_by_full_id_and_prefix() {
        let rules = rules();
        let id = rules[1].id.to_string();
        assert_eq!(resolve_rule(&rules, &id).unwrap().tag, "Subscriptions");
        assert_eq!(resolve_rule(&rules, &id[..8].to_uppercase()).unwrap().tag, "Subscriptions");
    }

    #[test]
    fn test_resolve_rule_unknown_or_blank() {
        let rules = rules();
        assert!(resolve_rule(&rules, &Uuid::new_v4().to_string()).is_err());
        assert!(resolve_rule(&rules, "").is_err());
    }

    #[test]
    fn test_sample_matches_respects_limit_and_order() {
        let rows: Vec<ReviewRow> = ["UBER TRIP", "NETFLIX", "uber eats", "Uber One"]
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let mut tx = CandidateTransaction::new(i);
                tx.description = d.to_string();
                ReviewRow::new(tx)
            })
            .collect();
        let rule = TagRule::new("uber", MatchMode::Substring, "preview");

        let indices: Vec<usize> = sample_matches(&rule, &rows, 2).iter().map(|r| r.index()).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(sample_matches(&rule, &rows, 10).len(), 3);
    }

    #[test]
    fn test_validate_rejects_bad_rules() {
        assert!(validate(&TagRule::new("  ", MatchMode::Substring, "Tag")).is_err());
        assert!(validate(&TagRule::new("(", MatchMode::Regex, "Tag")).is_err());
        assert!(validate(&TagRule::new("^uber", MatchMode::Regex, "Transport")).is_ok());
    }
}

//! Import command - upload, map, review and commit a bank-statement CSV

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::Serialize;

use super::{get_context, get_logger, log_event, parse_mapping_args, read_input, LogEvent};
use crate::output;
use ledgerlift_core::adapters::keyword::KeywordAssistant;
use ledgerlift_core::adapters::memory::MemoryStore;
use ledgerlift_core::ports::{ClassificationAssistant, TagRuleStore};
use ledgerlift_core::services::{
    CommitSummary, ImportService, MappingResolution, RulesOutcome, SessionSnapshot,
};
use ledgerlift_core::{CanonicalField, ReviewRow};

/// Options of `lift import`
pub struct ImportArgs {
    pub file: Option<PathBuf>,
    pub map: Vec<String>,
    pub preset: Option<String>,
    pub save_preset: Option<String>,
    pub assist: bool,
    pub guidance: Option<String>,
    pub classify: bool,
    pub no_rules: bool,
    pub include_duplicates: bool,
    pub dry_run: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct ImportReport<'a> {
    dry_run: bool,
    mapping: Option<&'a MappingResolution>,
    duplicates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    rules: Option<&'a RulesOutcome>,
    rows: &'a [ReviewRow],
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<&'a CommitSummary>,
    warnings: &'a [String],
}

pub async fn run(args: ImportArgs) -> Result<()> {
    let logger = get_logger();
    let mut ctx = get_context()?;
    let text = read_input(args.file.as_deref())?;

    let assistant: Option<Arc<dyn ClassificationAssistant>> = if args.assist || args.classify {
        Some(Arc::new(KeywordAssistant::new()))
    } else {
        None
    };

    // A dry run never writes rules back to the profile
    let service = if args.dry_run {
        let scratch = Arc::new(MemoryStore::new());
        let rules = ctx.store.list_rules(ctx.profile_id()).await?;
        scratch.replace_rules(ctx.profile_id(), &rules).await?;
        let service = ImportService::new(ctx.profile_id().to_string(), ctx.store.clone(), scratch);
        match assistant {
            Some(assistant) => service.with_assistant(assistant),
            None => service,
        }
    } else {
        ctx.import_service(assistant)
    };

    let guidance = args.guidance.clone().or_else(|| ctx.config.assistant_guidance.clone());
    let mut warnings: Vec<String> = Vec::new();

    let upload = service.upload(text).await?;
    if !args.json {
        output::info(&format!(
            "Read {} row(s) with columns: {}",
            upload.row_count,
            upload.headers.join(", ")
        ));
    }

    // Choose the mapping
    let resolution = if !args.map.is_empty() {
        service.set_mapping(parse_mapping_args(&args.map)?)?
    } else if let Some(name) = &args.preset {
        let mapping = ctx
            .config
            .get_preset(name)
            .with_context(|| format!("Preset '{}' not found", name.trim()))?
            .to_vec();
        service.set_mapping(mapping)?
    } else if args.assist {
        match service.detect_mapping(guidance.as_deref()).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warnings.push(format!("Assisted mapping failed, using header names instead: {}", e));
                service.auto_map()?
            }
        }
    } else {
        service.auto_map()?
    };
    warnings.extend(resolution.warnings.iter().cloned());

    for field in [CanonicalField::TransactionDate, CanonicalField::Amount] {
        if resolution.column_for(field).is_none() {
            bail!(
                "No column is mapped to '{}'. Available columns: {}. Use --map COLUMN={}",
                field,
                upload.headers.join(", "),
                field
            );
        }
    }

    if args.dry_run && args.save_preset.is_some() {
        warnings.push("Dry run: the mapping preset was not saved".to_string());
    } else if let Some(name) = &args.save_preset {
        ctx.config.save_preset(name, resolution.mapping.clone())?;
        ctx.config.save(&ctx.data_dir)?;
        if !args.json {
            output::success(&format!("Saved mapping preset '{}'", name.trim()));
        }
    }

    let applied = service.apply_mapping().await?;
    warnings.extend(applied.warnings);

    if args.include_duplicates {
        let snapshot = service.snapshot();
        for row in snapshot.rows.iter().filter(|r| r.duplicate) {
            service.set_excluded(row.index(), false)?;
        }
    }

    let mut rules_outcome = None;
    if !args.no_rules && service.load_rules().await? > 0 {
        let outcome = service.apply_rules().await?;
        warnings.extend(outcome.warnings.iter().cloned());
        if !outcome.application.invalid_rules.is_empty() {
            warnings.push(format!(
                "{} regex rule(s) skipped because their pattern is invalid",
                outcome.application.invalid_rules.len()
            ));
        }
        rules_outcome = Some(outcome);
    }

    if args.classify {
        match service.classify(guidance.as_deref()).await {
            Ok(outcome) if outcome.invalid_types > 0 => warnings.push(format!(
                "{} suggestion(s) had an unknown type and were kept as-is",
                outcome.invalid_types
            )),
            Ok(_) => {}
            Err(e) => warnings.push(format!("Classification failed: {}", e)),
        }
    }

    let snapshot = service.snapshot();

    if args.dry_run {
        if args.json {
            print_report(&snapshot, rules_outcome.as_ref(), None, &warnings, true)?;
        } else {
            print_review(&snapshot, rules_outcome.as_ref(), &warnings);
            output::info("Dry run: nothing was imported.");
        }
        return Ok(());
    }

    let summary = service.commit().await?;

    let mut event = LogEvent::new("import_committed")
        .with_command("import")
        .with_count(summary.imported);
    if !summary.is_complete() {
        event = event.with_error(format!("{} row(s) failed", summary.errors.len()));
    }
    log_event(&logger, event);

    if args.json {
        print_report(&snapshot, rules_outcome.as_ref(), Some(&summary), &warnings, false)?;
    } else {
        print_review(&snapshot, rules_outcome.as_ref(), &warnings);
        print_summary(&summary);
    }

    if !summary.is_complete() {
        bail!("{} of {} row(s) failed to import", summary.errors.len(), summary.attempted());
    }
    Ok(())
}

fn print_report(
    snapshot: &SessionSnapshot,
    rules: Option<&RulesOutcome>,
    commit: Option<&CommitSummary>,
    warnings: &[String],
    dry_run: bool,
) -> Result<()> {
    let report = ImportReport {
        dry_run,
        mapping: snapshot.mapping.as_ref(),
        duplicates: snapshot.duplicates(),
        rules,
        rows: &snapshot.rows,
        commit,
        warnings,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_review(snapshot: &SessionSnapshot, rules: Option<&RulesOutcome>, warnings: &[String]) {
    for warning in warnings {
        output::warning(warning);
    }

    if let Some(mapping) = &snapshot.mapping {
        let mapped: Vec<String> = mapping
            .mapping
            .iter()
            .filter(|m| m.field != CanonicalField::Ignore)
            .map(|m| format!("{} → {}", m.column, m.field))
            .collect();
        output::labeled("Mapping:", &mapped.join(", "));
    }

    if let Some(rules) = rules {
        output::labeled(
            "Rules:",
            &format!(
                "{} rule(s) tagged {} row(s)",
                rules.application.rules_evaluated, rules.application.rows_matched
            ),
        );
    }

    let mut table = output::create_table();
    table.set_header(vec!["#", "Date", "Type", "Amount", "Description", "Tags", "Status"]);

    for row in snapshot.rows.iter() {
        let tx = &row.transaction;
        let status = if row.duplicate && row.excluded {
            "duplicate".yellow().to_string()
        } else if row.duplicate {
            "duplicate (included)".yellow().to_string()
        } else if row.excluded {
            "excluded".dimmed().to_string()
        } else {
            String::new()
        };

        table.add_row(vec![
            row.index().to_string(),
            tx.transaction_date.clone(),
            tx.transaction_type.to_string(),
            tx.amount.to_string(),
            tx.description.clone(),
            row.suggested_tags.join(", "),
            status,
        ]);
    }

    println!("{}", table);
    println!(
        "{} row(s), {} to import, {} duplicate(s)",
        snapshot.rows.len(),
        snapshot.included().count(),
        snapshot.duplicates()
    );
}

fn print_summary(summary: &CommitSummary) {
    if summary.imported > 0 {
        println!("{} Imported {} transaction(s)", "✓".green(), summary.imported);
    } else if summary.is_complete() {
        output::info("Nothing to import.");
    }

    if !summary.is_complete() {
        println!();
        println!("{} Failed to import {} row(s)", "✗".red(), summary.errors.len());
        for error in &summary.errors {
            println!("  {}", error);
        }
    }
}

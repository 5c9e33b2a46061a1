//! Integration tests for ledgerlift-core import workflows
//!
//! These tests drive `ImportService` end to end. The classification assistant
//! is scripted at the trait level; stores are either real DuckDB files in a
//! temp directory or the in-memory store with injected failures.
//!
//! Run with: cargo test --test integration_tests -- --nocapture

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tempfile::TempDir;
use tokio::sync::Notify;

use ledgerlift_core::adapters::duckdb::DuckDbStore;
use ledgerlift_core::adapters::keyword::KeywordAssistant;
use ledgerlift_core::adapters::memory::MemoryStore;
use ledgerlift_core::domain::{
    CandidateTransaction, CanonicalField, Classification, ColumnMapping, DuplicateProbe, MatchMode,
    ProposedMapping, RawRow, Tag, TagRule, Transaction, TransactionType,
};
use ledgerlift_core::ports::{ClassificationAssistant, TagRuleStore, TransactionStore};
use ledgerlift_core::services::{ImportService, StageKind};
use ledgerlift_core::{Error, LedgerliftContext, Result};

// ============================================================================
// Test Helpers
// ============================================================================

const STATEMENT: &str = "Date,Description,Amount\n\
    2024-01-05,STARBUCKS #123,-4.20\n\
    2024-02-01,GROCER,10.00\n\
    2024-02-01,BAKERY,10.00\n\
    2024-02-03,ACME PAYROLL,2500.00\n";

fn standard_mapping() -> Vec<ColumnMapping> {
    vec![
        ColumnMapping::new("Date", CanonicalField::TransactionDate),
        ColumnMapping::new("Description", CanonicalField::Description),
        ColumnMapping::new("Amount", CanonicalField::Amount),
    ]
}

fn proposal(column: &str, field: &str) -> ProposedMapping {
    ProposedMapping {
        column: column.to_string(),
        field: field.to_string(),
    }
}

fn classification(index: usize, t: &str, tags: &[&str]) -> Classification {
    Classification {
        index,
        transaction_type: t.to_string(),
        suggested_tags: tags.iter().map(|s| s.to_string()).collect(),
    }
}

/// Assistant returning canned responses, optionally blocking until released
#[derive(Default)]
struct ScriptedAssistant {
    mapping: Vec<ProposedMapping>,
    classifications: Vec<Classification>,
    fail: bool,
    /// (entered, release): signals `entered` then waits on `release`
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    /// Number of transactions in each classify call
    calls: Mutex<Vec<usize>>,
}

impl ScriptedAssistant {
    async fn pass_gate(&self) {
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
    }
}

#[async_trait]
impl ClassificationAssistant for ScriptedAssistant {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn detect_mapping(
        &self,
        _headers: &[String],
        samples: &[RawRow],
        _guidance: Option<&str>,
    ) -> Result<Vec<ProposedMapping>> {
        assert!(samples.len() <= 5);
        self.pass_gate().await;
        if self.fail {
            return Err(Error::assistant("model unavailable"));
        }
        Ok(self.mapping.clone())
    }

    async fn classify(
        &self,
        transactions: &[CandidateTransaction],
        _existing_tags: &[Tag],
        _guidance: Option<&str>,
    ) -> Result<Vec<Classification>> {
        self.calls.lock().unwrap().push(transactions.len());
        self.pass_gate().await;
        if self.fail {
            return Err(Error::assistant("model unavailable"));
        }
        Ok(self.classifications.clone())
    }
}

/// One-shot pause point: the first caller signals `entered` and waits for `release`
struct Gate {
    entered: Notify,
    release: Notify,
    armed: AtomicBool,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
            armed: AtomicBool::new(true),
        })
    }

    async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

/// Memory store that can pause inside duplicate lookups or inserts
struct GatedStore {
    inner: Arc<MemoryStore>,
    on_lookup: Option<Arc<Gate>>,
    on_insert: Option<Arc<Gate>>,
}

#[async_trait]
impl TransactionStore for GatedStore {
    async fn existing_duplicate_keys(
        &self,
        profile_id: &str,
        candidates: &[DuplicateProbe],
    ) -> Result<HashSet<String>> {
        if let Some(gate) = &self.on_lookup {
            gate.pass().await;
        }
        self.inner.existing_duplicate_keys(profile_id, candidates).await
    }

    async fn insert_transaction(&self, profile_id: &str, tx: &Transaction) -> Result<()> {
        if let Some(gate) = &self.on_insert {
            gate.pass().await;
        }
        self.inner.insert_transaction(profile_id, tx).await
    }

    async fn list_tags(&self, profile_id: &str) -> Result<Vec<Tag>> {
        self.inner.list_tags(profile_id).await
    }
}

async fn review(service: &ImportService, csv: &str) {
    service.upload(csv.to_string()).await.unwrap();
    service.set_mapping(standard_mapping()).unwrap();
    service.apply_mapping().await.unwrap();
}

fn memory_service(store: &Arc<MemoryStore>) -> ImportService {
    ImportService::new("p1", store.clone(), store.clone())
}

// ============================================================================
// Full Workflow on DuckDB
// ============================================================================

/// A rule tags and renames a row, then commit persists it with the rule
#[tokio::test]
async fn test_starbucks_rule_end_to_end_on_duckdb() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = LedgerliftContext::new(temp_dir.path()).unwrap();
    let profile = ctx.profile_id().to_string();
    let service = ctx.import_service(None);

    review(&service, STATEMENT).await;
    service.add_rule(TagRule::new("starbucks", MatchMode::Substring, "Coffee").with_replacement("Starbucks"));
    let outcome = service.apply_rules().await.unwrap();
    assert!(outcome.persisted);
    assert_eq!(outcome.application.rows_matched, 1);

    let snapshot = service.snapshot();
    assert_eq!(snapshot.rows[0].suggested_tags, vec!["Coffee"]);
    assert_eq!(snapshot.rows[0].description(), "Starbucks");
    assert!(snapshot.rows[0].rules_applied);
    assert!(!snapshot.rows[1].rules_applied);

    let summary = service.commit().await.unwrap();
    assert_eq!(summary.imported, 4);
    assert!(summary.errors.is_empty());

    let saved = ctx.store.list_transactions(&profile).unwrap();
    let coffee = saved.iter().find(|t| t.description == "Starbucks").unwrap();
    assert_eq!(coffee.tags, vec!["Coffee"]);
    assert_eq!(coffee.amount, Decimal::new(-420, 2));
    assert_eq!(coffee.transaction_date, "2024-01-05");

    drop(service);
    drop(ctx);

    // Rules and transactions survive reopening the data directory
    let reopened = LedgerliftContext::new(temp_dir.path()).unwrap();
    let rules = reopened.store.list_rules(&profile).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].replacement(), Some("Starbucks"));
    assert_eq!(reopened.store.list_transactions(&profile).unwrap().len(), 4);
}

/// Re-importing an overlapping statement flags (date, amount) matches only
#[tokio::test]
async fn test_reimport_flags_duplicates_on_duckdb() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = LedgerliftContext::new(temp_dir.path()).unwrap();

    let first = ctx.import_service(None);
    review(&first, "Date,Description,Amount\n2024-02-01,GROCER,10.00\n").await;
    first.commit().await.unwrap();

    let second = ctx.import_service(None);
    second.upload(STATEMENT.to_string()).await.unwrap();
    second.set_mapping(standard_mapping()).unwrap();
    let outcome = second.apply_mapping().await.unwrap();

    // GROCER and BAKERY share date and amount with the committed row
    assert_eq!(outcome.rows, 4);
    assert_eq!(outcome.duplicates, 2);
    let snapshot = second.snapshot();
    for index in [1, 2] {
        assert!(snapshot.rows[index].duplicate);
        assert!(snapshot.rows[index].excluded);
    }
    assert!(!snapshot.rows[0].duplicate);

    // BAKERY is a genuinely different purchase; include it again
    second.set_excluded(2, false).unwrap();
    let summary = second.commit().await.unwrap();
    assert_eq!(summary.imported, 3);
    assert_eq!(ctx.store.list_transactions(ctx.profile_id()).unwrap().len(), 4);
}

#[tokio::test]
async fn test_keyword_assistant_maps_and_classifies() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let service = ImportService::new("p1", store.clone(), store.clone())
        .with_assistant(Arc::new(KeywordAssistant::new()));

    service
        .upload("Posted Date,Memo,Amt,Balance\n01/05/2024,STARBUCKS #1,-4.20,100\n".to_string())
        .await
        .unwrap();
    let resolution = service.detect_mapping(None).await.unwrap();
    assert_eq!(resolution.column_for(CanonicalField::Amount), Some("Amt"));
    assert_eq!(resolution.column_for(CanonicalField::TransactionDate), Some("Posted Date"));

    service.apply_mapping().await.unwrap();
    let outcome = service.classify(None).await.unwrap();
    assert_eq!(outcome.applied, 1);

    let row = &service.snapshot().rows[0];
    assert_eq!(row.transaction.transaction_date, "2024-01-05");
    assert_eq!(row.suggested_tags, vec!["Coffee"]);
}

// ============================================================================
// Mapping
// ============================================================================

#[tokio::test]
async fn test_assisted_mapping_recovers_invalid_entries() {
    let store = Arc::new(MemoryStore::new());
    let assistant = ScriptedAssistant {
        mapping: vec![
            proposal("Date", "transaction_date"),
            proposal("Description", "merchant_name"),
            proposal("Amount", "amount"),
            proposal("Ghost", "reference"),
        ],
        ..Default::default()
    };
    let service = memory_service(&store).with_assistant(Arc::new(assistant));

    service.upload(STATEMENT.to_string()).await.unwrap();
    let resolution = service.detect_mapping(Some("amounts are signed")).await.unwrap();

    assert_eq!(resolution.mapping.len(), 3);
    assert_eq!(resolution.mapping[1], ColumnMapping::ignore("Description"));
    assert_eq!(resolution.warnings.len(), 2);

    service.apply_mapping().await.unwrap();
    let snapshot = service.snapshot();
    assert_eq!(snapshot.rows[0].description(), "");
    assert_eq!(snapshot.rows[3].transaction.amount, Decimal::new(250000, 2));
}

#[tokio::test]
async fn test_assistant_failure_keeps_mapping_stage() {
    let store = Arc::new(MemoryStore::new());
    let assistant = ScriptedAssistant {
        fail: true,
        ..Default::default()
    };
    let service = memory_service(&store).with_assistant(Arc::new(assistant));

    service.upload(STATEMENT.to_string()).await.unwrap();
    let err = service.detect_mapping(None).await.unwrap_err();
    assert!(err.is_collaborator_failure());
    assert_eq!(service.stage(), StageKind::Mapping);

    // Explicit mapping still works after the failure
    service.set_mapping(standard_mapping()).unwrap();
    assert_eq!(service.apply_mapping().await.unwrap().rows, 4);
}

#[tokio::test]
async fn test_remap_discards_annotations() {
    let store = Arc::new(MemoryStore::new());
    let service = memory_service(&store);
    review(&service, STATEMENT).await;

    service.add_rule(TagRule::new("grocer", MatchMode::FullString, "Food"));
    service.apply_rules().await.unwrap();
    service.set_excluded(0, true).unwrap();

    service.remap().unwrap();
    assert_eq!(service.stage(), StageKind::Mapping);
    let mut mapping = standard_mapping();
    mapping.push(ColumnMapping::new("Description", CanonicalField::Reference));
    let resolution = service.set_mapping(mapping).unwrap();
    assert_eq!(resolution.warnings.len(), 0);
    service.apply_mapping().await.unwrap();

    let snapshot = service.snapshot();
    assert!(snapshot.rows.iter().all(|r| !r.excluded && r.suggested_tags.is_empty()));
    assert_eq!(snapshot.rows[1].transaction.reference.as_deref(), Some("GROCER"));
}

// ============================================================================
// Review
// ============================================================================

#[tokio::test]
async fn test_partial_classification_response() {
    let store = Arc::new(MemoryStore::new());
    store.add_tag("p1", "Groceries");
    let assistant = ScriptedAssistant {
        classifications: vec![
            classification(1, "expense", &["groceries"]),
            classification(3, "income", &["Salary"]),
            classification(42, "income", &["Ghost"]),
            classification(2, "not-a-type", &[]),
        ],
        ..Default::default()
    };
    let service = memory_service(&store).with_assistant(Arc::new(assistant));
    review(&service, STATEMENT).await;

    let outcome = service.classify(None).await.unwrap();
    assert_eq!(outcome.applied, 3);
    assert_eq!(outcome.ignored, 1);
    assert_eq!(outcome.invalid_types, 1);

    let snapshot = service.snapshot();
    assert!(snapshot.rows[0].suggested_tags.is_empty());
    assert_eq!(snapshot.rows[1].suggested_tags, vec!["Groceries"]);
    assert_eq!(snapshot.rows[2].transaction.transaction_type, TransactionType::Expense);
    assert_eq!(snapshot.rows[3].transaction.transaction_type, TransactionType::Income);
}

#[tokio::test]
async fn test_reclassify_single_row() {
    let store = Arc::new(MemoryStore::new());
    let assistant = Arc::new(ScriptedAssistant {
        // An over-eager response naming other rows too
        classifications: vec![
            classification(0, "transfer", &["Moved"]),
            classification(2, "transfer", &["Moved"]),
        ],
        ..Default::default()
    });
    let service = memory_service(&store).with_assistant(assistant.clone());
    review(&service, STATEMENT).await;

    service.reclassify_row(2, None).await.unwrap();
    assert_eq!(*assistant.calls.lock().unwrap(), vec![1]);

    let snapshot = service.snapshot();
    assert_eq!(snapshot.rows[2].suggested_tags, vec!["Moved"]);
    assert!(snapshot.rows[0].suggested_tags.is_empty());

    assert!(matches!(service.reclassify_row(99, None).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_rule_pass_only_touches_unmatched_rows() {
    let store = Arc::new(MemoryStore::new());
    let service = memory_service(&store);
    review(&service, STATEMENT).await;

    service.add_rule(TagRule::new("starbucks", MatchMode::Substring, "Coffee"));
    service.apply_rules().await.unwrap();

    service.add_rule(TagRule::new("^(starbucks|grocer)", MatchMode::Regex, "Shops"));
    let second = service.apply_rules().await.unwrap();
    assert_eq!(second.application.rows_matched, 1);

    let snapshot = service.snapshot();
    assert_eq!(snapshot.rows[0].suggested_tags, vec!["Coffee"]);
    assert_eq!(snapshot.rows[1].suggested_tags, vec!["Shops"]);

    // The saved set mirrors the working copy
    assert_eq!(store.list_rules("p1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_preview_does_not_mutate() {
    let store = Arc::new(MemoryStore::new());
    let service = memory_service(&store);
    review(&service, STATEMENT).await;

    let before = service.snapshot();
    let rule = TagRule::new("2500", MatchMode::Substring, "Big");
    assert_eq!(service.preview_rule(&rule), 0);
    let rule = TagRule::new("a", MatchMode::Substring, "HasA");
    assert_eq!(service.preview_rule(&rule), 3);

    let after = service.snapshot();
    assert_eq!(before.rows, after.rows);
}

// ============================================================================
// Commit
// ============================================================================

/// K = 6 rows, E = 1 excluded, one failure: 4 imported and 1 error
#[tokio::test]
async fn test_commit_partial_failure() {
    let store = Arc::new(MemoryStore::new());
    store.fail_insert_for("ROW 3");
    let service = memory_service(&store);

    let mut csv = String::from("Date,Description,Amount\n");
    for i in 0..6 {
        csv.push_str(&format!("2024-03-0{},ROW {},{}.00\n", i + 1, i, i + 1));
    }
    review(&service, &csv).await;
    service.set_excluded(5, true).unwrap();

    let summary = service.commit().await.unwrap();
    assert_eq!(store.insert_attempts(), 5);
    assert_eq!(summary.imported, 4);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("row 3:"));
    assert_eq!(service.stage(), StageKind::Committed);
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let service = memory_service(&store);

    assert!(matches!(service.commit().await, Err(Error::InvalidTransition { .. })));
    assert!(matches!(service.apply_mapping().await, Err(Error::InvalidTransition { .. })));
    assert!(matches!(service.remap(), Err(Error::InvalidTransition { .. })));

    let err = service.upload("Date,Amount\n".to_string()).await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
    assert_eq!(service.stage(), StageKind::Upload);
    assert_eq!(store.insert_attempts(), 0);
}

// ============================================================================
// Stale Results
// ============================================================================

/// A classification that resolves after a reset is discarded
#[tokio::test]
async fn test_classify_result_after_reset_is_stale() {
    let store = Arc::new(MemoryStore::new());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let assistant = ScriptedAssistant {
        classifications: vec![classification(0, "income", &["Late"])],
        gate: Some((entered.clone(), release.clone())),
        ..Default::default()
    };
    let service = Arc::new(memory_service(&store).with_assistant(Arc::new(assistant)));
    review(&service, STATEMENT).await;

    let task = {
        let service = service.clone();
        tokio::spawn(async move { service.classify(None).await })
    };

    entered.notified().await;
    service.reset();
    release.notify_one();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(Error::StaleSession { .. })));
    assert_eq!(service.stage(), StageKind::Upload);
    assert!(service.snapshot().rows.is_empty());
}

/// Row edits made while a classification is in flight do not invalidate it
#[tokio::test]
async fn test_classify_survives_concurrent_row_edit() {
    let store = Arc::new(MemoryStore::new());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let assistant = ScriptedAssistant {
        classifications: vec![classification(1, "expense", &["Food"])],
        gate: Some((entered.clone(), release.clone())),
        ..Default::default()
    };
    let service = Arc::new(memory_service(&store).with_assistant(Arc::new(assistant)));
    review(&service, STATEMENT).await;

    let task = {
        let service = service.clone();
        tokio::spawn(async move { service.classify(None).await })
    };

    entered.notified().await;
    service.set_excluded(0, true).unwrap();
    release.notify_one();

    task.await.unwrap().unwrap();
    let snapshot = service.snapshot();
    assert!(snapshot.rows[0].excluded);
    assert_eq!(snapshot.rows[1].suggested_tags, vec!["Food"]);
}

/// An assisted mapping that resolves after a new upload is discarded
#[tokio::test]
async fn test_mapping_result_after_remap_cycle_is_stale() {
    let store = Arc::new(MemoryStore::new());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let assistant = ScriptedAssistant {
        mapping: vec![proposal("Amount", "amount")],
        gate: Some((entered.clone(), release.clone())),
        ..Default::default()
    };
    let service = Arc::new(memory_service(&store).with_assistant(Arc::new(assistant)));
    service.upload(STATEMENT.to_string()).await.unwrap();

    let task = {
        let service = service.clone();
        tokio::spawn(async move { service.detect_mapping(None).await })
    };

    entered.notified().await;
    service.reset();
    service
        .upload("When,What,How Much\n2024-01-01,X,1\n".to_string())
        .await
        .unwrap();
    release.notify_one();

    assert!(matches!(task.await.unwrap(), Err(Error::StaleSession { .. })));
    assert!(service.snapshot().mapping.is_none());
}

/// An explicit mapping chosen while the assistant is thinking is overwritten
#[tokio::test]
async fn test_mapping_result_overwrites_concurrent_explicit_mapping() {
    let store = Arc::new(MemoryStore::new());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let assistant = ScriptedAssistant {
        mapping: vec![proposal("Date", "transaction_date"), proposal("Amount", "amount")],
        gate: Some((entered.clone(), release.clone())),
        ..Default::default()
    };
    let service = Arc::new(memory_service(&store).with_assistant(Arc::new(assistant)));
    service.upload(STATEMENT.to_string()).await.unwrap();

    let task = {
        let service = service.clone();
        tokio::spawn(async move { service.detect_mapping(None).await })
    };

    entered.notified().await;
    service.set_mapping(standard_mapping()).unwrap();
    release.notify_one();

    let resolution = task.await.unwrap().unwrap();
    let chosen = service.snapshot().mapping.unwrap();
    assert_eq!(chosen.mapping, resolution.mapping);
    assert!(chosen.column_for(CanonicalField::Description).is_none());
    assert_eq!(service.stage(), StageKind::Mapping);
}

/// A reset during an in-flight commit: the result is stale, written rows stay written
#[tokio::test]
async fn test_commit_result_after_reset_is_stale() {
    let inner = Arc::new(MemoryStore::new());
    let gate = Gate::new();
    let store = Arc::new(GatedStore {
        inner: inner.clone(),
        on_lookup: None,
        on_insert: Some(gate.clone()),
    });
    let service = Arc::new(ImportService::new("p1", store, inner.clone()));
    review(&service, STATEMENT).await;

    let task = {
        let service = service.clone();
        tokio::spawn(async move { service.commit().await })
    };

    gate.entered.notified().await;
    service.reset();
    gate.release.notify_one();

    assert!(matches!(task.await.unwrap(), Err(Error::StaleSession { .. })));
    assert_eq!(service.stage(), StageKind::Upload);
    assert!(service.snapshot().commit.is_none());
    assert_eq!(inner.transactions("p1").len(), 4);
}

/// A duplicate check that resolves after a reset flags nothing
#[tokio::test]
async fn test_duplicate_check_after_reset_is_stale() {
    let inner = Arc::new(MemoryStore::new());
    let mut existing = CandidateTransaction::new(0);
    existing.transaction_date = "2024-02-01".to_string();
    existing.amount = Decimal::new(1000, 2);
    existing.description = "GROCER".to_string();
    inner.seed(Transaction::from_candidate("p1", &existing, &[]));

    let gate = Gate::new();
    let store = Arc::new(GatedStore {
        inner: inner.clone(),
        on_lookup: Some(gate.clone()),
        on_insert: None,
    });
    let service = Arc::new(ImportService::new("p1", store, inner.clone()));
    service.upload(STATEMENT.to_string()).await.unwrap();
    service.set_mapping(standard_mapping()).unwrap();

    let task = {
        let service = service.clone();
        tokio::spawn(async move { service.apply_mapping().await })
    };

    gate.entered.notified().await;
    service.reset();
    gate.release.notify_one();

    assert!(matches!(task.await.unwrap(), Err(Error::StaleSession { .. })));
    let snapshot = service.snapshot();
    assert_eq!(snapshot.stage, StageKind::Upload);
    assert!(snapshot.rows.is_empty());
    assert_eq!(snapshot.duplicates(), 0);

    // The same upload without interference does flag the existing row
    service.upload(STATEMENT.to_string()).await.unwrap();
    service.set_mapping(standard_mapping()).unwrap();
    assert_eq!(service.apply_mapping().await.unwrap().duplicates, 2);
}

//! Import service - async workflow over one import session
//!
//! Drives upload → mapping → review → commit against the injected
//! collaborators. The session lock is never held across an `.await`: each
//! async operation captures the version token and its inputs, releases the
//! lock, awaits the collaborator and re-locks to apply the result. If the
//! session moved on in between (reset, re-map, a new upload) the result is
//! dropped and [`Error::StaleSession`] is returned.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::classify::ClassificationOutcome;
use super::commit::{CommitSummary, Committer};
use super::duplicates::{probes_for, DuplicateDetector};
use super::mapping::{self, MappingResolution, SAMPLE_ROWS};
use super::parser;
use super::rules::{match_count, RuleApplication};
use super::session::{ImportSession, SessionAction, StageKind};
use crate::domain::result::{Error, Result};
use crate::domain::{ColumnMapping, ReviewRow, RowEdit, TagRule};
use crate::ports::{ClassificationAssistant, TagRuleStore, TransactionStore};

/// Result of loading a CSV upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub headers: Vec<String>,
    pub row_count: usize,
}

/// Result of entering review
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyOutcome {
    pub rows: usize,
    pub duplicates: usize,
    /// Non-fatal problems (e.g., the duplicate check was unavailable)
    pub warnings: Vec<String>,
}

/// Result of an "apply rules" pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RulesOutcome {
    #[serde(flatten)]
    pub application: RuleApplication,
    /// Whether the active rule set was saved to the profile
    pub persisted: bool,
    pub warnings: Vec<String>,
}

/// Point-in-time view of the session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub version: u64,
    pub stage: StageKind,
    pub headers: Vec<String>,
    pub mapping: Option<MappingResolution>,
    pub rows: Arc<Vec<ReviewRow>>,
    pub commit: Option<CommitSummary>,
}

impl SessionSnapshot {
    pub fn included(&self) -> impl Iterator<Item = &ReviewRow> {
        self.rows.iter().filter(|r| !r.excluded)
    }

    pub fn duplicates(&self) -> usize {
        self.rows.iter().filter(|r| r.duplicate).count()
    }
}

/// Import workflow for one profile
pub struct ImportService {
    profile_id: String,
    session: Mutex<ImportSession>,
    /// Working copy of the profile's rules; edits stay local until applied
    rules: Mutex<Arc<Vec<TagRule>>>,
    assistant: Option<Arc<dyn ClassificationAssistant>>,
    transactions: Arc<dyn TransactionStore>,
    rule_store: Arc<dyn TagRuleStore>,
    detector: DuplicateDetector,
    committer: Committer,
    commit_gate: tokio::sync::Mutex<()>,
}

impl ImportService {
    pub fn new(
        profile_id: impl Into<String>,
        transactions: Arc<dyn TransactionStore>,
        rule_store: Arc<dyn TagRuleStore>,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            session: Mutex::new(ImportSession::new()),
            rules: Mutex::new(Arc::new(Vec::new())),
            assistant: None,
            detector: DuplicateDetector::new(Arc::clone(&transactions)),
            committer: Committer::new(Arc::clone(&transactions)),
            transactions,
            rule_store,
            commit_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Attach a classification assistant for assisted mapping and classification
    pub fn with_assistant(mut self, assistant: Arc<dyn ClassificationAssistant>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    fn lock(&self) -> MutexGuard<'_, ImportSession> {
        // A poisoned session only means a panic mid-edit; the data is still usable
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_rules(&self) -> MutexGuard<'_, Arc<Vec<TagRule>>> {
        self.rules.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn assistant(&self) -> Result<Arc<dyn ClassificationAssistant>> {
        self.assistant
            .clone()
            .ok_or_else(|| Error::assistant("No classification assistant configured"))
    }

    /// Re-lock and confirm no stage-changing transition happened since `started`
    fn relock(&self, started: u64, operation: &str) -> Result<MutexGuard<'_, ImportSession>> {
        let session = self.lock();
        if let Err(e) = session.ensure_version(started) {
            warn!(operation, started, current = session.version(), "discarding stale result");
            return Err(e);
        }
        Ok(session)
    }

    // === Snapshot ===

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.lock();
        SessionSnapshot {
            id: session.id(),
            version: session.version(),
            stage: session.kind(),
            headers: session.csv().map(|c| c.headers.clone()).unwrap_or_default(),
            mapping: session.mapping().cloned(),
            rows: session.rows().unwrap_or_default(),
            commit: session.commit_summary().cloned(),
        }
    }

    pub fn stage(&self) -> StageKind {
        self.lock().kind()
    }

    // === Upload ===

    /// Parse an upload off the async runtime and enter Mapping
    pub async fn upload(&self, text: String) -> Result<UploadOutcome> {
        let started = {
            let session = self.lock();
            session.ensure(SessionAction::Parse)?;
            session.version()
        };

        let parsed = tokio::task::spawn_blocking(move || parser::parse(&text))
            .await
            .map_err(|e| Error::Other(format!("CSV parse task failed: {}", e)))??;

        let outcome = UploadOutcome {
            headers: parsed.headers.clone(),
            row_count: parsed.rows.len(),
        };

        let mut session = self.relock(started, "upload")?;
        session.load(parsed)?;
        info!(columns = outcome.headers.len(), rows = outcome.row_count, "upload parsed");
        Ok(outcome)
    }

    // === Mapping ===

    /// Use a caller-supplied mapping
    pub fn set_mapping(&self, mapping: Vec<ColumnMapping>) -> Result<MappingResolution> {
        let resolution = mapping::explicit(mapping);
        self.lock().set_mapping(resolution.clone())?;
        Ok(resolution)
    }

    /// Derive a mapping from header names alone
    pub fn auto_map(&self) -> Result<MappingResolution> {
        let mut session = self.lock();
        session.ensure(SessionAction::ChooseMapping)?;
        let headers = session.csv().map(|c| c.headers.clone()).unwrap_or_default();
        let resolution = mapping::explicit(mapping::detect_columns(&headers));
        session.set_mapping(resolution.clone())?;
        Ok(resolution)
    }

    /// Ask the assistant for a mapping
    ///
    /// An assistant failure leaves the session in Mapping with its previous
    /// mapping, so the caller can fall back to an explicit one.
    ///
    /// Choosing a mapping does not advance the session version. A
    /// `set_mapping` or `auto_map` made while this call is pending is
    /// overwritten when the assistant answers: the last write wins. Only a
    /// reset or a new upload makes the assistant's answer stale.
    pub async fn detect_mapping(&self, guidance: Option<&str>) -> Result<MappingResolution> {
        let assistant = self.assistant()?;
        let (started, csv) = {
            let session = self.lock();
            session.ensure(SessionAction::ChooseMapping)?;
            let csv = session
                .csv()
                .ok_or_else(|| Error::validation("No upload loaded"))?;
            (session.version(), csv)
        };

        let resolution = mapping::assisted(
            assistant.as_ref(),
            &csv.headers,
            csv.samples(SAMPLE_ROWS),
            guidance,
        )
        .await?;

        let mut session = self.relock(started, "detect_mapping")?;
        session.set_mapping(resolution.clone())?;
        debug!(assistant = assistant.name(), warnings = resolution.warnings.len(), "assisted mapping chosen");
        Ok(resolution)
    }

    /// Normalize rows, enter Review and flag duplicates
    pub async fn apply_mapping(&self) -> Result<ApplyOutcome> {
        let (version, probes, rows) = {
            let mut session = self.lock();
            let rows = session.apply_mapping()?;
            let probes = session
                .rows()
                .map(|rows| probes_for(&rows))
                .unwrap_or_default();
            (session.version(), probes, rows)
        };

        let mut outcome = ApplyOutcome {
            rows,
            ..Default::default()
        };

        match self.detector.check(&self.profile_id, &probes).await {
            Ok(existing) => {
                let mut session = self.relock(version, "duplicate_check")?;
                outcome.duplicates = session.flag_duplicates(&existing)?;
            }
            Err(e) => {
                warn!(error = %e, "duplicate check unavailable");
                outcome
                    .warnings
                    .push(format!("Duplicate check failed; no rows were flagged: {}", e));
            }
        }

        Ok(outcome)
    }

    /// Review → Mapping, keeping the upload and last mapping
    pub fn remap(&self) -> Result<()> {
        self.lock().remap()
    }

    /// Discard everything and return to Upload
    pub fn reset(&self) {
        self.lock().reset();
    }

    // === Review ===

    pub fn set_excluded(&self, index: usize, excluded: bool) -> Result<()> {
        self.lock().set_excluded(index, excluded)
    }

    pub fn edit_row(&self, index: usize, edit: &RowEdit) -> Result<()> {
        self.lock().edit_row(index, edit)
    }

    /// Classify every review row with the assistant
    pub async fn classify(&self, guidance: Option<&str>) -> Result<ClassificationOutcome> {
        self.classify_rows(None, guidance).await
    }

    /// Re-classify a single row without touching the others
    pub async fn reclassify_row(&self, index: usize, guidance: Option<&str>) -> Result<ClassificationOutcome> {
        self.classify_rows(Some(index), guidance).await
    }

    async fn classify_rows(&self, only: Option<usize>, guidance: Option<&str>) -> Result<ClassificationOutcome> {
        let assistant = self.assistant()?;
        let (started, candidates) = {
            let session = self.lock();
            session.ensure(SessionAction::Edit)?;
            let rows = session.rows().unwrap_or_default();
            let candidates: Vec<_> = rows
                .iter()
                .filter(|r| only.map_or(true, |i| r.index() == i))
                .map(|r| r.transaction.clone())
                .collect();
            if let Some(index) = only {
                if candidates.is_empty() {
                    return Err(Error::not_found(format!("Row {}", index)));
                }
            }
            (session.version(), candidates)
        };

        if candidates.is_empty() {
            return Ok(ClassificationOutcome::default());
        }

        let vocabulary = self.transactions.list_tags(&self.profile_id).await?;
        let suggestions = assistant.classify(&candidates, &vocabulary, guidance).await?;

        // A single-row request only ever touches that row
        let suggestions: Vec<_> = suggestions
            .into_iter()
            .filter(|s| only.map_or(true, |i| s.index == i))
            .collect();

        let mut session = self.relock(started, "classify")?;
        session.apply_classifications(&suggestions, &vocabulary)
    }

    // === Rules ===

    /// Load the profile's persisted rules into the working copy
    pub async fn load_rules(&self) -> Result<usize> {
        let rules = self.rule_store.list_rules(&self.profile_id).await?;
        let count = rules.len();
        *self.lock_rules() = Arc::new(rules);
        Ok(count)
    }

    /// Working copy of the rules, in evaluation order
    pub fn rules(&self) -> Arc<Vec<TagRule>> {
        Arc::clone(&self.lock_rules())
    }

    pub fn add_rule(&self, rule: TagRule) {
        Arc::make_mut(&mut self.lock_rules()).push(rule);
    }

    pub fn update_rule(&self, rule: TagRule) -> Result<()> {
        let mut rules = self.lock_rules();
        let slot = Arc::make_mut(&mut rules)
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| Error::not_found(format!("Rule {}", rule.id)))?;
        *slot = rule;
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: Uuid) -> bool {
        let mut rules = self.lock_rules();
        let before = rules.len();
        Arc::make_mut(&mut rules).retain(|r| r.id != rule_id);
        rules.len() != before
    }

    /// How many review rows `rule` would match; never mutates anything
    pub fn preview_rule(&self, rule: &TagRule) -> usize {
        let rows = self.lock().rows().unwrap_or_default();
        match_count(rule, &rows)
    }

    /// Apply the working rules to unmatched rows and save them to the profile
    ///
    /// A failure to save is reported as a warning; the rows keep their tags.
    pub async fn apply_rules(&self) -> Result<RulesOutcome> {
        let rules = self.rules();
        let application = self.lock().apply_rules(&rules)?;

        let mut outcome = RulesOutcome {
            application,
            ..Default::default()
        };

        let active: Vec<TagRule> = rules.iter().filter(|r| r.is_active()).cloned().collect();
        match self.rule_store.replace_rules(&self.profile_id, &active).await {
            Ok(()) => outcome.persisted = true,
            Err(e) => {
                warn!(error = %e, "failed to save tag rules");
                outcome.warnings.push(format!("Rules were applied but not saved: {}", e));
            }
        }

        Ok(outcome)
    }

    // === Commit ===

    /// Persist all included rows and enter Committed
    ///
    /// Row failures are collected in the summary. Only one commit runs at a
    /// time.
    pub async fn commit(&self) -> Result<CommitSummary> {
        let _gate = self
            .commit_gate
            .try_lock()
            .map_err(|_| Error::validation("A commit is already in progress"))?;

        let (started, candidates) = {
            let session = self.lock();
            (session.version(), session.commit_candidates()?)
        };

        let summary = self.committer.commit(&self.profile_id, &candidates).await;

        let mut session = self.relock(started, "commit")?;
        session.complete_commit(summary.clone())?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::domain::{CanonicalField, MatchMode};

    const CSV: &str = "Date,Description,Amount\n\
        2024-01-05,STARBUCKS #123,42.00\n\
        2024-02-01,GROCER,10.00\n";

    fn service(store: &Arc<MemoryStore>) -> ImportService {
        ImportService::new("p1", store.clone(), store.clone())
    }

    fn mapping() -> Vec<ColumnMapping> {
        vec![
            ColumnMapping::new("Date", CanonicalField::TransactionDate),
            ColumnMapping::new("Description", CanonicalField::Description),
            ColumnMapping::new("Amount", CanonicalField::Amount),
        ]
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_csv_and_stays_in_upload() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let err = service.upload("Date,Amount\n".to_string()).await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(service.stage(), StageKind::Upload);
    }

    #[tokio::test]
    async fn test_detect_mapping_without_assistant_fails() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        service.upload(CSV.to_string()).await.unwrap();
        assert!(matches!(service.detect_mapping(None).await, Err(Error::Assistant(_))));
        assert_eq!(service.stage(), StageKind::Mapping);
    }

    #[tokio::test]
    async fn test_duplicate_check_failure_is_a_warning() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let service = service(&store);

        service.upload(CSV.to_string()).await.unwrap();
        service.set_mapping(mapping()).unwrap();
        let outcome = service.apply_mapping().await.unwrap();

        assert_eq!(outcome.rows, 2);
        assert_eq!(outcome.duplicates, 0);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(service.stage(), StageKind::Review);
    }

    #[tokio::test]
    async fn test_rule_edits_are_local_until_applied() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        service.upload(CSV.to_string()).await.unwrap();
        service.set_mapping(mapping()).unwrap();
        service.apply_mapping().await.unwrap();

        let rule = TagRule::new("starbucks", MatchMode::Substring, "Coffee");
        service.add_rule(rule.clone());
        assert_eq!(service.preview_rule(&rule), 1);
        assert!(store.list_rules("p1").await.unwrap().is_empty());

        let outcome = service.apply_rules().await.unwrap();
        assert!(outcome.persisted);
        assert_eq!(outcome.application.rows_matched, 1);
        assert_eq!(store.list_rules("p1").await.unwrap(), vec![rule]);
    }

    #[tokio::test]
    async fn test_rules_still_apply_when_saving_fails() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        service.upload(CSV.to_string()).await.unwrap();
        service.set_mapping(mapping()).unwrap();
        service.apply_mapping().await.unwrap();

        store.set_unavailable(true);
        service.add_rule(TagRule::new("grocer", MatchMode::FullString, "Food"));
        let outcome = service.apply_rules().await.unwrap();

        assert!(!outcome.persisted);
        assert_eq!(outcome.warnings.len(), 1);
        let snapshot = service.snapshot();
        assert_eq!(snapshot.rows[1].suggested_tags, vec!["Food"]);
    }

    #[tokio::test]
    async fn test_update_unknown_rule_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let err = service
            .update_rule(TagRule::new("x", MatchMode::Substring, "y"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!service.remove_rule(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_commit_then_reset() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        service.upload(CSV.to_string()).await.unwrap();
        service.set_mapping(mapping()).unwrap();
        service.apply_mapping().await.unwrap();

        let summary = service.commit().await.unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(service.stage(), StageKind::Committed);
        assert!(service.commit().await.is_err());

        service.reset();
        assert_eq!(service.stage(), StageKind::Upload);
        assert!(service.snapshot().rows.is_empty());
    }
}

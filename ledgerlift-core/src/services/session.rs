//! Import session - staging state machine between upload and commit
//!
//! The session is a plain value with no I/O. Every mutation goes through the
//! transition table in [`transition`], so asking for an action the current
//! stage does not allow (committing during upload, re-mapping after commit)
//! is rejected with [`Error::InvalidTransition`].
//!
//! Review rows are held behind an `Arc` and mutated with `Arc::make_mut`:
//! a snapshot handed out by [`ImportSession::rows`] is never changed by
//! later edits.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::classify::{apply_classifications, ClassificationOutcome};
use super::commit::CommitSummary;
use super::duplicates::flag_duplicates;
use super::mapping::MappingResolution;
use super::normalize::apply_mapping;
use super::rules::{RuleApplication, RuleEngine};
use crate::domain::result::{Error, Result};
use crate::domain::{Classification, ParsedCsv, ReviewRow, RowEdit, Tag, TagRule};

/// Workflow stage without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Upload,
    Mapping,
    Review,
    Committed,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Upload => "upload",
            StageKind::Mapping => "mapping",
            StageKind::Review => "review",
            StageKind::Committed => "committed",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions that drive the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionAction {
    /// Load a parsed upload
    Parse,
    /// Pick or replace the column mapping
    ChooseMapping,
    /// Normalize rows and enter review
    ApplyMapping,
    /// Row edits, rule passes, classification, duplicate flags
    Edit,
    Commit,
    /// Drop review rows and return to mapping
    Remap,
    Reset,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::Parse => "parse an upload",
            SessionAction::ChooseMapping => "choose a mapping",
            SessionAction::ApplyMapping => "apply the mapping",
            SessionAction::Edit => "edit review rows",
            SessionAction::Commit => "commit",
            SessionAction::Remap => "re-map",
            SessionAction::Reset => "reset",
        }
    }

    /// Whether taking this action invalidates in-flight requests
    fn bumps_version(&self) -> bool {
        !matches!(self, SessionAction::ChooseMapping | SessionAction::Edit)
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition table: the stage an action leads to, or `None` if not allowed
pub fn transition(from: StageKind, action: SessionAction) -> Option<StageKind> {
    use SessionAction as A;
    use StageKind as S;

    match (from, action) {
        (_, A::Reset) => Some(S::Upload),

        (S::Upload, A::Parse) => Some(S::Mapping),
        (S::Upload, A::ChooseMapping | A::ApplyMapping | A::Edit | A::Commit | A::Remap) => None,

        (S::Mapping, A::ChooseMapping) => Some(S::Mapping),
        (S::Mapping, A::ApplyMapping) => Some(S::Review),
        (S::Mapping, A::Parse | A::Edit | A::Commit | A::Remap) => None,

        (S::Review, A::Edit) => Some(S::Review),
        (S::Review, A::Commit) => Some(S::Committed),
        (S::Review, A::Remap) => Some(S::Mapping),
        (S::Review, A::Parse | A::ChooseMapping | A::ApplyMapping) => None,

        (S::Committed, A::Parse | A::ChooseMapping | A::ApplyMapping | A::Edit | A::Commit | A::Remap) => {
            None
        }
    }
}

/// Mapping stage payload
#[derive(Debug, Clone)]
pub struct MappingStage {
    pub csv: Arc<ParsedCsv>,
    /// Chosen mapping; survives a re-map so it can be tweaked
    pub mapping: Option<MappingResolution>,
}

/// Review stage payload
#[derive(Debug, Clone)]
pub struct ReviewStage {
    pub csv: Arc<ParsedCsv>,
    pub mapping: MappingResolution,
    pub rows: Arc<Vec<ReviewRow>>,
}

/// Stage with its data
#[derive(Debug, Clone, Default)]
pub enum ImportStage {
    #[default]
    Upload,
    Mapping(MappingStage),
    Review(ReviewStage),
    Committed(CommitSummary),
}

impl ImportStage {
    pub fn kind(&self) -> StageKind {
        match self {
            ImportStage::Upload => StageKind::Upload,
            ImportStage::Mapping(_) => StageKind::Mapping,
            ImportStage::Review(_) => StageKind::Review,
            ImportStage::Committed(_) => StageKind::Committed,
        }
    }
}

/// In-memory staging state for one import
#[derive(Debug, Clone)]
pub struct ImportSession {
    id: Uuid,
    version: u64,
    stage: ImportStage,
}

impl Default for ImportSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 0,
            stage: ImportStage::Upload,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Monotonic token; changes whenever in-flight results become stale
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stage(&self) -> &ImportStage {
        &self.stage
    }

    pub fn kind(&self) -> StageKind {
        self.stage.kind()
    }

    /// Fail unless `action` is allowed from the current stage
    pub fn ensure(&self, action: SessionAction) -> Result<StageKind> {
        transition(self.kind(), action).ok_or_else(|| Error::InvalidTransition {
            stage: self.kind().to_string(),
            action: action.to_string(),
        })
    }

    /// Fail with `StaleSession` if the version moved since `started`
    pub fn ensure_version(&self, started: u64) -> Result<()> {
        if self.version != started {
            return Err(Error::StaleSession {
                started,
                current: self.version,
            });
        }
        Ok(())
    }

    fn enter(&mut self, action: SessionAction, stage: ImportStage) {
        let from = self.kind();
        self.stage = stage;
        if action.bumps_version() {
            self.version += 1;
        }
        if from != self.kind() {
            info!(session = %self.id, from = %from, to = %self.kind(), version = self.version, "import stage changed");
        }
    }

    // === Upload / Mapping ===

    /// Upload → Mapping with a freshly parsed file
    pub fn load(&mut self, csv: ParsedCsv) -> Result<()> {
        self.ensure(SessionAction::Parse)?;
        self.enter(
            SessionAction::Parse,
            ImportStage::Mapping(MappingStage {
                csv: Arc::new(csv),
                mapping: None,
            }),
        );
        Ok(())
    }

    /// Parsed upload, available from Mapping onwards until commit or reset
    pub fn csv(&self) -> Option<Arc<ParsedCsv>> {
        match &self.stage {
            ImportStage::Mapping(m) => Some(Arc::clone(&m.csv)),
            ImportStage::Review(r) => Some(Arc::clone(&r.csv)),
            ImportStage::Upload | ImportStage::Committed(_) => None,
        }
    }

    pub fn mapping(&self) -> Option<&MappingResolution> {
        match &self.stage {
            ImportStage::Mapping(m) => m.mapping.as_ref(),
            ImportStage::Review(r) => Some(&r.mapping),
            ImportStage::Upload | ImportStage::Committed(_) => None,
        }
    }

    pub fn set_mapping(&mut self, resolution: MappingResolution) -> Result<()> {
        self.ensure(SessionAction::ChooseMapping)?;
        if let ImportStage::Mapping(m) = &mut self.stage {
            m.mapping = Some(resolution);
        }
        Ok(())
    }

    /// Mapping → Review: normalize every raw row into a review row
    ///
    /// Returns the number of rows staged.
    pub fn apply_mapping(&mut self) -> Result<usize> {
        self.ensure(SessionAction::ApplyMapping)?;
        let ImportStage::Mapping(stage) = &self.stage else {
            unreachable!("transition table only allows apply_mapping from Mapping");
        };
        let mapping = stage
            .mapping
            .clone()
            .ok_or_else(|| Error::validation("No column mapping chosen"))?;
        let csv = Arc::clone(&stage.csv);

        let rows: Vec<ReviewRow> = apply_mapping(&csv.rows, &mapping.mapping)
            .into_iter()
            .map(ReviewRow::new)
            .collect();
        let count = rows.len();

        self.enter(
            SessionAction::ApplyMapping,
            ImportStage::Review(ReviewStage {
                csv,
                mapping,
                rows: Arc::new(rows),
            }),
        );
        Ok(count)
    }

    // === Review ===

    /// Snapshot of the review rows; unaffected by later edits
    pub fn rows(&self) -> Option<Arc<Vec<ReviewRow>>> {
        match &self.stage {
            ImportStage::Review(r) => Some(Arc::clone(&r.rows)),
            _ => None,
        }
    }

    pub fn row(&self, index: usize) -> Option<&ReviewRow> {
        match &self.stage {
            ImportStage::Review(r) => r.rows.iter().find(|row| row.index() == index),
            _ => None,
        }
    }

    /// Run a mutation over the review rows (copy-on-write)
    pub fn edit_rows<R>(&mut self, f: impl FnOnce(&mut Vec<ReviewRow>) -> R) -> Result<R> {
        self.ensure(SessionAction::Edit)?;
        match &mut self.stage {
            ImportStage::Review(r) => Ok(f(Arc::make_mut(&mut r.rows))),
            _ => unreachable!("transition table only allows edits in Review"),
        }
    }

    pub fn edit_row(&mut self, index: usize, edit: &RowEdit) -> Result<()> {
        self.edit_rows(|rows| {
            let row = rows
                .iter_mut()
                .find(|r| r.index() == index)
                .ok_or_else(|| Error::not_found(format!("Row {}", index)))?;
            edit.apply(row);
            Ok(())
        })?
    }

    /// Include or exclude a row from commit (duplicates included)
    pub fn set_excluded(&mut self, index: usize, excluded: bool) -> Result<()> {
        self.edit_row(
            index,
            &RowEdit {
                excluded: Some(excluded),
                ..Default::default()
            },
        )
    }

    pub fn flag_duplicates(&mut self, existing: &HashSet<String>) -> Result<usize> {
        self.edit_rows(|rows| flag_duplicates(rows, existing))
    }

    pub fn apply_rules(&mut self, rules: &[TagRule]) -> Result<RuleApplication> {
        let engine = RuleEngine::new(rules);
        self.edit_rows(|rows| engine.apply(rows))
    }

    pub fn apply_classifications(
        &mut self,
        suggestions: &[Classification],
        vocabulary: &[Tag],
    ) -> Result<ClassificationOutcome> {
        self.edit_rows(|rows| apply_classifications(rows, suggestions, vocabulary))
    }

    /// Rows that a commit would persist
    pub fn commit_candidates(&self) -> Result<Vec<ReviewRow>> {
        self.ensure(SessionAction::Commit)?;
        Ok(self
            .rows()
            .map(|rows| rows.iter().filter(|r| !r.excluded).cloned().collect())
            .unwrap_or_default())
    }

    /// Review → Committed
    pub fn complete_commit(&mut self, summary: CommitSummary) -> Result<()> {
        self.ensure(SessionAction::Commit)?;
        self.enter(SessionAction::Commit, ImportStage::Committed(summary));
        Ok(())
    }

    pub fn commit_summary(&self) -> Option<&CommitSummary> {
        match &self.stage {
            ImportStage::Committed(summary) => Some(summary),
            _ => None,
        }
    }

    /// Review → Mapping, discarding review rows and their annotations
    pub fn remap(&mut self) -> Result<()> {
        self.ensure(SessionAction::Remap)?;
        let ImportStage::Review(stage) = &self.stage else {
            unreachable!("transition table only allows remap from Review");
        };
        let next = MappingStage {
            csv: Arc::clone(&stage.csv),
            mapping: Some(stage.mapping.clone()),
        };
        self.enter(SessionAction::Remap, ImportStage::Mapping(next));
        Ok(())
    }

    /// Any stage → Upload, discarding everything
    pub fn reset(&mut self) {
        self.enter(SessionAction::Reset, ImportStage::Upload);
    }
}

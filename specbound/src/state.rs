//! Per-invocation mutable state shared by the stages of one run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{ComplianceResult, RefinementResult, WorkItemDraft};

/// Bookkeeping for one pipeline invocation.
///
/// Fields stay `None` until the stage that owns them has written them. A
/// state is never shared between invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub current_draft: Option<WorkItemDraft>,
    /// Drafts superseded by later drafts, oldest first.
    pub draft_history: Vec<WorkItemDraft>,
    pub last_compliance: Option<ComplianceResult>,
    pub last_refinement: Option<RefinementResult>,
    /// Completed passes that did not satisfy the exit condition.
    pub iteration_count: u32,
    /// Every retry diagnostic issued during the run.
    pub retry_history: Vec<String>,
    /// Diagnostics for the stage currently being retried; cleared on success.
    pub stage_feedback: Vec<String>,
    pub exit_diagnostic: Option<String>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    /// Install `draft` as current, moving the previous one into history.
    pub fn replace_draft(&mut self, draft: WorkItemDraft) {
        if let Some(previous) = self.current_draft.replace(draft) {
            self.draft_history.push(previous);
        }
    }

    /// JSON view used by the exit predicate and the run archive.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

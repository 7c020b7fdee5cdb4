//! The three stages of one pass: Draft, ComplianceValidate and Refine.
//!
//! Stages form a closed set. Each reads what earlier stages wrote to the
//! [`RunState`] and writes its own fields; none of them branches on the
//! outcome of another.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::binder::BoundRequirements;
use crate::core::compliance::check_compliance;
use crate::core::types::{RefinementResult, WorkItemDraft, WorkItemRequest};
use crate::error::StageError;
use crate::io::oracle::{GenerationOracle, OracleRequest};
use crate::io::prompt::{DraftPromptInputs, PromptBuilder, RefinePromptInputs};
use crate::io::schema::OutputSchema;
use crate::state::RunState;

/// Stage identity, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Draft,
    Compliance,
    Refine,
}

impl Stage {
    /// Fixed execution order of a pass.
    pub const ORDER: [Stage; 3] = [Stage::Draft, Stage::Compliance, Stage::Refine];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Draft => "draft",
            Stage::Compliance => "compliance",
            Stage::Refine => "refine",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything the self-healing executor can run.
pub trait RunnableStage {
    fn stage(&self) -> Stage;

    /// Run one attempt (zero-based) against `state`.
    fn run(&self, state: &mut RunState, attempt: u32) -> Result<(), StageError>;
}

/// Oracle answer for the Refine stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementOutput {
    pub draft: WorkItemDraft,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub summary: String,
}

/// Everything the stages of one invocation share besides the run state.
pub struct StageContext<'a, O: ?Sized> {
    pub oracle: &'a O,
    pub prompts: &'a PromptBuilder,
    pub request: &'a WorkItemRequest,
    pub bound: &'a BoundRequirements,
    pub persona: &'a str,
    pub include_estimates: bool,
    pub coverage_threshold: f64,
}

impl<'a, O: GenerationOracle + ?Sized> StageContext<'a, O> {
    pub fn runner(&self, stage: Stage) -> StageRunner<'_, 'a, O> {
        StageRunner { stage, ctx: self }
    }

    fn draft(&self, state: &mut RunState, attempt: u32) -> Result<(), StageError> {
        let issues = open_issues(state);
        let prompt = self
            .prompts
            .build_draft(&DraftPromptInputs {
                persona: self.persona,
                include_estimates: self.include_estimates,
                request: self.request,
                matched_domain: self.bound.matched_domain(),
                requirements: &self.bound.requirements,
                previous: state.current_draft.as_ref(),
                issues: &issues,
                feedback: &state.stage_feedback,
            })
            .map_err(|err| StageError::Prompt(format!("{err:#}")))?;

        let schema = OutputSchema::work_item();
        let raw = self.oracle.generate(&OracleRequest {
            stage: Stage::Draft,
            prompt: &prompt,
            schema: schema.value(),
            attempt,
        })?;
        let mut draft: WorkItemDraft = schema.parse(&raw)?;
        self.stamp_grouping(&mut draft);

        debug!(criteria = draft.acceptance_criteria.len(), "draft accepted by schema");
        state.replace_draft(draft);
        Ok(())
    }

    fn compliance(&self, state: &mut RunState) -> Result<(), StageError> {
        let draft = state
            .current_draft
            .as_ref()
            .ok_or(StageError::MissingStageInput("current_draft"))?;
        let result = check_compliance(
            &draft.acceptance_criteria,
            self.bound,
            self.coverage_threshold,
        );
        info!(
            compliant = result.is_compliant,
            missing = result.missing_requirements.len(),
            suggestions = result.blocking_suggestions.len(),
            "compliance checked"
        );
        state.last_compliance = Some(result);
        Ok(())
    }

    fn refine(&self, state: &mut RunState, attempt: u32) -> Result<(), StageError> {
        let draft = state
            .current_draft
            .as_ref()
            .ok_or(StageError::MissingStageInput("current_draft"))?;
        let compliance = state
            .last_compliance
            .as_ref()
            .ok_or(StageError::MissingStageInput("last_compliance"))?;
        let prompt = self
            .prompts
            .build_refine(&RefinePromptInputs {
                persona: self.persona,
                include_estimates: self.include_estimates,
                request: self.request,
                requirements: &self.bound.requirements,
                draft,
                compliance,
                feedback: &state.stage_feedback,
            })
            .map_err(|err| StageError::Prompt(format!("{err:#}")))?;

        let schema = OutputSchema::refinement();
        let raw = self.oracle.generate(&OracleRequest {
            stage: Stage::Refine,
            prompt: &prompt,
            schema: schema.value(),
            attempt,
        })?;
        let output: RefinementOutput = schema.parse(&raw)?;
        let mut refined = output.draft;
        self.stamp_grouping(&mut refined);

        // The oracle's own verdict is never trusted alone.
        let compliance_after = check_compliance(
            &refined.acceptance_criteria,
            self.bound,
            self.coverage_threshold,
        );
        let is_valid = output.is_valid && compliance_after.is_compliant;
        info!(
            self_reported_valid = output.is_valid,
            compliant_after = compliance_after.is_compliant,
            is_valid,
            "refinement recorded"
        );

        state.replace_draft(refined);
        state.last_refinement = Some(RefinementResult {
            is_valid,
            self_reported_valid: output.is_valid,
            issues: output.issues,
            summary: output.summary,
            compliance_after,
        });
        Ok(())
    }

    fn stamp_grouping(&self, draft: &mut WorkItemDraft) {
        for (key, value) in &self.request.grouping {
            draft
                .metadata
                .insert(key.clone(), Value::String(value.clone()));
        }
    }
}

/// Issues carried into the next Draft: the refinement's own issues plus the
/// deterministic findings it left unresolved.
fn open_issues(state: &RunState) -> Vec<String> {
    let mut issues = Vec::new();
    if let Some(refinement) = &state.last_refinement {
        issues.extend(refinement.issues.iter().cloned());
        issues.extend(refinement.compliance_after.blocking_suggestions.iter().cloned());
    }
    issues
}

/// One stage bound to its context.
pub struct StageRunner<'c, 'a, O: ?Sized> {
    stage: Stage,
    ctx: &'c StageContext<'a, O>,
}

impl<O: GenerationOracle + ?Sized> RunnableStage for StageRunner<'_, '_, O> {
    fn stage(&self) -> Stage {
        self.stage
    }

    #[instrument(skip_all, fields(stage = %self.stage, attempt = attempt))]
    fn run(&self, state: &mut RunState, attempt: u32) -> Result<(), StageError> {
        match self.stage {
            Stage::Draft => self.ctx.draft(state, attempt),
            Stage::Compliance => self.ctx.compliance(state),
            Stage::Refine => self.ctx.refine(state, attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::binder::bind_requirements;
    use crate::core::extractor::{DEFAULT_LOOKAHEAD_WINDOW, extract_requirements};
    use crate::core::taxonomy::KeywordTaxonomy;
    use crate::error::SchemaValidationError;
    use crate::test_support::{ScriptedOracle, draft_json, refinement_json};
    use std::collections::BTreeMap;

    fn api_request() -> WorkItemRequest {
        WorkItemRequest {
            title: "Implement API endpoint".to_string(),
            grouping: BTreeMap::from([("feature_id".to_string(), "F-9".to_string())]),
            ..WorkItemRequest::default()
        }
    }

    fn api_bound(request: &WorkItemRequest) -> BoundRequirements {
        let taxonomy = KeywordTaxonomy::default();
        let reqs = extract_requirements(
            "All APIs MUST return JSON",
            &taxonomy,
            DEFAULT_LOOKAHEAD_WINDOW,
        );
        bind_requirements(&request.descriptor_text(), &reqs, &taxonomy)
    }

    fn context<'a>(
        oracle: &'a ScriptedOracle,
        prompts: &'a PromptBuilder,
        request: &'a WorkItemRequest,
        bound: &'a BoundRequirements,
    ) -> StageContext<'a, ScriptedOracle> {
        StageContext {
            oracle,
            prompts,
            request,
            bound,
            persona: "senior product owner",
            include_estimates: false,
            coverage_threshold: 0.3,
        }
    }

    #[test]
    fn draft_writes_current_draft_with_grouping() {
        let request = api_request();
        let bound = api_bound(&request);
        let prompts = PromptBuilder::new(40_000).expect("prompts");
        let oracle = ScriptedOracle::new([Ok(draft_json("Orders", &["Returns JSON"]))]);
        let ctx = context(&oracle, &prompts, &request, &bound);

        let mut state = RunState::new("run-1");
        ctx.runner(Stage::Draft).run(&mut state, 0).expect("draft");

        let draft = state.current_draft.as_ref().expect("draft");
        assert_eq!(draft.title, "Orders");
        assert_eq!(draft.metadata["feature_id"], Value::String("F-9".to_string()));
        let calls = oracle.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].stage, Stage::Draft);
        assert!(calls[0].prompt.contains("REQ-001"));
    }

    #[test]
    fn malformed_draft_is_a_schema_error() {
        let request = api_request();
        let bound = api_bound(&request);
        let prompts = PromptBuilder::new(40_000).expect("prompts");
        let oracle = ScriptedOracle::new([Ok("{\"title\": 3}".to_string())]);
        let ctx = context(&oracle, &prompts, &request, &bound);

        let mut state = RunState::new("run-1");
        let err = ctx.runner(Stage::Draft).run(&mut state, 0).unwrap_err();
        assert!(matches!(err, StageError::Schema(SchemaValidationError::Violations(_))));
        assert!(state.current_draft.is_none());
    }

    #[test]
    fn compliance_requires_a_draft() {
        let request = api_request();
        let bound = api_bound(&request);
        let prompts = PromptBuilder::new(40_000).expect("prompts");
        let oracle = ScriptedOracle::new([]);
        let ctx = context(&oracle, &prompts, &request, &bound);

        let mut state = RunState::new("run-1");
        let err = ctx.runner(Stage::Compliance).run(&mut state, 0).unwrap_err();
        assert_eq!(err, StageError::MissingStageInput("current_draft"));
        assert!(oracle.calls().is_empty());
    }

    #[test]
    fn refine_validity_requires_deterministic_recheck() {
        let request = api_request();
        let bound = api_bound(&request);
        let prompts = PromptBuilder::new(40_000).expect("prompts");
        let oracle = ScriptedOracle::new([
            Ok(draft_json("Orders", &["Returns XML payload"])),
            // Oracle claims validity but keeps the contradiction.
            Ok(refinement_json("Orders", &["Returns XML payload"], true)),
        ]);
        let ctx = context(&oracle, &prompts, &request, &bound);

        let mut state = RunState::new("run-1");
        for stage in Stage::ORDER {
            ctx.runner(stage).run(&mut state, 0).expect("stage");
        }
        let compliance = state.last_compliance.as_ref().expect("compliance");
        assert!(!compliance.is_compliant);

        let refinement = state.last_refinement.as_ref().expect("refinement");
        assert!(refinement.self_reported_valid);
        assert!(!refinement.compliance_after.is_compliant);
        assert!(!refinement.is_valid);
        assert_eq!(state.draft_history.len(), 1);
    }

    #[test]
    fn refine_accepts_compliant_refinement() {
        let request = api_request();
        let bound = api_bound(&request);
        let prompts = PromptBuilder::new(40_000).expect("prompts");
        let oracle = ScriptedOracle::new([
            Ok(draft_json("Orders", &["Returns XML payload"])),
            Ok(refinement_json("Orders", &["GET /orders must return JSON"], true)),
        ]);
        let ctx = context(&oracle, &prompts, &request, &bound);

        let mut state = RunState::new("run-1");
        for stage in Stage::ORDER {
            ctx.runner(stage).run(&mut state, 0).expect("stage");
        }
        let refinement = state.last_refinement.as_ref().expect("refinement");
        assert!(refinement.is_valid);
        let calls = oracle.calls();
        assert_eq!(calls[1].stage, Stage::Refine);
        assert!(calls[1].prompt.contains("demands JSON"));
    }
}

//! Top-level pipeline: extraction, binding, the conditional loop and the
//! contract gate, producing one [`PipelineResult`] per request.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::core::binder::bind_requirements;
use crate::core::contract::{ContractPolicy, enforce_contract, sanitize};
use crate::core::extractor::extract_requirements;
use crate::core::taxonomy::KeywordTaxonomy;
use crate::core::types::{HardRequirement, PipelineOutcome, PipelineResult, WorkItemRequest};
use crate::error::{PipelineError, StageError};
use crate::io::config::{PipelineConfig, RetryConfig};
use crate::io::corpus::SpecCorpus;
use crate::io::oracle::GenerationOracle;
use crate::io::prompt::PromptBuilder;
use crate::io::run_log::RunArchive;
use crate::io::sink::{PersistRecord, PersistenceSink};
use crate::looping::{ConditionalLoopController, LoopStop};
use crate::sequence::StageSequencer;
use crate::stages::{Stage, StageContext};
use crate::state::RunState;

/// Metadata key set to `false` on the best-effort draft of an exhausted run.
pub const VALIDATED_KEY: &str = "validated";

const RUN_ID_HEX_CHARS: usize = 12;

/// Knobs for one orchestrator, usually derived from [`PipelineConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub max_iterations: u32,
    pub exit_condition: String,
    pub persona: String,
    pub retries: RetryConfig,
    pub coverage_threshold: f64,
    pub lookahead_window: usize,
    pub prompt_budget_bytes: usize,
    pub contract: ContractPolicy,
    pub taxonomy: KeywordTaxonomy,
}

impl PipelineSettings {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            exit_condition: cfg.exit_condition.clone(),
            persona: cfg.persona.clone(),
            retries: cfg.retries.clone(),
            coverage_threshold: cfg.compliance.coverage_threshold,
            lookahead_window: cfg.extraction.lookahead_window,
            prompt_budget_bytes: cfg.prompt.budget_bytes,
            contract: ContractPolicy {
                forbidden_terms: cfg.forbidden_terms.clone(),
                include_estimates: cfg.include_estimates,
            },
            taxonomy: cfg.keyword_taxonomy(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Entry point that turns requests into validated work items.
///
/// Requirements are extracted once from the corpus; every [`run`](Self::run)
/// gets its own [`RunState`].
pub struct PipelineOrchestrator<'a, O: ?Sized> {
    oracle: &'a O,
    settings: PipelineSettings,
    corpus: SpecCorpus,
    requirements: Vec<HardRequirement>,
    prompts: PromptBuilder,
    sink: Option<&'a dyn PersistenceSink>,
    archive: Option<RunArchive>,
}

impl<'a, O: GenerationOracle + ?Sized> PipelineOrchestrator<'a, O> {
    pub fn new(oracle: &'a O, settings: PipelineSettings, corpus: SpecCorpus) -> Result<Self> {
        let requirements = extract_requirements(
            corpus.text(),
            &settings.taxonomy,
            settings.lookahead_window,
        );
        info!(
            requirements = requirements.len(),
            spec_version = corpus.version(),
            "extracted hard requirements"
        );
        let prompts =
            PromptBuilder::new(settings.prompt_budget_bytes).context("build prompt templates")?;
        Ok(Self {
            oracle,
            settings,
            corpus,
            requirements,
            prompts,
            sink: None,
            archive: None,
        })
    }

    /// Persist accepted artifacts to `sink`.
    pub fn with_sink(mut self, sink: &'a dyn PersistenceSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Snapshot every pass and the final result under `archive`.
    pub fn with_archive(mut self, archive: RunArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn requirements(&self) -> &[HardRequirement] {
        &self.requirements
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn corpus(&self) -> &SpecCorpus {
        &self.corpus
    }

    /// Deterministic run id for `request` against the loaded corpus.
    pub fn run_id_for(&self, request: &WorkItemRequest) -> Result<String, PipelineError> {
        let mut hasher = Sha256::new();
        hasher.update(self.corpus.version().as_bytes());
        hasher.update(serde_json::to_vec(request)?);
        let mut hex = hex::encode(hasher.finalize());
        hex.truncate(RUN_ID_HEX_CHARS);
        Ok(format!("run-{hex}"))
    }

    pub fn run(&self, request: &WorkItemRequest) -> Result<PipelineResult, PipelineError> {
        let run_id = self.run_id_for(request)?;
        self.run_with_id(request, run_id)
    }

    /// Run the full pipeline for `request` under an explicit run id.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn run_with_id(
        &self,
        request: &WorkItemRequest,
        run_id: String,
    ) -> Result<PipelineResult, PipelineError> {
        let bound = bind_requirements(
            &request.descriptor_text(),
            &self.requirements,
            &self.settings.taxonomy,
        );
        info!(
            domain = bound.matched_domain().unwrap_or("none"),
            bound = bound.requirements.len(),
            "bound requirements"
        );

        let ctx = StageContext {
            oracle: self.oracle,
            prompts: &self.prompts,
            request,
            bound: &bound,
            persona: &self.settings.persona,
            include_estimates: self.settings.contract.include_estimates,
            coverage_threshold: self.settings.coverage_threshold,
        };
        let sequencer = StageSequencer::new(&ctx, self.settings.retries.clone());
        let controller = ConditionalLoopController::new(
            self.settings.max_iterations,
            self.settings.exit_condition.as_str(),
        );

        let mut state = RunState::new(run_id);
        let archive = self.archive.as_ref();
        let outcome = controller.run(
            &mut state,
            |state| sequencer.run_pass(state).map(|_| ()),
            |pass, state| match archive {
                Some(archive) => archive
                    .write_pass(pass, state)
                    .map(|_| ())
                    .map_err(PipelineError::Archive),
                None => Ok(()),
            },
        )?;

        let matched_domain = bound.matched_domain().map(str::to_string);
        let compliance = state
            .last_refinement
            .as_ref()
            .map(|r| r.compliance_after.clone())
            .or_else(|| state.last_compliance.clone());

        let result = match outcome.stop {
            LoopStop::Success => {
                let draft = state.current_draft.as_ref().ok_or(PipelineError::Stage {
                    stage: Stage::Refine,
                    attempts: 0,
                    source: StageError::MissingStageInput("current_draft"),
                })?;
                let verdict = enforce_contract(draft, request, &self.settings.contract);
                let outcome_kind = if verdict.accepted {
                    info!(passes = outcome.passes, "artifact accepted");
                    PipelineOutcome::Accepted
                } else {
                    warn!(reason = ?verdict.rejection_reason, "artifact rejected by contract");
                    PipelineOutcome::Rejected
                };
                PipelineResult {
                    run_id: state.run_id.clone(),
                    accepted: verdict.accepted,
                    outcome: outcome_kind,
                    artifact: Some(verdict.artifact),
                    iterations: outcome.passes,
                    rejection_reason: verdict.rejection_reason,
                    alignment_issues: verdict.alignment_issues,
                    matched_domain,
                    compliance,
                }
            }
            LoopStop::Maxed { max_iterations } => {
                warn!(max_iterations, "iteration budget exhausted");
                let alignment_issues = state
                    .current_draft
                    .as_ref()
                    .map(|d| enforce_contract(d, request, &self.settings.contract).alignment_issues)
                    .unwrap_or_default();
                let artifact = state.current_draft.as_ref().map(|d| {
                    let mut best = sanitize(d, self.settings.contract.include_estimates);
                    best.metadata
                        .insert(VALIDATED_KEY.to_string(), Value::Bool(false));
                    best
                });
                PipelineResult {
                    run_id: state.run_id.clone(),
                    accepted: false,
                    outcome: PipelineOutcome::Exhausted,
                    artifact,
                    iterations: outcome.passes,
                    rejection_reason: Some(format!(
                        "iteration budget exhausted after {max_iterations} pass(es); best draft returned unvalidated"
                    )),
                    alignment_issues,
                    matched_domain,
                    compliance,
                }
            }
        };

        if result.accepted
            && let (Some(sink), Some(artifact)) = (self.sink, result.artifact.as_ref())
        {
            sink.persist(&PersistRecord {
                run_id: result.run_id.clone(),
                iterations: result.iterations,
                matched_domain: result.matched_domain.clone(),
                spec_version: self.corpus.version().to_string(),
                persisted_at: Utc::now(),
                artifact: artifact.clone(),
            })
            .map_err(PipelineError::Persist)?;
        }
        if let Some(archive) = &self.archive {
            archive.write_result(&result).map_err(PipelineError::Archive)?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemorySink, ScriptedOracle, draft_json, refinement_json, request};

    fn orchestrator<'a>(
        oracle: &'a ScriptedOracle,
        spec: &str,
        settings: PipelineSettings,
    ) -> PipelineOrchestrator<'a, ScriptedOracle> {
        PipelineOrchestrator::new(oracle, settings, SpecCorpus::from_text(spec))
            .expect("orchestrator")
    }

    #[test]
    fn run_ids_are_deterministic_and_request_specific() {
        let oracle = ScriptedOracle::new([]);
        let orch = orchestrator(&oracle, "All APIs MUST return JSON", PipelineSettings::default());
        let a = orch.run_id_for(&request("Implement API endpoint")).expect("id");
        let b = orch.run_id_for(&request("Implement API endpoint")).expect("id");
        let c = orch.run_id_for(&request("Something else")).expect("id");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("run-"));
        assert_eq!(a.len(), 4 + RUN_ID_HEX_CHARS);
    }

    #[test]
    fn accepted_runs_are_persisted_and_archived() {
        let temp = tempfile::tempdir().expect("tempdir");
        let oracle = ScriptedOracle::new([
            Ok(draft_json("Orders endpoint", &["GET /orders must return JSON"])),
            Ok(refinement_json("Orders endpoint", &["GET /orders must return JSON"], true)),
        ]);
        let sink = MemorySink::default();
        let orch = orchestrator(&oracle, "All APIs MUST return JSON", PipelineSettings::default())
            .with_sink(&sink)
            .with_archive(RunArchive::new(temp.path()));

        let result = orch.run(&request("Implement API endpoint")).expect("run");
        assert!(result.accepted);
        assert_eq!(result.outcome, PipelineOutcome::Accepted);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.matched_domain.as_deref(), Some("api"));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_id, result.run_id);
        assert_eq!(records[0].spec_version, orch.corpus().version());

        let archive = RunArchive::new(temp.path());
        assert!(archive.pass_state_path(&result.run_id, 1).is_file());
        assert!(archive.result_path(&result.run_id).is_file());
    }

    #[test]
    fn rejected_runs_are_not_persisted() {
        let oracle = ScriptedOracle::new([
            Ok(draft_json("Orders via OAuth1", &["GET /orders must return JSON"])),
            Ok(refinement_json("Orders via OAuth1", &["GET /orders must return JSON"], true)),
        ]);
        let sink = MemorySink::default();
        let settings = PipelineSettings {
            contract: ContractPolicy {
                forbidden_terms: vec!["OAuth1".to_string()],
                include_estimates: false,
            },
            ..PipelineSettings::default()
        };
        let orch = orchestrator(&oracle, "All APIs MUST return JSON", settings).with_sink(&sink);

        let result = orch.run(&request("Implement API endpoint")).expect("run");
        assert!(!result.accepted);
        assert_eq!(result.outcome, PipelineOutcome::Rejected);
        assert!(result.alignment_issues.iter().any(|i| i.contains("OAuth1")));
        assert!(sink.records().is_empty());
    }

    #[test]
    fn exhausted_runs_return_unvalidated_best_draft() {
        let settings = PipelineSettings {
            max_iterations: 2,
            ..PipelineSettings::default()
        };
        let oracle = ScriptedOracle::new([
            Ok(draft_json("Orders", &["Returns XML payload"])),
            Ok(refinement_json("Orders", &["Returns XML payload"], true)),
            Ok(draft_json("Orders", &["Returns XML payload"])),
            Ok(refinement_json("Orders v2", &["Returns XML payload"], false)),
        ]);
        let sink = MemorySink::default();
        let orch = orchestrator(&oracle, "All APIs MUST return JSON", settings).with_sink(&sink);

        let result = orch.run(&request("Implement API endpoint")).expect("run");
        assert!(!result.accepted);
        assert_eq!(result.outcome, PipelineOutcome::Exhausted);
        assert_eq!(result.iterations, 2);
        let artifact = result.artifact.expect("best draft");
        assert_eq!(artifact.title, "Orders v2");
        assert_eq!(artifact.metadata[VALIDATED_KEY], Value::Bool(false));
        assert!(result.compliance.is_some_and(|c| !c.is_compliant));
        assert!(sink.records().is_empty());
    }

    #[test]
    fn oracle_outage_is_a_hard_failure() {
        let oracle = ScriptedOracle::new([Err(crate::error::OracleError::Unavailable(
            "connection refused".to_string(),
        ))]);
        let orch = orchestrator(&oracle, "", PipelineSettings::default());
        let err = orch.run(&request("Anything")).unwrap_err();
        assert!(err.is_oracle_unavailable());
        assert_eq!(oracle.calls().len(), 1);
    }
}

//! Shared deterministic types for the pipeline core.
//!
//! These types define stable contracts between core components. They do not
//! depend on external state or I/O and serialize deterministically (ordered
//! collections only) so run archives stay diffable.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// RFC-2119-style obligation keyword carried by a requirement line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strength {
    Must,
    MustNot,
    Shall,
    ShallNot,
    Required,
    Always,
    Never,
}

impl Strength {
    pub fn as_str(self) -> &'static str {
        match self {
            Strength::Must => "MUST",
            Strength::MustNot => "MUST_NOT",
            Strength::Shall => "SHALL",
            Strength::ShallNot => "SHALL_NOT",
            Strength::Required => "REQUIRED",
            Strength::Always => "ALWAYS",
            Strength::Never => "NEVER",
        }
    }

    /// True for prohibitions (`MUST_NOT`, `SHALL_NOT`, `NEVER`).
    pub fn is_negative(self) -> bool {
        matches!(self, Strength::MustNot | Strength::ShallNot | Strength::Never)
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single obligation extracted from specification text.
///
/// Identity is positional: ids are assigned in line order by one extraction
/// pass and are never derived from content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardRequirement {
    pub id: String,
    pub text: String,
    pub strength: Strength,
    pub domain_keywords: BTreeSet<String>,
    pub required_artifacts: Vec<String>,
    pub source_section: String,
    pub line_number: usize,
}

/// Association between a work item and the requirements relevant to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainBinding {
    pub domain_name: String,
    pub trigger_keywords: BTreeSet<String>,
    pub bound_requirement_ids: Vec<String>,
}

/// Outcome of checking acceptance criteria against bound requirements.
///
/// Construct through [`ComplianceResult::new`] or [`ComplianceResult::compliant`]
/// so `is_compliant` always agrees with the findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub is_compliant: bool,
    pub missing_requirements: Vec<HardRequirement>,
    pub missing_artifacts: BTreeSet<String>,
    pub blocking_suggestions: Vec<String>,
    pub matched_domain: Option<String>,
}

impl ComplianceResult {
    pub fn new(
        missing_requirements: Vec<HardRequirement>,
        missing_artifacts: BTreeSet<String>,
        blocking_suggestions: Vec<String>,
        matched_domain: Option<String>,
    ) -> Self {
        Self {
            is_compliant: missing_requirements.is_empty() && blocking_suggestions.is_empty(),
            missing_requirements,
            missing_artifacts,
            blocking_suggestions,
            matched_domain,
        }
    }

    /// Nothing to violate.
    pub fn compliant(matched_domain: Option<String>) -> Self {
        Self::new(Vec::new(), BTreeSet::new(), Vec::new(), matched_domain)
    }
}

/// Caller-supplied description of the work item to produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkItemRequest {
    pub title: String,
    pub description: String,
    /// Grouping labels (epic names, components, tags) used for domain binding.
    pub labels: Vec<String>,
    /// Grouping identifiers (e.g. `feature_id`) that must survive onto the artifact.
    pub grouping: BTreeMap<String, String>,
}

impl WorkItemRequest {
    /// Text used for domain scoring: title plus labels.
    pub fn descriptor_text(&self) -> String {
        let mut parts = Vec::with_capacity(self.labels.len() + 1);
        parts.push(self.title.as_str());
        parts.extend(self.labels.iter().map(String::as_str));
        parts.join(" ")
    }

    /// The request's subject: title plus description.
    pub fn subject(&self) -> String {
        format!("{}\n{}", self.title, self.description)
    }
}

/// The generated artifact under validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItemDraft {
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub estimate: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl WorkItemDraft {
    /// Title and description, the draft's subject.
    pub fn subject(&self) -> String {
        format!("{}\n{}", self.title, self.description)
    }
}

/// What the Refine stage recorded for the latest pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementResult {
    /// Oracle claim AND deterministic re-check of the refined draft.
    pub is_valid: bool,
    /// What the oracle claimed on its own.
    pub self_reported_valid: bool,
    pub issues: Vec<String>,
    pub summary: String,
    pub compliance_after: ComplianceResult,
}

/// Terminal classification of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineOutcome {
    /// Loop succeeded and the contract gate passed.
    Accepted,
    /// The contract gate refused the draft.
    Rejected,
    /// The loop ran out of iterations; the artifact is an unvalidated best effort.
    Exhausted,
}

/// The only value that escapes a pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub accepted: bool,
    pub outcome: PipelineOutcome,
    pub artifact: Option<WorkItemDraft>,
    pub iterations: u32,
    pub rejection_reason: Option<String>,
    pub alignment_issues: Vec<String>,
    pub matched_domain: Option<String>,
    pub compliance: Option<ComplianceResult>,
}

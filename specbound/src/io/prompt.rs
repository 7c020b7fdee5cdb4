//! Prompt rendering for the oracle-backed stages.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, droppable sections go first
//! in a fixed order and the last remaining section is truncated as a last resort.
//! Retry feedback is required and never truncated, so a retried attempt always
//! sees why the previous one was rejected. Empty sections are omitted.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::{ComplianceResult, HardRequirement, WorkItemDraft, WorkItemRequest};

const DRAFT_TEMPLATE: &str = include_str!("prompts/draft.md");
const REFINE_TEMPLATE: &str = include_str!("prompts/refine.md");

/// Drop order when over budget, oldest context first.
const DROP_ORDER: [&str; 3] = ["previous", "requirements", "issues"];

/// Section carrying self-healing diagnostics.
const FEEDBACK_KEY: &str = "feedback";

const TRUNCATION_MARK: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

/// Requirement view exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct RequirementContext<'a> {
    id: &'a str,
    strength: &'static str,
    text: &'a str,
    section: &'a str,
    artifacts: &'a [String],
}

impl<'a> RequirementContext<'a> {
    fn from_requirement(req: &'a HardRequirement) -> Self {
        Self {
            id: &req.id,
            strength: req.strength.as_str(),
            text: &req.text,
            section: &req.source_section,
            artifacts: &req.required_artifacts,
        }
    }
}

/// Inputs for the Draft stage prompt.
#[derive(Debug, Clone)]
pub struct DraftPromptInputs<'a> {
    pub persona: &'a str,
    pub include_estimates: bool,
    pub request: &'a WorkItemRequest,
    pub matched_domain: Option<&'a str>,
    pub requirements: &'a [HardRequirement],
    /// Draft from the previous pass, if any.
    pub previous: Option<&'a WorkItemDraft>,
    /// Issues left open by the previous refinement and compliance check.
    pub issues: &'a [String],
    pub feedback: &'a [String],
}

/// Inputs for the Refine stage prompt.
#[derive(Debug, Clone)]
pub struct RefinePromptInputs<'a> {
    pub persona: &'a str,
    pub include_estimates: bool,
    pub request: &'a WorkItemRequest,
    pub requirements: &'a [HardRequirement],
    pub draft: &'a WorkItemDraft,
    pub compliance: &'a ComplianceResult,
    pub feedback: &'a [String],
}

/// A parsed section of rendered template output.
#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

/// Renders stage prompts within a byte budget.
#[derive(Debug)]
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("draft", DRAFT_TEMPLATE)
            .context("compile draft template")?;
        env.add_template("refine", REFINE_TEMPLATE)
            .context("compile refine template")?;
        Ok(Self { env, budget_bytes })
    }

    pub fn build_draft(&self, input: &DraftPromptInputs<'_>) -> Result<String> {
        let previous = input
            .previous
            .map(serde_json::to_string_pretty)
            .transpose()
            .context("serialize previous draft")?;
        let requirements: Vec<_> = input
            .requirements
            .iter()
            .map(RequirementContext::from_requirement)
            .collect();
        let rendered = self
            .env
            .get_template("draft")?
            .render(context! {
                persona => input.persona,
                include_estimates => input.include_estimates,
                request => input.request,
                domain => input.matched_domain.unwrap_or("none"),
                requirements => requirements,
                previous => previous,
                issues => input.issues,
                feedback => input.feedback,
            })
            .context("render draft prompt")?;
        Ok(self.fit(&rendered))
    }

    pub fn build_refine(&self, input: &RefinePromptInputs<'_>) -> Result<String> {
        let draft =
            serde_json::to_string_pretty(input.draft).context("serialize current draft")?;
        let requirements: Vec<_> = input
            .requirements
            .iter()
            .map(RequirementContext::from_requirement)
            .collect();
        let missing: Vec<_> = input
            .compliance
            .missing_requirements
            .iter()
            .map(RequirementContext::from_requirement)
            .collect();
        let rendered = self
            .env
            .get_template("refine")?
            .render(context! {
                persona => input.persona,
                include_estimates => input.include_estimates,
                request => input.request,
                draft => draft,
                compliant => input.compliance.is_compliant,
                missing => missing,
                missing_artifacts => &input.compliance.missing_artifacts,
                suggestions => &input.compliance.blocking_suggestions,
                requirements => requirements,
                feedback => input.feedback,
            })
            .context("render refine prompt")?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes);
        sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() {
            sections.push(Section {
                key: key.as_str().to_string(),
                required: kind.as_str() == "required",
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[Section]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped = sections.remove(idx);
            debug!(
                section = key,
                bytes_dropped = dropped.content.len(),
                "dropped section for budget"
            );
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(last) = sections.iter_mut().rev().find(|s| s.key != FEEDBACK_KEY) else {
        return;
    };
    let others = total - last.content.len();
    let allowed = budget.saturating_sub(others);
    let before_len = last.content.len();
    if allowed > TRUNCATION_MARK.len() {
        truncate_on_char_boundary(&mut last.content, allowed - TRUNCATION_MARK.len());
        last.content.push_str(TRUNCATION_MARK);
    } else {
        truncate_on_char_boundary(&mut last.content, allowed);
    }
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_on_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::{DEFAULT_LOOKAHEAD_WINDOW, extract_requirements};
    use crate::core::taxonomy::KeywordTaxonomy;
    use std::collections::{BTreeMap, BTreeSet};

    fn request() -> WorkItemRequest {
        WorkItemRequest {
            title: "Implement API endpoint".to_string(),
            description: "Expose orders".to_string(),
            labels: vec!["backend".to_string()],
            grouping: BTreeMap::from([("feature_id".to_string(), "F-1".to_string())]),
        }
    }

    fn requirements() -> Vec<HardRequirement> {
        extract_requirements(
            "# API\nAll APIs MUST return JSON with a `request_id`",
            &KeywordTaxonomy::default(),
            DEFAULT_LOOKAHEAD_WINDOW,
        )
    }

    fn draft() -> WorkItemDraft {
        WorkItemDraft {
            title: "Orders endpoint".to_string(),
            description: "Expose orders".to_string(),
            acceptance_criteria: vec!["Returns XML payload".to_string()],
            ..WorkItemDraft::default()
        }
    }

    /// Verifies draft sections appear in a stable order and carry the request metadata.
    #[test]
    fn draft_prompt_ordering_is_stable() {
        let reqs = requirements();
        let previous = draft();
        let issues = vec!["criteria contradict REQ-001".to_string()];
        let feedback = vec!["attempt 1 failed".to_string()];
        let prompt = PromptBuilder::new(40_000)
            .expect("builder")
            .build_draft(&DraftPromptInputs {
                persona: "senior product owner",
                include_estimates: false,
                request: &request(),
                matched_domain: Some("api"),
                requirements: &reqs,
                previous: Some(&previous),
                issues: &issues,
                feedback: &feedback,
            })
            .expect("render");

        let contract = prompt.find("### Drafting Contract").expect("contract");
        let req = prompt.find("### Request").expect("request");
        let hard = prompt.find("### Hard Requirements").expect("requirements");
        let prev = prompt.find("### Previous Draft").expect("previous");
        let open = prompt.find("### Open Issues").expect("issues");
        let retry = prompt.find("### Retry Feedback").expect("feedback");
        assert!(contract < req && req < hard && hard < prev && prev < open && open < retry);

        assert!(prompt.contains("senior product owner"));
        assert!(prompt.contains("- feature_id: F-1"));
        assert!(prompt.contains("REQ-001 [MUST] All APIs MUST return JSON"));
        assert!(prompt.contains("artifacts: request_id"));
        assert!(prompt.contains("Set `estimate` to null."));
        assert!(!prompt.contains("<!-- section:"));
    }

    /// Verifies empty optional sections are omitted entirely.
    #[test]
    fn first_draft_omits_empty_sections() {
        let prompt = PromptBuilder::new(40_000)
            .expect("builder")
            .build_draft(&DraftPromptInputs {
                persona: "analyst",
                include_estimates: true,
                request: &WorkItemRequest::default(),
                matched_domain: None,
                requirements: &[],
                previous: None,
                issues: &[],
                feedback: &[],
            })
            .expect("render");
        assert!(prompt.contains("No hard requirements apply"));
        assert!(prompt.contains("story points"));
        assert!(!prompt.contains("### Previous Draft"));
        assert!(!prompt.contains("### Retry Feedback"));
    }

    /// Verifies refine prompts list the deterministic findings.
    #[test]
    fn refine_prompt_lists_findings() {
        let reqs = requirements();
        let compliance = ComplianceResult::new(
            reqs.clone(),
            BTreeSet::from(["request_id".to_string()]),
            vec![
                "REQ-001 (API, line 2): criteria specify XML but the requirement demands JSON"
                    .to_string(),
            ],
            Some("api".to_string()),
        );
        let prompt = PromptBuilder::new(40_000)
            .expect("builder")
            .build_refine(&RefinePromptInputs {
                persona: "reviewer",
                include_estimates: false,
                request: &request(),
                requirements: &reqs,
                draft: &draft(),
                compliance: &compliance,
                feedback: &[],
            })
            .expect("render");
        assert!(prompt.contains("### Compliance Findings"));
        assert!(prompt.contains("unmet REQ-001"));
        assert!(prompt.contains("missing artifacts: request_id"));
        assert!(prompt.contains("demands JSON"));
        assert!(prompt.contains("Returns XML payload"));
    }

    /// Verifies the budget drops stale context first and keeps required sections.
    #[test]
    fn budget_drops_droppable_sections_first() {
        let reqs = requirements();
        let mut previous = draft();
        previous.description = "old description ".repeat(100);
        let feedback = vec!["fix the schema".to_string()];
        let builder = PromptBuilder::new(1_400).expect("builder");
        let prompt = builder
            .build_draft(&DraftPromptInputs {
                persona: "senior product owner",
                include_estimates: false,
                request: &request(),
                matched_domain: Some("api"),
                requirements: &reqs,
                previous: Some(&previous),
                issues: &[],
                feedback: &feedback,
            })
            .expect("render");
        assert!(!prompt.contains("### Previous Draft"), "previous should be dropped");
        assert!(prompt.contains("### Retry Feedback"), "feedback should survive");
        assert!(prompt.contains("### Drafting Contract"));
        assert!(prompt.contains("### Hard Requirements"));
    }

    /// Verifies retry feedback survives when required sections alone exceed the budget.
    #[test]
    fn feedback_survives_an_undersized_budget() {
        let reqs = requirements();
        let mut long_request = request();
        long_request.description = "orders ".repeat(200);
        let feedback = vec!["attempt 1/3 was rejected: output is not valid JSON".to_string()];
        let prompt = PromptBuilder::new(600)
            .expect("builder")
            .build_draft(&DraftPromptInputs {
                persona: "senior product owner",
                include_estimates: false,
                request: &long_request,
                matched_domain: Some("api"),
                requirements: &reqs,
                previous: Some(&draft()),
                issues: &["criteria contradict REQ-001".to_string()],
                feedback: &feedback,
            })
            .expect("render");
        assert!(prompt.contains("### Retry Feedback"));
        assert!(prompt.contains("attempt 1/3 was rejected: output is not valid JSON"));
        assert!(prompt.contains("### Drafting Contract"));
        assert!(!prompt.contains("### Previous Draft"));
        assert!(!prompt.contains("### Open Issues"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut text = "ééééé".to_string();
        truncate_on_char_boundary(&mut text, 3);
        assert_eq!(text, "é");
    }
}

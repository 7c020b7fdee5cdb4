//! Final deterministic gate applied to the loop's last draft.
//!
//! The gate only ever refuses. A draft that reaches it is sanitized, checked
//! for required fields, screened for forbidden capabilities in its subject and
//! screened for drift away from the original request.

use serde_json::Value;

use crate::core::types::{WorkItemDraft, WorkItemRequest};

/// Policy applied by [`enforce_contract`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractPolicy {
    /// Capabilities that must never appear in an accepted artifact.
    pub forbidden_terms: Vec<String>,
    /// Keep the draft's estimate; otherwise it is cleared.
    pub include_estimates: bool,
}

/// Verdict of the contract gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractVerdict {
    pub accepted: bool,
    /// Sanitized draft, returned whether or not it was accepted.
    pub artifact: WorkItemDraft,
    pub missing_fields: Vec<String>,
    /// Alignment and drift findings, each naming the offending term.
    pub alignment_issues: Vec<String>,
    pub rejection_reason: Option<String>,
}

/// Apply the contract to `draft`, produced for `request`.
pub fn enforce_contract(
    draft: &WorkItemDraft,
    request: &WorkItemRequest,
    policy: &ContractPolicy,
) -> ContractVerdict {
    let artifact = sanitize(draft, policy.include_estimates);
    let missing_fields = missing_fields(&artifact, request);

    let mut alignment_issues = alignment_issues(&artifact, &policy.forbidden_terms);
    alignment_issues.extend(drift_issues(&artifact, request, &policy.forbidden_terms));

    let mut reasons = Vec::new();
    if !missing_fields.is_empty() {
        reasons.push(format!("missing required fields: {}", missing_fields.join(", ")));
    }
    if !alignment_issues.is_empty() {
        reasons.push(format!("alignment violation: {}", alignment_issues.join("; ")));
    }

    ContractVerdict {
        accepted: reasons.is_empty(),
        artifact,
        missing_fields,
        alignment_issues,
        rejection_reason: (!reasons.is_empty()).then(|| reasons.join("; ")),
    }
}

/// Trim text fields, drop blank criteria and clear unrequested estimates.
pub fn sanitize(draft: &WorkItemDraft, include_estimates: bool) -> WorkItemDraft {
    WorkItemDraft {
        title: draft.title.trim().to_string(),
        description: draft.description.trim().to_string(),
        acceptance_criteria: draft
            .acceptance_criteria
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect(),
        estimate: if include_estimates { draft.estimate } else { None },
        metadata: draft.metadata.clone(),
    }
}

fn missing_fields(draft: &WorkItemDraft, request: &WorkItemRequest) -> Vec<String> {
    let mut missing = Vec::new();
    if draft.title.is_empty() {
        missing.push("title".to_string());
    }
    if draft.description.is_empty() {
        missing.push("description".to_string());
    }
    if draft.acceptance_criteria.is_empty() {
        missing.push("acceptance_criteria".to_string());
    }
    for (key, expected) in &request.grouping {
        match draft.metadata.get(key) {
            Some(Value::String(actual)) if actual == expected => {}
            Some(other) => missing.push(format!(
                "metadata.{key} (expected \"{expected}\", found {other})"
            )),
            None => missing.push(format!("metadata.{key}")),
        }
    }
    missing
}

fn alignment_issues(draft: &WorkItemDraft, forbidden_terms: &[String]) -> Vec<String> {
    let title = draft.title.to_lowercase();
    let description = draft.description.to_lowercase();
    let mut issues = Vec::new();
    for (term, original) in normalized(forbidden_terms) {
        if title.contains(&term) {
            issues.push(format!("forbidden capability '{original}' appears in title"));
        }
        if description.contains(&term) {
            issues.push(format!(
                "forbidden capability '{original}' appears in description"
            ));
        }
    }
    issues
}

fn drift_issues(
    draft: &WorkItemDraft,
    request: &WorkItemRequest,
    forbidden_terms: &[String],
) -> Vec<String> {
    let requested = request.subject().to_lowercase();
    let mut produced = draft.subject().to_lowercase();
    for criterion in &draft.acceptance_criteria {
        produced.push('\n');
        produced.push_str(&criterion.to_lowercase());
    }

    normalized(forbidden_terms)
        .filter(|(term, _)| produced.contains(term) && !requested.contains(term))
        .map(|(_, original)| {
            format!("drift: '{original}' introduced by generation but absent from the request")
        })
        .collect()
}

/// Lower-cased non-blank terms paired with their trimmed original spelling.
fn normalized(terms: &[String]) -> impl Iterator<Item = (String, &str)> {
    terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| (t.to_lowercase(), t))
}

//! Deterministic acceptance-criteria compliance checks.
//!
//! Rules, per bound requirement:
//! - explicit artifacts: at least one must be named in the criteria;
//! - otherwise concept coverage: enough of the requirement's technical terms
//!   must appear as whole words, or parts of compound words, in the criteria;
//! - a wire format demanded by the requirement must not be contradicted by a
//!   different format in the criteria.
//!
//! Independently every criterion is screened for vague phrasing. Findings are
//! data; nothing here fails.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::binder::BoundRequirements;
use crate::core::types::{ComplianceResult, HardRequirement};

/// Minimum share of a requirement's technical terms the criteria must mention.
pub const DEFAULT_COVERAGE_THRESHOLD: f64 = 0.30;

const MIN_TERM_LETTERS: usize = 4;

const STOP_WORDS: &[&str] = &[
    // obligation keywords
    "must", "shall", "should", "required", "require", "requires", "always", "never", "optional",
    // common words
    "that", "this", "with", "from", "have", "been", "will", "into", "each", "every", "when",
    "where", "which", "while", "their", "there", "these", "those", "they", "them", "than",
    "then", "also", "only", "other", "such", "some", "more", "most", "could", "would", "about",
    "after", "before", "over", "under", "between", "within", "without", "through", "being",
    "does", "done", "make", "made", "able", "using", "used", "unless", "upon", "what", "your",
    "ours", "very", "just", "like", "same", "both", "either", "neither", "least", "case",
    "cases", "item", "items", "given",
];

const WIRE_FORMATS: &[&str] = &["json", "xml", "yaml", "csv", "protobuf"];

struct ConceptAdvice {
    patterns: &'static [&'static str],
    advice: &'static str,
}

const CONCEPT_ADVICE: &[ConceptAdvice] = &[
    ConceptAdvice {
        patterns: &["event-sourced", "event sourced", "event sourcing"],
        advice: "add a criterion proving every state change is appended to the event stream and state can be rebuilt by replay",
    },
    ConceptAdvice {
        patterns: &["checkpoint"],
        advice: "add a criterion covering checkpoint creation and resuming from the latest checkpoint",
    },
    ConceptAdvice {
        patterns: &["provenance"],
        advice: "add a criterion verifying provenance (source, actor, timestamp) is recorded for every change",
    },
    ConceptAdvice {
        patterns: &["immutable revision", "immutable"],
        advice: "add a criterion verifying existing revisions are never modified in place",
    },
    ConceptAdvice {
        patterns: &["idempotent"],
        advice: "add a criterion showing a repeated submission produces the same result",
    },
    ConceptAdvice {
        patterns: &["audit"],
        advice: "add a criterion verifying an audit entry is written for each operation",
    },
];

struct VaguePhrase {
    pattern: Regex,
    label: &'static str,
    advice: &'static str,
}

static VAGUE_PHRASES: LazyLock<Vec<VaguePhrase>> = LazyLock::new(|| {
    [
        (
            r"(?i)\bworks?\s+correctly\b",
            "works correctly",
            "state the observable result that shows it works",
        ),
        (r"(?i)\buser\s+can\s+see\b", "user can see", "name exactly what is displayed and where"),
        (
            r"(?i)\bsuccessfully\s*[.!]?\s*$",
            "successfully",
            "say what success looks like (status, output or state change)",
        ),
        (r"(?i)\bas\s+expected\b", "as expected", "spell out the expected result"),
        (r"(?i)\bproperly\b", "properly", "replace with a measurable condition"),
        (r"(?i)\bshould\s+work\b", "should work", "describe the verifiable behaviour"),
        (r"(?i)\buser[-\s]friendly\b", "user-friendly", "give a concrete usability criterion"),
        (
            r"(?i)\bhandles?\s+(?:all\s+)?errors\b",
            "handles errors",
            "list the error conditions and the expected response to each",
        ),
        (r"(?i)\betc\b", "etc.", "enumerate the remaining cases explicitly"),
    ]
    .into_iter()
    .map(|(pattern, label, advice)| VaguePhrase {
        pattern: Regex::new(pattern).unwrap(),
        label,
        advice,
    })
    .collect()
});

/// Check `criteria` against the requirements bound to the work item.
///
/// No bound requirements means nothing to violate: the result is compliant
/// without further screening. Bound requirements with no criteria at all are
/// unconditionally non-compliant.
pub fn check_compliance(
    criteria: &[String],
    bound: &BoundRequirements,
    coverage_threshold: f64,
) -> ComplianceResult {
    let matched_domain = bound.matched_domain().map(str::to_string);
    if bound.requirements.is_empty() {
        return ComplianceResult::compliant(matched_domain);
    }

    let criteria: Vec<&str> = criteria
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();

    let mut missing_requirements = Vec::new();
    let mut missing_artifacts = BTreeSet::new();
    let mut suggestions = Vec::new();

    if criteria.is_empty() {
        for req in &bound.requirements {
            missing_artifacts.extend(req.required_artifacts.iter().cloned());
        }
        missing_requirements.extend(bound.requirements.iter().cloned());
        suggestions.push(format!(
            "no acceptance criteria provided; add criteria covering {} bound requirement(s) ({})",
            bound.requirements.len(),
            bound
                .requirements
                .iter()
                .map(|r| r.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
        return ComplianceResult::new(
            missing_requirements,
            missing_artifacts,
            suggestions,
            matched_domain,
        );
    }

    let joined = criteria.join("\n").to_lowercase();
    let criteria_words = word_set(&joined);

    for req in &bound.requirements {
        if let Some(suggestion) = format_contradiction(req, &criteria_words) {
            missing_requirements.push(req.clone());
            suggestions.push(suggestion);
            continue;
        }

        if !req.required_artifacts.is_empty() {
            let present = req
                .required_artifacts
                .iter()
                .any(|artifact| joined.contains(&artifact.to_lowercase()));
            if !present {
                missing_artifacts.extend(req.required_artifacts.iter().cloned());
                missing_requirements.push(req.clone());
                suggestions.push(format!(
                    "{} ({}): add an acceptance criterion referencing {}; required by \"{}\"",
                    req.id,
                    origin(req),
                    req.required_artifacts
                        .iter()
                        .map(|a| format!("`{a}`"))
                        .collect::<Vec<_>>()
                        .join(" or "),
                    req.text
                ));
            }
            continue;
        }

        let terms = technical_terms(&req.text);
        if terms.is_empty() {
            continue;
        }
        let covered = terms
            .iter()
            .filter(|t| criteria_words.contains(t.as_str()))
            .count();
        let coverage = covered as f64 / terms.len() as f64;
        if coverage < coverage_threshold {
            missing_requirements.push(req.clone());
            suggestions.push(concept_suggestion(req));
        }
    }

    for (idx, criterion) in criteria.iter().enumerate() {
        for vague in VAGUE_PHRASES.as_slice() {
            if vague.pattern.is_match(criterion) {
                suggestions.push(format!(
                    "criterion {} \"{}\" is vague ('{}'): {}",
                    idx + 1,
                    criterion,
                    vague.label,
                    vague.advice
                ));
            }
        }
    }

    ComplianceResult::new(
        missing_requirements,
        missing_artifacts,
        suggestions,
        matched_domain,
    )
}

/// Technical terms of `text`: words of at least four letters that are not
/// common words, in first-seen order.
pub fn technical_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in words(&text.to_lowercase()) {
        let letters = word.chars().filter(|c| c.is_alphabetic()).count();
        if letters < MIN_TERM_LETTERS || STOP_WORDS.contains(&word) {
            continue;
        }
        if !terms.iter().any(|t| t == word) {
            terms.push(word.to_string());
        }
    }
    terms
}

fn words(lowered: &str) -> impl Iterator<Item = &str> {
    lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .map(|w| w.trim_matches('-'))
        .filter(|w| !w.is_empty())
}

/// Whole words plus the parts of hyphenated or underscored compounds, so
/// `json-formatted` also counts as `json`.
fn word_set(lowered: &str) -> BTreeSet<&str> {
    let mut set = BTreeSet::new();
    for word in words(lowered) {
        set.insert(word);
        set.extend(word.split(['-', '_']).filter(|part| !part.is_empty()));
    }
    set
}

/// A positive requirement demanding one wire format while the criteria only
/// name a different one.
fn format_contradiction(req: &HardRequirement, criteria_words: &BTreeSet<&str>) -> Option<String> {
    if req.strength.is_negative() {
        return None;
    }
    let lowered = req.text.to_lowercase();
    let req_words = word_set(&lowered);
    let demanded: Vec<&str> = WIRE_FORMATS
        .iter()
        .copied()
        .filter(|f| req_words.contains(f))
        .collect();
    if demanded.is_empty() || demanded.iter().any(|f| criteria_words.contains(f)) {
        return None;
    }
    let offered: Vec<&str> = WIRE_FORMATS
        .iter()
        .copied()
        .filter(|f| criteria_words.contains(f))
        .collect();
    if offered.is_empty() {
        return None;
    }
    Some(format!(
        "{} ({}): criteria specify {} but the requirement demands {}: \"{}\"",
        req.id,
        origin(req),
        offered.join("/").to_uppercase(),
        demanded.join("/").to_uppercase(),
        req.text
    ))
}

fn concept_suggestion(req: &HardRequirement) -> String {
    let lowered = req.text.to_lowercase();
    let advice = CONCEPT_ADVICE
        .iter()
        .find(|entry| entry.patterns.iter().any(|p| lowered.contains(p)));
    match advice {
        Some(entry) => format!(
            "{} ({}): {}; requirement: \"{}\"",
            req.id,
            origin(req),
            entry.advice,
            req.text
        ),
        None => format!(
            "{} ({}): add a criterion that addresses \"{}\"",
            req.id,
            origin(req),
            req.text
        ),
    }
}

fn origin(req: &HardRequirement) -> String {
    if req.source_section.is_empty() {
        format!("line {}", req.line_number)
    } else {
        format!("{}, line {}", req.source_section, req.line_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::binder::bind_requirements;
    use crate::core::extractor::{DEFAULT_LOOKAHEAD_WINDOW, extract_requirements};
    use crate::core::taxonomy::KeywordTaxonomy;

    fn bound_for(spec: &str, descriptor: &str) -> BoundRequirements {
        let taxonomy = KeywordTaxonomy::default();
        let reqs = extract_requirements(spec, &taxonomy, DEFAULT_LOOKAHEAD_WINDOW);
        bind_requirements(descriptor, &reqs, &taxonomy)
    }

    fn criteria(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn assert_invariant(result: &ComplianceResult) {
        assert_eq!(
            result.is_compliant,
            result.missing_requirements.is_empty() && result.blocking_suggestions.is_empty()
        );
    }

    #[test]
    fn json_requirement_rejects_xml_criteria() {
        let bound = bound_for("All APIs MUST return JSON", "Implement API endpoint");
        let result = check_compliance(
            &criteria(&["Returns XML payload"]),
            &bound,
            DEFAULT_COVERAGE_THRESHOLD,
        );
        assert!(!result.is_compliant);
        assert_eq!(result.matched_domain.as_deref(), Some("api"));
        assert_eq!(result.missing_requirements.len(), 1);
        assert!(
            result
                .blocking_suggestions
                .iter()
                .any(|s| s.contains("XML") && s.contains("JSON"))
        );
        assert_invariant(&result);
    }

    #[test]
    fn json_requirement_accepts_covering_criteria() {
        let bound = bound_for("All APIs MUST return JSON", "Implement API endpoint");
        let result = check_compliance(
            &criteria(&["GET /orders must return JSON with status 200"]),
            &bound,
            DEFAULT_COVERAGE_THRESHOLD,
        );
        assert!(result.is_compliant, "{result:?}");
        assert_invariant(&result);
    }

    #[test]
    fn hyphenated_format_counts_as_coverage() {
        let bound = bound_for("All APIs MUST return JSON", "Implement API endpoint");
        let result = check_compliance(
            &criteria(&["The endpoint responds with a JSON-formatted body"]),
            &bound,
            DEFAULT_COVERAGE_THRESHOLD,
        );
        assert!(result.is_compliant, "{result:?}");
        assert_invariant(&result);
    }

    #[test]
    fn hyphenated_conflicting_format_is_a_contradiction() {
        let bound = bound_for("All APIs MUST return JSON", "Implement API endpoint");
        let result = check_compliance(
            &criteria(&["Responses carry an XML-encoded body"]),
            &bound,
            DEFAULT_COVERAGE_THRESHOLD,
        );
        assert!(!result.is_compliant);
        assert!(
            result
                .blocking_suggestions
                .iter()
                .any(|s| s.contains("criteria specify XML"))
        );
        assert_invariant(&result);
    }

    #[test]
    fn empty_bound_set_is_compliant() {
        let bound = bound_for("", "Anything at all");
        let result = check_compliance(&criteria(&["works correctly"]), &bound, 0.3);
        assert!(result.is_compliant);
        assert_eq!(result.matched_domain, None);
        assert_invariant(&result);
    }

    #[test]
    fn empty_criteria_with_bound_requirements_fail() {
        let bound = bound_for(
            "Every revision MUST record a content_hash.",
            "Store document revision",
        );
        assert!(!bound.is_empty());
        let result = check_compliance(&criteria(&["   "]), &bound, 0.3);
        assert!(!result.is_compliant);
        assert!(result.missing_artifacts.contains("content_hash"));
        assert!(result.blocking_suggestions[0].contains("no acceptance criteria"));
        assert_invariant(&result);
    }

    #[test]
    fn explicit_artifacts_are_matched_case_insensitively() {
        let bound = bound_for(
            "# Revisions\nEvery revision MUST record a content_hash.",
            "Store document revision",
        );

        let ok = check_compliance(
            &criteria(&["Saving a revision stores its CONTENT_HASH alongside the body"]),
            &bound,
            0.3,
        );
        assert!(ok.is_compliant, "{ok:?}");

        let missing = check_compliance(
            &criteria(&["Saving a revision stores the body"]),
            &bound,
            0.3,
        );
        assert!(!missing.is_compliant);
        assert!(missing.missing_artifacts.contains("content_hash"));
        assert!(missing.blocking_suggestions[0].contains("Revisions, line 2"));
        assert!(missing.blocking_suggestions[0].contains("`content_hash`"));
    }

    #[test]
    fn concept_gaps_use_phrase_specific_advice() {
        let bound = bound_for(
            "Projections SHALL resume from the latest checkpoint after restart.",
            "Rebuild projection workers",
        );
        let result = check_compliance(
            &criteria(&["Workers display a banner on the admin page"]),
            &bound,
            0.3,
        );
        assert!(!result.is_compliant);
        assert!(
            result.blocking_suggestions[0].contains("checkpoint creation"),
            "{:?}",
            result.blocking_suggestions
        );
    }

    #[test]
    fn coverage_threshold_is_configurable() {
        let bound = bound_for(
            "Projections SHALL resume from the latest checkpoint after restart.",
            "Rebuild projection workers",
        );
        // terms: projections, resume, latest, checkpoint, restart -> one of five covered
        let items = criteria(&["A checkpoint is written every minute"]);
        assert!(check_compliance(&items, &bound, 0.2).is_compliant);
        assert!(!check_compliance(&items, &bound, 0.3).is_compliant);
    }

    #[test]
    fn vague_criteria_are_flagged() {
        let bound = bound_for("All APIs MUST return JSON", "Implement API endpoint");
        let result = check_compliance(
            &criteria(&[
                "Endpoint returns JSON for valid requests",
                "The endpoint works correctly",
                "User can see the response",
                "Request is processed successfully.",
            ]),
            &bound,
            DEFAULT_COVERAGE_THRESHOLD,
        );
        assert!(!result.is_compliant);
        assert!(result.missing_requirements.is_empty());
        assert_eq!(result.blocking_suggestions.len(), 3);
        assert!(result.blocking_suggestions[0].contains("criterion 2"));
        assert!(result.blocking_suggestions[2].contains("'successfully'"));
        assert_invariant(&result);
    }

    #[test]
    fn qualified_successfully_is_not_vague() {
        let bound = bound_for("All APIs MUST return JSON", "Implement API endpoint");
        let result = check_compliance(
            &criteria(&["Upload completes successfully with a JSON receipt"]),
            &bound,
            DEFAULT_COVERAGE_THRESHOLD,
        );
        assert!(result.is_compliant, "{result:?}");
    }

    #[test]
    fn technical_terms_skip_short_and_common_words() {
        assert_eq!(
            technical_terms("All APIs MUST return JSON and they must be fast"),
            vec!["apis".to_string(), "return".to_string(), "json".to_string(), "fast".to_string()]
        );
    }
}

//! Requirement extraction from markdown-like specification text.
//!
//! A single pass over the text turns every line carrying an RFC-2119 obligation
//! keyword into a [`HardRequirement`]. Extraction is pure and positional: the
//! same text always yields the same list with the same ids.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::taxonomy::KeywordTaxonomy;
use crate::core::types::{HardRequirement, Strength};

/// Lines examined after a requirement ending in `:`.
pub const DEFAULT_LOOKAHEAD_WINDOW: usize = 10;

/// Strength patterns in priority order. Negatives precede their positive
/// forms so "must not" is never read as "must".
static STRENGTH_PATTERNS: LazyLock<Vec<(Strength, Regex)>> = LazyLock::new(|| {
    [
        (Strength::MustNot, r"(?i)\bmust(?:\s+not\b|n['’]t\b)"),
        (Strength::ShallNot, r"(?i)\bshall(?:\s+not\b|n['’]t\b)"),
        (Strength::Never, r"(?i)\bnever\b"),
        (Strength::Must, r"(?i)\bmust\b"),
        (Strength::Shall, r"(?i)\bshall\b"),
        (Strength::Required, r"(?i)\brequired\b"),
        (Strength::Always, r"(?i)\balways\b"),
    ]
    .into_iter()
    .map(|(strength, pattern)| (strength, Regex::new(pattern).unwrap()))
    .collect()
});

static VERSIONED_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9][A-Za-z0-9_\-]*[._\-]v\d+(?:\.\d+)*\.[A-Za-z][A-Za-z0-9]*\b").unwrap()
});

static BACKTICK_IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([a-z][a-z0-9]*(?:_[a-z0-9]+)+)`").unwrap());

static FIELD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-z][a-z0-9]*(?:_[a-z0-9]+)*_(?:hash|sha256|checksum|digest|version)\b")
        .unwrap()
});

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+]|\d+[.)])\s+").unwrap());

/// Extract hard requirements from `spec_text`.
///
/// Empty text yields an empty list. Headers (`#`) set the source section of
/// the lines that follow; comment blocks and fenced code are skipped.
pub fn extract_requirements(
    spec_text: &str,
    taxonomy: &KeywordTaxonomy,
    lookahead_window: usize,
) -> Vec<HardRequirement> {
    let lines: Vec<&str> = spec_text.lines().collect();
    let mut requirements = Vec::new();
    let mut section = String::new();
    let mut in_comment = false;
    let mut in_fence = false;

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();

        if in_comment {
            if line.contains("-->") {
                in_comment = false;
            }
            continue;
        }
        if line.starts_with("```") || line.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || line.is_empty() || line.starts_with("//") {
            continue;
        }
        if line.starts_with("<!--") {
            in_comment = !line.contains("-->");
            continue;
        }
        if line.starts_with('#') {
            section = line.trim_start_matches('#').trim().to_string();
            continue;
        }

        let Some(strength) = detect_strength(line) else {
            continue;
        };

        let text = strip_bullet(line).to_string();
        let lowered = line.to_lowercase();
        let mut domain_keywords = taxonomy.keywords_in(&lowered);
        let mut required_artifacts = Vec::new();
        collect_artifacts(line, &mut required_artifacts);

        if line.ends_with(':') {
            fold_bullets(
                &lines[idx + 1..],
                lookahead_window,
                taxonomy,
                &mut domain_keywords,
                &mut required_artifacts,
            );
        }

        requirements.push(HardRequirement {
            id: format!("REQ-{:03}", requirements.len() + 1),
            text,
            strength,
            domain_keywords,
            required_artifacts,
            source_section: section.clone(),
            line_number: idx + 1,
        });
    }

    requirements
}

/// First strength pattern (in priority order) that matches `line`.
pub fn detect_strength(line: &str) -> Option<Strength> {
    STRENGTH_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(line))
        .map(|(strength, _)| *strength)
}

/// Append structural artifact names found in `line`, keeping first-seen order.
pub fn collect_artifacts(line: &str, out: &mut Vec<String>) {
    let mut push = |candidate: &str| {
        if !out.iter().any(|existing| existing == candidate) {
            out.push(candidate.to_string());
        }
    };

    for m in VERSIONED_FILE_RE.find_iter(line) {
        push(m.as_str());
    }
    for caps in BACKTICK_IDENT_RE.captures_iter(line) {
        if let Some(ident) = caps.get(1) {
            push(ident.as_str());
        }
    }
    for m in FIELD_NAME_RE.find_iter(line) {
        push(m.as_str());
    }
}

fn fold_bullets(
    following: &[&str],
    window: usize,
    taxonomy: &KeywordTaxonomy,
    keywords: &mut BTreeSet<String>,
    artifacts: &mut Vec<String>,
) {
    for raw in following.iter().take(window) {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || !is_bullet(line) {
            break;
        }
        keywords.extend(taxonomy.keywords_in(&line.to_lowercase()));
        collect_artifacts(line, artifacts);
    }
}

fn is_bullet(line: &str) -> bool {
    BULLET_RE.is_match(line)
}

fn strip_bullet(line: &str) -> &str {
    match BULLET_RE.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

//! Domain binding: pick the domain a work item belongs to and the requirements
//! that apply to it.

use crate::core::taxonomy::KeywordTaxonomy;
use crate::core::types::{DomainBinding, HardRequirement};

/// Requirements bound to one work item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundRequirements {
    /// `None` when no domain scored above zero.
    pub binding: Option<DomainBinding>,
    pub requirements: Vec<HardRequirement>,
}

impl BoundRequirements {
    pub fn matched_domain(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.domain_name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// Bind `requirements` to the work item described by `descriptor`.
///
/// Each domain is scored by how many of its keywords occur as substrings of the
/// lower-cased descriptor. The highest score wins; ties go to the domain listed
/// first in the taxonomy. A descriptor matching no domain binds nothing, which
/// makes generic items compliant by default.
pub fn bind_requirements(
    descriptor: &str,
    requirements: &[HardRequirement],
    taxonomy: &KeywordTaxonomy,
) -> BoundRequirements {
    let lowered = descriptor.to_lowercase();

    let mut best: Option<(usize, usize)> = None;
    for (idx, domain) in taxonomy.domains().iter().enumerate() {
        let score = domain
            .keywords
            .iter()
            .filter(|k| !k.is_empty() && lowered.contains(k.as_str()))
            .count();
        // Strict comparison keeps the earlier domain on ties.
        if score > 0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((idx, score));
        }
    }

    let Some((idx, _)) = best else {
        return BoundRequirements::default();
    };
    let domain = &taxonomy.domains()[idx];
    let domain_keywords = domain.keyword_set();

    let trigger_keywords = domain_keywords
        .iter()
        .filter(|k| lowered.contains(k.as_str()))
        .cloned()
        .collect();

    let bound: Vec<HardRequirement> = requirements
        .iter()
        .filter(|req| !req.domain_keywords.is_disjoint(&domain_keywords))
        .cloned()
        .collect();

    BoundRequirements {
        binding: Some(DomainBinding {
            domain_name: domain.name.clone(),
            trigger_keywords,
            bound_requirement_ids: bound.iter().map(|r| r.id.clone()).collect(),
        }),
        requirements: bound,
    }
}

//! Keyword taxonomy mapping domains to trigger keywords.
//!
//! Domain order is significant: it is the priority list used to break ties
//! when two domains score equally during binding.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One domain and the lower-case keywords that signal it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    pub keywords: Vec<String>,
}

impl Domain {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn keyword_set(&self) -> BTreeSet<String> {
        self.keywords.iter().cloned().collect()
    }
}

/// Ordered domain list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordTaxonomy {
    domains: Vec<Domain>,
}

impl KeywordTaxonomy {
    pub fn new(domains: Vec<Domain>) -> Self {
        let domains = domains
            .into_iter()
            .map(|d| Domain {
                keywords: d.keywords.iter().map(|k| k.trim().to_lowercase()).collect(),
                name: d.name,
            })
            .collect();
        Self { domains }
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn domain(&self, name: &str) -> Option<&Domain> {
        self.domains.iter().find(|d| d.name == name)
    }

    /// Every keyword that occurs as a substring of `lowered`, across all domains.
    pub fn keywords_in(&self, lowered: &str) -> BTreeSet<String> {
        self.domains
            .iter()
            .flat_map(|d| d.keywords.iter())
            .filter(|k| !k.is_empty() && lowered.contains(k.as_str()))
            .cloned()
            .collect()
    }
}

impl Default for KeywordTaxonomy {
    fn default() -> Self {
        Self::new(vec![
            Domain::new(
                "revision_control",
                &[
                    "revision",
                    "versioning",
                    "immutable",
                    "history",
                    "provenance",
                    "lineage",
                    "audit",
                ],
            ),
            Domain::new(
                "event_sourcing",
                &[
                    "event-sourced",
                    "event log",
                    "event stream",
                    "replay",
                    "projection",
                    "checkpoint",
                ],
            ),
            Domain::new(
                "ingestion",
                &["ingest", "upload", "import", "parser", "document", "attachment"],
            ),
            Domain::new(
                "api",
                &["api", "endpoint", "json", "http", "webhook", "graphql"],
            ),
            Domain::new(
                "security",
                &[
                    "auth",
                    "oauth",
                    "token",
                    "permission",
                    "credential",
                    "encrypt",
                    "secret",
                ],
            ),
            Domain::new(
                "storage",
                &["storage", "database", "persist", "migration", "cache", "backup"],
            ),
            Domain::new(
                "reporting",
                &["report", "export", "dashboard", "metric", "html"],
            ),
        ])
    }
}

//! Pipeline configuration stored in `specbound.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::compliance::DEFAULT_COVERAGE_THRESHOLD;
use crate::core::extractor::DEFAULT_LOOKAHEAD_WINDOW;
use crate::core::taxonomy::{Domain, KeywordTaxonomy};

/// Pipeline configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on Draft/Validate/Refine passes per work item.
    pub max_iterations: u32,

    /// Dotted path into the run state that ends the loop when `true`.
    pub exit_condition: String,

    /// Voice the oracle is asked to write in.
    pub persona: String,

    /// Keep oracle estimates on accepted artifacts.
    pub include_estimates: bool,

    /// Capabilities an accepted artifact must never mention.
    pub forbidden_terms: Vec<String>,

    pub retries: RetryConfig,
    pub extraction: ExtractionConfig,
    pub compliance: ComplianceConfig,
    pub oracle: OracleConfig,
    pub prompt: PromptConfig,

    /// Replaces the built-in keyword taxonomy when non-empty. Order is priority.
    pub taxonomy: Vec<Domain>,
}

/// Per-stage retry budgets (retries after the first attempt).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub draft: u32,
    pub compliance: u32,
    pub refine: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Lines scanned for bullets after a requirement ending in `:`.
    pub lookahead_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Share of a requirement's technical terms the criteria must mention.
    pub coverage_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Command to spawn per generation call; supports `{output_schema}` and `{output}`.
    pub command: Vec<String>,

    /// Per-call wall-clock budget in seconds.
    pub timeout_secs: u64,

    /// Bytes of oracle stdout/stderr kept in memory.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Maximum prompt size before droppable sections are removed.
    pub budget_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            exit_condition: "last_refinement.is_valid".to_string(),
            persona: "senior product owner".to_string(),
            include_estimates: false,
            forbidden_terms: Vec::new(),
            retries: RetryConfig::default(),
            extraction: ExtractionConfig::default(),
            compliance: ComplianceConfig::default(),
            oracle: OracleConfig::default(),
            prompt: PromptConfig::default(),
            taxonomy: Vec::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            draft: 2,
            compliance: 0,
            refine: 2,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            lookahead_window: DEFAULT_LOOKAHEAD_WINDOW,
        }
    }
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: DEFAULT_COVERAGE_THRESHOLD,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-schema",
                "{output_schema}",
                "--output-last-message",
                "{output}",
                "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 40_000,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.exit_condition.trim().is_empty() {
            return Err(anyhow!("exit_condition must not be empty"));
        }
        let threshold = self.compliance.coverage_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow!(
                "compliance.coverage_threshold must be in (0, 1], got {threshold}"
            ));
        }
        if self.extraction.lookahead_window == 0 {
            return Err(anyhow!("extraction.lookahead_window must be > 0"));
        }
        if self.oracle.command.is_empty() || self.oracle.command[0].trim().is_empty() {
            return Err(anyhow!("oracle.command must be a non-empty array"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        if self.prompt.budget_bytes == 0 {
            return Err(anyhow!("prompt.budget_bytes must be > 0"));
        }
        let mut names = BTreeSet::new();
        for domain in &self.taxonomy {
            if domain.name.trim().is_empty() {
                return Err(anyhow!("taxonomy domain names must not be empty"));
            }
            if !names.insert(domain.name.as_str()) {
                return Err(anyhow!("duplicate taxonomy domain '{}'", domain.name));
            }
            if domain.keywords.iter().all(|k| k.trim().is_empty()) {
                return Err(anyhow!("taxonomy domain '{}' has no keywords", domain.name));
            }
        }
        Ok(())
    }

    /// Configured taxonomy, or the built-in one when none is configured.
    pub fn keyword_taxonomy(&self) -> KeywordTaxonomy {
        if self.taxonomy.is_empty() {
            KeywordTaxonomy::default()
        } else {
            KeywordTaxonomy::new(self.taxonomy.clone())
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::fs_util::write_atomic(path, &buf)
}

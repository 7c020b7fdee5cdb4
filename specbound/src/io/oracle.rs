//! Generation oracle abstraction.
//!
//! The [`GenerationOracle`] trait decouples the pipeline from whatever produces
//! drafts (by default `codex exec`). The oracle is opaque and may fail; the
//! pipeline only ever sees raw text or an [`OracleError`]. Tests use scripted
//! oracles that replay queued responses without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::OracleError;
use crate::io::config::OracleConfig;
use crate::io::process::run_with_timeout;
use crate::stages::Stage;

/// Placeholder replaced with the path of the output schema file.
pub const SCHEMA_PLACEHOLDER: &str = "{output_schema}";
/// Placeholder replaced with the path the oracle must write its answer to.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

const STDERR_TAIL_CHARS: usize = 400;

/// One generation call.
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub stage: Stage,
    /// Rendered prompt, fed to the oracle verbatim.
    pub prompt: &'a str,
    /// JSON Schema the answer must satisfy.
    pub schema: &'a Value,
    /// Zero-based attempt index within the stage's retry budget.
    pub attempt: u32,
}

/// Abstraction over generation backends.
pub trait GenerationOracle {
    /// Produce raw artifact text for `request`.
    fn generate(&self, request: &OracleRequest<'_>) -> Result<String, OracleError>;
}

impl<O: GenerationOracle + ?Sized> GenerationOracle for &O {
    fn generate(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        (**self).generate(request)
    }
}

/// Oracle that spawns a configured command per call.
///
/// `{output_schema}` and `{output}` in the command are replaced with paths in
/// a per-call scratch directory. Without an `{output}` placeholder the answer
/// is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    command: Vec<String>,
    workdir: Option<PathBuf>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(config: &OracleConfig) -> Self {
        Self {
            command: config.command.clone(),
            workdir: None,
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    /// Run the command from `dir` instead of the current directory.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    fn build_command(
        &self,
        schema_path: &Path,
        output_path: &Path,
    ) -> Result<Command, OracleError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| OracleError::Unavailable("oracle command is empty".to_string()))?;
        let mut cmd = Command::new(program);
        for arg in args {
            cmd.arg(
                arg.replace(SCHEMA_PLACEHOLDER, &schema_path.to_string_lossy())
                    .replace(OUTPUT_PLACEHOLDER, &output_path.to_string_lossy()),
            );
        }
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    fn writes_output_file(&self) -> bool {
        self.command.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER))
    }
}

impl GenerationOracle for CommandOracle {
    #[instrument(
        skip_all,
        fields(
            stage = %request.stage,
            attempt = request.attempt,
            timeout_secs = self.timeout.as_secs()
        )
    )]
    fn generate(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        let scratch = tempfile::tempdir()
            .map_err(|err| OracleError::Unavailable(format!("create scratch dir: {err}")))?;
        let schema_path = scratch.path().join("output.schema.json");
        let output_path = scratch.path().join("output.json");

        let mut schema_buf = serde_json::to_string_pretty(request.schema)
            .map_err(|err| OracleError::Unavailable(format!("serialize schema: {err}")))?;
        schema_buf.push('\n');
        fs::write(&schema_path, schema_buf)
            .map_err(|err| OracleError::Unavailable(format!("write schema: {err}")))?;

        let cmd = self.build_command(&schema_path, &output_path)?;
        info!(program = %self.command[0], "invoking oracle");
        let output = run_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| OracleError::Unavailable(format!("{err:#}")))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "oracle timed out");
            return Err(OracleError::Unavailable(format!(
                "timed out after {:?}",
                self.timeout
            )));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "oracle failed");
            return Err(OracleError::Unavailable(format!(
                "exited with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(STDERR_TAIL_CHARS)
            )));
        }

        let text = if self.writes_output_file() {
            if !output_path.exists() {
                return Err(OracleError::MissingOutput(format!(
                    "missing oracle output {}",
                    output_path.display()
                )));
            }
            fs::read_to_string(&output_path).map_err(|err| {
                OracleError::MissingOutput(format!("read {}: {err}", output_path.display()))
            })?
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };

        debug!(bytes = text.len(), "oracle answered");
        Ok(text)
    }
}

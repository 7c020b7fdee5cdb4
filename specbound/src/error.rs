//! Error taxonomy for stage execution and pipeline runs.
//!
//! Content problems (compliance gaps, alignment violations, an exhausted
//! iteration budget) are values on [`crate::core::types::PipelineResult`], not
//! errors. Only malformed oracle output that survives every retry and
//! infrastructure failures travel through these types.

use crate::stages::Stage;

/// Malformed or incomplete oracle output. Recoverable by retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("oracle produced no output")]
    MissingOutput,

    #[error("output is not valid JSON: {0}")]
    Parse(String),

    #[error("output violates schema: {}", .0.join("; "))]
    Violations(Vec<String>),

    #[error("output does not match the expected shape: {0}")]
    Shape(String),
}

/// Failure reported by a [`crate::io::oracle::GenerationOracle`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    /// Spawn failure, timeout or non-zero exit.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// The oracle ran but left nothing to read.
    #[error("oracle produced no output: {0}")]
    MissingOutput(String),
}

/// Failure of a single stage attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Schema(#[from] SchemaValidationError),

    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// A stage ran before the state it reads was written.
    #[error("missing stage input: {0}")]
    MissingStageInput(&'static str),

    #[error("render prompt: {0}")]
    Prompt(String),
}

impl StageError {
    /// Only structural output problems are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Schema(_))
    }
}

impl From<OracleError> for StageError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::Unavailable(detail) => StageError::OracleUnavailable(detail),
            OracleError::MissingOutput(_) => {
                StageError::Schema(SchemaValidationError::MissingOutput)
            }
        }
    }
}

/// Hard failure of a pipeline invocation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("stage {stage} failed after {attempts} attempt(s): {source}")]
    Stage {
        stage: Stage,
        attempts: u32,
        #[source]
        source: StageError,
    },

    #[error("serialize run state: {0}")]
    State(#[from] serde_json::Error),

    #[error("persist accepted artifact: {0:#}")]
    Persist(anyhow::Error),

    #[error("archive run: {0:#}")]
    Archive(anyhow::Error),
}

impl PipelineError {
    /// True when the oracle itself could not be reached.
    pub fn is_oracle_unavailable(&self) -> bool {
        matches!(
            self,
            PipelineError::Stage {
                source: StageError::OracleUnavailable(_),
                ..
            }
        )
    }
}

//! Self-healing execution of a single fallible stage.
//!
//! A stage whose output is structurally wrong is retried with a diagnostic
//! describing the failure, up to a fixed retry budget. Infrastructure failures
//! and wiring bugs are not retried.

use tracing::{debug, instrument, warn};

use crate::error::{PipelineError, StageError};
use crate::stages::RunnableStage;
use crate::state::RunState;

/// Retry wrapper with a fixed budget of retries after the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfHealingExecutor {
    max_retries: u32,
}

impl SelfHealingExecutor {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `stage` until it succeeds or the budget is spent.
    ///
    /// Returns the number of attempts performed. On success the stage feedback
    /// is cleared; on exhaustion the last failure is returned unchanged.
    #[instrument(skip_all, fields(stage = %stage.stage(), max_retries = self.max_retries))]
    pub fn execute<S: RunnableStage + ?Sized>(
        &self,
        stage: &S,
        state: &mut RunState,
    ) -> Result<u32, PipelineError> {
        let total = self.max_retries + 1;
        let mut attempt = 0u32;
        loop {
            match stage.run(state, attempt) {
                Ok(()) => {
                    state.stage_feedback.clear();
                    debug!(attempts = attempt + 1, "stage succeeded");
                    return Ok(attempt + 1);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let message = feedback_message(attempt, total, &err);
                    warn!(attempt = attempt + 1, error = %err, "stage output rejected, retrying");
                    state.retry_history.push(format!("{}: {message}", stage.stage()));
                    state.stage_feedback.push(message);
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempts = attempt + 1, error = %err, "stage failed");
                    return Err(PipelineError::Stage {
                        stage: stage.stage(),
                        attempts: attempt + 1,
                        source: err,
                    });
                }
            }
        }
    }
}

fn feedback_message(attempt: u32, total: u32, err: &StageError) -> String {
    format!(
        "attempt {}/{} was rejected: {err}. Fix the output so it is a single JSON object that satisfies the schema, then answer again.",
        attempt + 1,
        total
    )
}

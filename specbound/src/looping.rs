//! Conditional loop over full passes with a deterministic exit predicate.
//!
//! `DRAFTING -> VALIDATING -> REFINING -> EXIT_CHECK -> {DRAFTING | terminal}`.
//! The predicate is a dotted path into the serialized run state and is only
//! ever read, never re-derived by calling the oracle.

use tracing::{info, instrument};

use crate::core::exit_path::evaluate_exit_path;
use crate::error::PipelineError;
use crate::state::RunState;

/// Reason why [`ConditionalLoopController::run`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The exit condition held after a pass.
    Success,
    /// `max_iterations` passes ran without the exit condition holding.
    Maxed { max_iterations: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub passes: u32,
    pub stop: LoopStop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalLoopController {
    max_iterations: u32,
    exit_condition: String,
}

impl ConditionalLoopController {
    pub fn new(max_iterations: u32, exit_condition: impl Into<String>) -> Self {
        Self {
            max_iterations,
            exit_condition: exit_condition.into(),
        }
    }

    /// Run `pass` until the exit condition holds or the iteration cap is hit.
    ///
    /// `on_pass` sees the state after every pass (1-based index). Any error
    /// from either closure stops the loop immediately.
    #[instrument(
        skip_all,
        fields(
            run_id = %state.run_id,
            max_iterations = self.max_iterations,
            exit_condition = %self.exit_condition
        )
    )]
    pub fn run<P, F>(
        &self,
        state: &mut RunState,
        mut pass: P,
        mut on_pass: F,
    ) -> Result<LoopOutcome, PipelineError>
    where
        P: FnMut(&mut RunState) -> Result<(), PipelineError>,
        F: FnMut(u32, &RunState) -> Result<(), PipelineError>,
    {
        let mut passes = 0u32;
        loop {
            pass(state)?;
            passes += 1;

            let satisfied = evaluate_exit_path(&state.to_value()?, &self.exit_condition);
            if satisfied {
                state.exit_diagnostic = Some(format!(
                    "exit condition `{}` held after pass {passes}",
                    self.exit_condition
                ));
                on_pass(passes, state)?;
                info!(passes, "loop finished: exit condition satisfied");
                return Ok(LoopOutcome {
                    passes,
                    stop: LoopStop::Success,
                });
            }

            state.iteration_count += 1;
            if state.iteration_count >= self.max_iterations {
                state.exit_diagnostic = Some(format!(
                    "exit condition `{}` never held within {} pass(es)",
                    self.exit_condition, self.max_iterations
                ));
                on_pass(passes, state)?;
                info!(passes, "loop finished: iteration budget exhausted");
                return Ok(LoopOutcome {
                    passes,
                    stop: LoopStop::Maxed {
                        max_iterations: self.max_iterations,
                    },
                });
            }
            on_pass(passes, state)?;
        }
    }
}

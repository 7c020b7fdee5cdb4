//! One pass over the fixed stage order, each stage under its own retry budget.

use tracing::{info, instrument};

use crate::error::PipelineError;
use crate::healing::SelfHealingExecutor;
use crate::io::config::RetryConfig;
use crate::io::oracle::GenerationOracle;
use crate::stages::{Stage, StageContext};
use crate::state::RunState;

/// Attempts spent per stage during one pass, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub attempts: Vec<(Stage, u32)>,
}

impl PassReport {
    pub fn attempts_for(&self, stage: Stage) -> Option<u32> {
        self.attempts
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, n)| *n)
    }
}

/// Runs Draft, ComplianceValidate and Refine in order against one state.
pub struct StageSequencer<'c, 'a, O: ?Sized> {
    ctx: &'c StageContext<'a, O>,
    retries: RetryConfig,
}

impl<'c, 'a, O: GenerationOracle + ?Sized> StageSequencer<'c, 'a, O> {
    pub fn new(ctx: &'c StageContext<'a, O>, retries: RetryConfig) -> Self {
        Self { ctx, retries }
    }

    fn executor_for(&self, stage: Stage) -> SelfHealingExecutor {
        SelfHealingExecutor::new(match stage {
            Stage::Draft => self.retries.draft,
            Stage::Compliance => self.retries.compliance,
            Stage::Refine => self.retries.refine,
        })
    }

    /// Run every stage once (plus retries). The first hard failure aborts the pass.
    #[instrument(skip_all, fields(run_id = %state.run_id, iteration = state.iteration_count))]
    pub fn run_pass(&self, state: &mut RunState) -> Result<PassReport, PipelineError> {
        let mut report = PassReport::default();
        for stage in Stage::ORDER {
            let attempts = self
                .executor_for(stage)
                .execute(&self.ctx.runner(stage), state)?;
            report.attempts.push((stage, attempts));
        }
        info!(attempts = ?report.attempts, "pass complete");
        Ok(report)
    }
}

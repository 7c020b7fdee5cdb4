//! Independent requests processed concurrently against one orchestrator.
//!
//! Each request owns its own [`RunState`](crate::state::RunState); nothing is
//! shared between runs except read-only configuration and the extracted
//! requirements. Results come back in input order.

use std::thread;

use tracing::{info, instrument};

use crate::core::types::{PipelineResult, WorkItemRequest};
use crate::error::PipelineError;
use crate::io::oracle::GenerationOracle;
use crate::pipeline::PipelineOrchestrator;

/// Run every request, at most `max_parallel` at a time.
///
/// Run ids get a 1-based `-NNN` suffix so duplicate requests in one batch
/// never share archive or sink paths.
#[instrument(skip_all, fields(requests = requests.len(), max_parallel = max_parallel))]
pub fn run_batch<O: GenerationOracle + Sync + ?Sized>(
    orchestrator: &PipelineOrchestrator<'_, O>,
    requests: &[WorkItemRequest],
    max_parallel: usize,
) -> Vec<Result<PipelineResult, PipelineError>> {
    let width = max_parallel.max(1);
    let mut results = Vec::with_capacity(requests.len());
    for (chunk_index, chunk) in requests.chunks(width).enumerate() {
        thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .enumerate()
                .map(|(offset, request)| {
                    let index = chunk_index * width + offset;
                    scope.spawn(move || {
                        let base = orchestrator.run_id_for(request)?;
                        let run_id = format!("{base}-{:03}", index + 1);
                        orchestrator.run_with_id(request, run_id)
                    })
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(result) => results.push(result),
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
        });
    }
    let accepted = results
        .iter()
        .filter(|r| r.as_ref().is_ok_and(|r| r.accepted))
        .count();
    info!(accepted, total = results.len(), "batch finished");
    results
}

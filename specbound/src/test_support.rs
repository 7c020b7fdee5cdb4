//! Test-only helpers: a scripted oracle, an in-memory sink and JSON builders.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::json;

use crate::core::types::WorkItemRequest;
use crate::error::OracleError;
use crate::io::oracle::{GenerationOracle, OracleRequest};
use crate::io::sink::{PersistRecord, PersistenceSink};
use crate::stages::Stage;

/// One recorded oracle invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub stage: Stage,
    pub prompt: String,
    pub attempt: u32,
}

/// Oracle that replays a fixed script of answers, in order.
///
/// Once the script runs out every call fails with
/// [`OracleError::Unavailable`].
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedOracle {
    pub fn new(script: impl IntoIterator<Item = Result<String, OracleError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.script.lock().expect("script lock").len()
    }
}

impl GenerationOracle for ScriptedOracle {
    fn generate(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            stage: request.stage,
            prompt: request.prompt.to_string(),
            attempt: request.attempt,
        });
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Unavailable("script exhausted".to_string())))
    }
}

/// Sink that keeps every persisted record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<PersistRecord>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<PersistRecord> {
        self.records.lock().expect("records lock").clone()
    }
}

impl PersistenceSink for MemorySink {
    fn persist(&self, record: &PersistRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .expect("records lock")
            .push(record.clone());
        Ok(())
    }
}

/// Schema-valid Draft answer.
pub fn draft_json(title: &str, criteria: &[&str]) -> String {
    json!({
        "title": title,
        "description": format!("{title} for the team"),
        "acceptance_criteria": criteria,
        "estimate": null,
        "metadata": {},
    })
    .to_string()
}

/// Schema-valid Refine answer wrapping a [`draft_json`] draft.
pub fn refinement_json(title: &str, criteria: &[&str], is_valid: bool) -> String {
    json!({
        "draft": {
            "title": title,
            "description": format!("{title} for the team"),
            "acceptance_criteria": criteria,
            "estimate": null,
            "metadata": {},
        },
        "is_valid": is_valid,
        "issues": if is_valid { Vec::new() } else { vec!["criteria still incomplete"] },
        "summary": "refined",
    })
    .to_string()
}

/// Request with only a title.
pub fn request(title: &str) -> WorkItemRequest {
    WorkItemRequest {
        title: title.to_string(),
        ..WorkItemRequest::default()
    }
}

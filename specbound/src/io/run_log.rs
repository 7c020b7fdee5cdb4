//! Run archive: per-pass state snapshots and the final result.
//!
//! Layout: `<dir>/<run_id>/<pass>/run_state.json` and `<dir>/<run_id>/result.json`.
//! The archive is a debugging aid; pipeline behavior never reads it back.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::types::PipelineResult;
use crate::io::fs_util::write_json_atomic;
use crate::state::RunState;

#[derive(Debug, Clone)]
pub struct RunArchive {
    dir: PathBuf,
}

impl RunArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.dir.join(run_id)
    }

    pub fn pass_state_path(&self, run_id: &str, pass: u32) -> PathBuf {
        self.run_dir(run_id)
            .join(pass.to_string())
            .join("run_state.json")
    }

    pub fn result_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("result.json")
    }

    /// Snapshot `state` after pass `pass` (1-based).
    pub fn write_pass(&self, pass: u32, state: &RunState) -> Result<PathBuf> {
        let path = self.pass_state_path(&state.run_id, pass);
        write_json_atomic(&path, state)?;
        Ok(path)
    }

    pub fn write_result(&self, result: &PipelineResult) -> Result<PathBuf> {
        let path = self.result_path(&result.run_id);
        write_json_atomic(&path, result)?;
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

//! Persistence of accepted artifacts.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::types::WorkItemDraft;
use crate::io::fs_util::write_json_atomic;

/// An accepted artifact and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistRecord {
    pub run_id: String,
    pub iterations: u32,
    pub matched_domain: Option<String>,
    pub spec_version: String,
    pub persisted_at: DateTime<Utc>,
    pub artifact: WorkItemDraft,
}

/// Destination for accepted artifacts. Only called when a run is accepted.
pub trait PersistenceSink: Send + Sync {
    fn persist(&self, record: &PersistRecord) -> Result<()>;
}

/// Writes one `<run_id>.json` per accepted run into a directory.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PersistenceSink for JsonDirSink {
    fn persist(&self, record: &PersistRecord) -> Result<()> {
        let path = self.path_for(&record.run_id);
        write_json_atomic(&path, record)?;
        info!(run_id = %record.run_id, path = %path.display(), "persisted accepted artifact");
        Ok(())
    }
}

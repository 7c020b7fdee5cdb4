//! Specification corpus loading.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

const VERSION_HEX_CHARS: usize = 16;

/// Specification text plus a short content version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecCorpus {
    text: String,
    version: String,
}

impl SpecCorpus {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let version = content_version(&text);
        Self { text, version }
    }

    /// Load the corpus at `path`. A missing file is an empty corpus.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "spec corpus missing, using empty corpus");
            return Ok(Self::from_text(String::new()));
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("read spec corpus {}", path.display()))?;
        Ok(Self::from_text(text))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// First 16 hex characters of the SHA-256 of the text.
    pub fn version(&self) -> &str {
        &self.version
    }
}

fn content_version(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(VERSION_HEX_CHARS);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_corpus() {
        let temp = tempfile::tempdir().expect("tempdir");
        let corpus = SpecCorpus::load(&temp.path().join("nope.md")).expect("load");
        assert_eq!(corpus.text(), "");
        // sha256("") prefix
        assert_eq!(corpus.version(), "e3b0c44298fc1c14");
    }

    #[test]
    fn version_tracks_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("spec.md");
        fs::write(&path, "All APIs MUST return JSON\n").expect("write");
        let loaded = SpecCorpus::load(&path).expect("load");
        assert_eq!(loaded, SpecCorpus::from_text("All APIs MUST return JSON\n"));
        assert_eq!(loaded.version().len(), 16);
        assert_ne!(loaded.version(), SpecCorpus::from_text("").version());
    }
}

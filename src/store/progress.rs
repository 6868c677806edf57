//! Progress log
//!
//! Append-only audit trail of every graded interaction. Entries are never
//! mutated or pruned, and no code path (including operator reset) truncates
//! this file.

use anyhow::{Result, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One graded interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub timestamp: DateTime<Utc>,
    pub question_id: Option<usize>,
    pub question: String,
    pub response: String,
    pub feedback: String,
    pub score: u32,
}

/// File-backed append-only history
#[derive(Debug)]
pub struct ProgressLog {
    path: PathBuf,
    entries: Vec<ProgressEntry>,
}

impl ProgressLog {
    /// Load from disk, or start empty on a missing or corrupt file
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Could not parse {}, starting fresh: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// Append an entry and persist the full history
    pub fn append(&mut self, entry: ProgressEntry) -> Result<()> {
        self.entries.push(entry);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create progress directory")?;
        }
        let contents = serde_json::to_string_pretty(&self.entries)
            .context("Failed to serialize progress log")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!("Progress recorded to {}", self.path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }
}

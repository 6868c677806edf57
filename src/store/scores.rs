//! Score ledger
//!
//! Maps question ids to their chronological grade history and computes the
//! rolling averages that drive adaptive selection. A question with no
//! recorded grades averages 100: never-graded questions are treated as
//! mastered here because the selector already gives unanswered questions
//! absolute priority through a separate path.

use anyhow::{Result, Context};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Average assigned to questions with no grade history
pub const UNGRADED_AVERAGE: f64 = 100.0;

/// File-backed id -> grade-history map
#[derive(Debug)]
pub struct ScoreLedger {
    path: PathBuf,
    scores: BTreeMap<usize, Vec<u32>>,
}

impl ScoreLedger {
    /// Load from disk, or start empty. JSON object keys arrive as strings
    /// and are parsed back to ids; a corrupt file starts an empty ledger.
    pub fn load(path: &Path) -> Self {
        let scores = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<BTreeMap<String, Vec<u32>>>(&contents) {
                Ok(raw) => {
                    let mut scores = BTreeMap::new();
                    for (key, history) in raw {
                        match key.parse::<usize>() {
                            Ok(id) => {
                                scores.insert(id, history);
                            }
                            Err(_) => {
                                warn!("Ignoring non-numeric score key {:?} in {}", key, path.display());
                            }
                        }
                    }
                    scores
                }
                Err(e) => {
                    warn!("Could not parse {}, starting fresh: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self {
            path: path.to_path_buf(),
            scores,
        }
    }

    /// Append a grade to a question's history and persist
    pub fn record(&mut self, id: usize, score: u32) -> Result<()> {
        self.scores.entry(id).or_default().push(score.min(100));
        self.save()
    }

    /// Rolling average for a question; `UNGRADED_AVERAGE` when unanswered
    pub fn average(&self, id: usize) -> f64 {
        match self.scores.get(&id) {
            Some(history) if !history.is_empty() => {
                history.iter().map(|&s| s as f64).sum::<f64>() / history.len() as f64
            }
            _ => UNGRADED_AVERAGE,
        }
    }

    /// Whether a question has at least one recorded grade
    pub fn has_scores(&self, id: usize) -> bool {
        self.scores.get(&id).is_some_and(|h| !h.is_empty())
    }

    /// Number of questions with at least one grade
    pub fn answered_count(&self) -> usize {
        self.scores.values().filter(|h| !h.is_empty()).count()
    }

    /// Total number of recorded grades
    pub fn total_grades(&self) -> usize {
        self.scores.values().map(|h| h.len()).sum()
    }

    /// Iterate (id, history) pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u32])> {
        self.scores.iter().map(|(&id, h)| (id, h.as_slice()))
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create scores directory")?;
        }
        let contents = serde_json::to_string_pretty(&self.scores)
            .context("Failed to serialize score ledger")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ScoreLedger::load(&dir.path().join("scores.json"));

        // Never answered: treated as mastered, not zero
        assert_eq!(ledger.average(0), 100.0);

        ledger.record(0, 80).unwrap();
        ledger.record(0, 60).unwrap();
        assert_eq!(ledger.average(0), 70.0);
    }

    #[test]
    fn test_round_trip_stringified_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.json");

        let mut ledger = ScoreLedger::load(&path);
        ledger.record(3, 45).unwrap();
        ledger.record(3, 55).unwrap();
        ledger.record(7, 90).unwrap();

        // JSON object keys are strings on disk
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"3\""));

        let reloaded = ScoreLedger::load(&path);
        assert_eq!(reloaded.average(3), 50.0);
        assert_eq!(reloaded.average(7), 90.0);
        assert_eq!(reloaded.answered_count(), 2);
        assert_eq!(reloaded.total_grades(), 3);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let ledger = ScoreLedger::load(&path);
        assert_eq!(ledger.answered_count(), 0);
    }

    #[test]
    fn test_scores_clamped_to_100() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ScoreLedger::load(&dir.path().join("scores.json"));
        ledger.record(0, 250).unwrap();
        assert_eq!(ledger.average(0), 100.0);
        assert!(ledger.has_scores(0));
    }
}

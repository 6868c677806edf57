//! Persisted service state
//!
//! Three flat JSON stores, each rewritten wholesale on mutation from the
//! single loop task: the session state singleton, the per-question score
//! ledger, and the append-only progress log. A corrupt file is discarded
//! with a warning and reinitialized; it never takes the service down.

pub mod progress;
pub mod scores;
pub mod session;

pub use progress::{ProgressEntry, ProgressLog};
pub use scores::ScoreLedger;
pub use session::{SessionState, SessionStore};

use anyhow::{Result, Context};
use std::path::Path;
use tracing::info;

/// Operator reset: clears session state and the score ledger. The progress
/// log is history and is never cleared by this path.
pub fn reset(state_path: &Path, scores_path: &Path) -> Result<()> {
    for path in [state_path, scores_path] {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    info!("Cleared state and scores files (progress history preserved)");
    Ok(())
}

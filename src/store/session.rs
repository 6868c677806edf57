//! Session state singleton
//!
//! One mutable record per process lifetime, persisted across restarts. Holds
//! the in-flight question, the mail thread identity, and two bounded FIFO
//! buffers: recently asked question ids (repetition damping) and recently
//! sent message ids (so the service's own mail is never read as a reply).

use anyhow::{Result, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Capacity of the recent-question and sent-message-id buffers
pub const RECENT_CAPACITY: usize = 10;

/// Persisted session record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Id of the question currently awaiting an answer
    pub current_question_id: Option<usize>,
    /// Its text, kept so a graded round survives a bank reload
    pub current_question: Option<String>,
    /// Its reference answer
    pub current_answer: Option<String>,
    /// Mail thread the conversation lives in; stable once created
    pub thread_id: Option<String>,
    /// Message id of the outstanding question
    pub sent_message_id: Option<String>,
    /// Delivery timestamp of the outstanding question (epoch ms)
    pub sent_message_timestamp: Option<i64>,
    /// When the last question was sent
    pub last_question_time: Option<DateTime<Utc>>,
    /// True while a sent question awaits a reply
    pub waiting_for_response: bool,
    /// Recently asked question ids, oldest first
    #[serde(default)]
    pub recent_questions: Vec<usize>,
    /// Message ids sent by this service (questions and feedback)
    #[serde(default)]
    pub sent_message_ids: Vec<String>,
}

impl SessionState {
    /// Clear the waiting fields. Thread id and last send time are kept for
    /// thread continuity and interval pacing.
    pub fn clear_waiting(&mut self) {
        self.waiting_for_response = false;
        self.current_question_id = None;
        self.current_question = None;
        self.current_answer = None;
        self.sent_message_id = None;
        self.sent_message_timestamp = None;
    }

    /// Push a sent message id, evicting the oldest beyond capacity
    pub fn push_sent_message_id(&mut self, id: String) {
        if !self.sent_message_ids.contains(&id) {
            self.sent_message_ids.push(id);
        }
        if self.sent_message_ids.len() > RECENT_CAPACITY {
            let excess = self.sent_message_ids.len() - RECENT_CAPACITY;
            self.sent_message_ids.drain(..excess);
        }
    }

    /// All ids the classifier must treat as self-sent, the outstanding
    /// question included
    pub fn excluded_message_ids(&self) -> Vec<String> {
        let mut ids = self.sent_message_ids.clone();
        if let Some(sent) = &self.sent_message_id {
            if !ids.contains(sent) {
                ids.push(sent.clone());
            }
        }
        ids
    }
}

/// File-backed session store
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    pub state: SessionState,
}

impl SessionStore {
    /// Load from disk, or start fresh. The waiting fields are forcibly
    /// cleared on startup so a crash mid-wait cannot wedge the service;
    /// `seed_thread_id` is used only when no state file exists yet.
    pub fn load(path: &Path, seed_thread_id: Option<String>) -> Self {
        let state = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<SessionState>(&contents) {
                Ok(mut state) => {
                    state.clear_waiting();
                    match &state.thread_id {
                        Some(thread) => info!(
                            "Reset waiting state on startup (keeping thread {})",
                            truncate_id(thread)
                        ),
                        None => info!("Reset waiting state on startup (no existing thread)"),
                    }
                    state
                }
                Err(e) => {
                    warn!("Could not parse {}, starting fresh: {}", path.display(), e);
                    Self::fresh(seed_thread_id)
                }
            },
            Err(_) => Self::fresh(seed_thread_id),
        };

        Self {
            path: path.to_path_buf(),
            state,
        }
    }

    fn fresh(seed_thread_id: Option<String>) -> SessionState {
        SessionState {
            thread_id: seed_thread_id,
            ..SessionState::default()
        }
    }

    /// Write the full record to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create state directory")?;
        }
        let contents = serde_json::to_string_pretty(&self.state)
            .context("Failed to serialize session state")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Drop any state that references ids outside the reloaded bank.
    /// Returns true when stale state was repaired.
    pub fn invalidate_stale_ids(&mut self, bank_len: usize) -> bool {
        let max_recent = self.state.recent_questions.iter().copied().max();
        let stale_recent = max_recent.is_some_and(|max| max >= bank_len);
        let stale_current = self
            .state
            .current_question_id
            .is_some_and(|id| id >= bank_len);

        if stale_recent || stale_current {
            warn!(
                "Question bank changed ({} questions); clearing recent-question state",
                bank_len
            );
            self.state.recent_questions.clear();
            self.state.current_question_id = None;
            self.state.current_question = None;
            self.state.current_answer = None;
            true
        } else {
            false
        }
    }
}

fn truncate_id(id: &str) -> String {
    if id.len() > 10 {
        format!("{}...", &id[..10])
    } else {
        id.to_string()
    }
}

//! Question bank
//!
//! Ordered collection of question/answer pairs loaded from CSV. Row position
//! is the stable question id for the run; the bank is reloaded at startup and
//! may grow or shrink between runs, so persisted ids are validated against
//! the current size by callers.

use anyhow::{Result, Context, bail};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// A single quiz question, identified by its row position
#[derive(Debug, Clone)]
pub struct Question {
    pub id: usize,
    pub text: String,
    pub correct_answer: String,
}

/// Immutable-per-run ordered question collection
#[derive(Debug, Clone)]
pub struct QuestionBank {
    pub(crate) questions: Vec<Question>,
}

#[derive(Debug, Deserialize)]
struct QuestionRow {
    #[serde(alias = "questions")]
    question: String,
    #[serde(alias = "answers")]
    answer: String,
}

impl QuestionBank {
    /// Load the bank from a CSV file with `question`/`answer` columns.
    /// Plural headers (`questions`/`answers`) are accepted as aliases.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Questions file not found: {}", path.display());
        }

        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open questions CSV: {}", path.display()))?;

        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        // Deserialization matches the normalized headers, so `Question ` and
        // `questions` both land on the `question` field
        reader.set_headers(csv::StringRecord::from(headers.clone()));

        let has_question = headers.iter().any(|h| h == "question" || h == "questions");
        let has_answer = headers.iter().any(|h| h == "answer" || h == "answers");
        if !has_question || !has_answer {
            let mut missing = Vec::new();
            if !has_question {
                missing.push("question");
            }
            if !has_answer {
                missing.push("answer");
            }
            bail!(
                "CSV missing required columns: {:?}. Found columns: {:?}",
                missing,
                headers
            );
        }

        let mut questions = Vec::new();
        for (id, row) in reader.deserialize::<QuestionRow>().enumerate() {
            let row = row.with_context(|| format!("Failed to parse CSV row {}", id + 1))?;
            let text = row.question.trim().to_string();
            let answer = row.answer.trim().to_string();
            if text.is_empty() || answer.is_empty() {
                bail!("CSV row {} has an empty question or answer field", id + 1);
            }
            questions.push(Question {
                id,
                text,
                correct_answer: answer,
            });
        }

        if questions.is_empty() {
            bail!("Questions file contains no rows: {}", path.display());
        }

        info!("Loaded {} questions from {}", questions.len(), path.display());
        Ok(Self { questions })
    }

    /// Build a bank directly from (question, answer) pairs
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self> {
        if pairs.is_empty() {
            bail!("Question bank cannot be empty");
        }
        let questions = pairs
            .into_iter()
            .enumerate()
            .map(|(id, (text, correct_answer))| Question {
                id,
                text,
                correct_answer,
            })
            .collect();
        Ok(Self { questions })
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Question> {
        self.questions.get(id)
    }

    /// All ids in row order
    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        0..self.questions.len()
    }

    /// Whether a persisted id still falls inside the bank
    pub fn contains(&self, id: usize) -> bool {
        id < self.questions.len()
    }
}

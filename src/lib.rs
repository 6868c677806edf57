//! Mailquiz - Email Quiz Service Library
//!
//! A long-running study loop over email:
//! - Questions from a CSV bank, delivered through the Gmail REST API
//! - Reply detection that filters quotes, echoes, and automated mail
//! - LLM grading over an OpenAI-compatible chat API
//! - Adaptive selection biased toward the weakest-scoring questions
//!
//! # Example
//!
//! ```ignore
//! use mailquiz::config::Config;
//! use mailquiz::mail::gmail::GmailClient;
//! use mailquiz::grader::llm::LlmGrader;
//! use mailquiz::service::QuizService;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!     let channel = GmailClient::from_config(&config)?;
//!     let grader = LlmGrader::from_config(&config)?;
//!     let mut service = QuizService::new(config, None, Box::new(channel), Box::new(grader))?;
//!     service.run().await
//! }
//! ```

// Core modules
pub mod bank;
pub mod classify;
pub mod config;
pub mod select;
pub mod service;
pub mod store;

// Collaborator interfaces
pub mod grader;
pub mod mail;

// CLI surface
pub mod cli;

// Re-export commonly used types for convenience
pub use bank::{Question, QuestionBank};
pub use config::Config;
pub use grader::{GradeResult, Grader};
pub use mail::{MailChannel, MessagePart, SentMessage, ThreadMessage};
pub use service::{QuizService, TickOutcome};
pub use store::{ProgressEntry, ProgressLog, ScoreLedger, SessionState, SessionStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

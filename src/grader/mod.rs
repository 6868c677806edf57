//! Grading abstraction
//!
//! A grader turns (response, reference answer, question) into a 0-100 score
//! with feedback. The LLM implementation lives in [`llm`]. Malformed grader
//! output degrades to a neutral default result; only transport failures
//! surface as errors, which the loop treats as a skipped round.

pub mod llm;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Score substituted when the grader's output cannot be parsed
pub const NEUTRAL_SCORE: u32 = 50;

/// Outcome of grading one response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeResult {
    /// 0-100
    pub score: u32,
    pub feedback: String,
    pub missing_points: Vec<String>,
}

impl GradeResult {
    /// The neutral fallback used when upstream output is unusable
    pub fn neutral(reason: &str) -> Self {
        Self {
            score: NEUTRAL_SCORE,
            feedback: format!("Could not grade this response reliably: {reason}. Please try again."),
            missing_points: Vec::new(),
        }
    }
}

/// Common trait for graders
#[async_trait::async_trait]
pub trait Grader: Send + Sync {
    /// Grade a response against the reference answer
    async fn grade(
        &self,
        user_response: &str,
        correct_answer: &str,
        question: &str,
    ) -> Result<GradeResult>;
}

/// Render a grade as the feedback mail body
pub fn format_feedback(result: &GradeResult, correct_answer: &str) -> String {
    let mut message = format!("Your Score: {}/100\n\n", result.score);
    message.push_str(&format!("Feedback: {}\n\n", result.feedback));

    if result.missing_points.is_empty() {
        message.push_str("Great job! You covered all the key points.\n\n");
    } else {
        message.push_str("Missing Points:\n");
        for (i, point) in result.missing_points.iter().enumerate() {
            message.push_str(&format!("{}. {}\n", i + 1, point));
        }
        message.push('\n');
    }

    message.push_str(&format!(
        "{}\nCorrect Answer:\n{}\n{}\n",
        "=".repeat(60),
        "=".repeat(60),
        correct_answer
    ));
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_result() {
        let result = GradeResult::neutral("empty reply from model");
        assert_eq!(result.score, NEUTRAL_SCORE);
        assert!(result.feedback.contains("empty reply from model"));
        assert!(result.missing_points.is_empty());
    }

    #[test]
    fn test_format_feedback_with_missing_points() {
        let result = GradeResult {
            score: 72,
            feedback: "Good grasp of the basics.".into(),
            missing_points: vec!["Dark matter halos".into(), "Rotation curves".into()],
        };
        let message = format_feedback(&result, "The full reference answer.");
        assert!(message.starts_with("Your Score: 72/100\n"));
        assert!(message.contains("1. Dark matter halos"));
        assert!(message.contains("2. Rotation curves"));
        assert!(message.contains("Correct Answer:"));
        assert!(message.contains("The full reference answer."));
    }

    #[test]
    fn test_format_feedback_complete_answer() {
        let result = GradeResult {
            score: 100,
            feedback: "Everything covered.".into(),
            missing_points: vec![],
        };
        let message = format_feedback(&result, "Reference.");
        assert!(message.contains("Great job! You covered all the key points."));
        assert!(!message.contains("Missing Points:"));
    }
}

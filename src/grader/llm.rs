//! LLM grader over an OpenAI-compatible chat completions API

use anyhow::{Result, Context, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::grader::{GradeResult, Grader};

/// The model's answer is asked for as JSON but arrives as free text; keep
/// the reply small
const MAX_GRADE_TOKENS: u32 = 1024;

/// Review-sheet context is trimmed to this many trailing characters
const MAX_CONTEXT_CHARS: usize = 8_000;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Grader backed by an OpenAI-compatible chat endpoint
pub struct LlmGrader {
    http_client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    review_context: Option<String>,
}

impl LlmGrader {
    /// Create a grader from the main config, loading review-sheet context
    /// when one is configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config
            .grader
            .api_key
            .clone()
            .context("Grader API key is not configured")?;

        let review_context = match config.review_sheet_path()? {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => {
                    info!("Loaded review sheet context ({} characters)", contents.chars().count());
                    Some(tail_chars(&contents, MAX_CONTEXT_CHARS))
                }
                Err(e) => {
                    warn!("Could not load review sheet {}: {}", path.display(), e);
                    None
                }
            },
            _ => None,
        };

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            api_base: config.grader.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.grader.model.clone(),
            review_context,
        })
    }

    fn build_prompt(&self, user_response: &str, correct_answer: &str, question: &str) -> String {
        let context_section = match &self.review_context {
            Some(context) => format!("\n\nREVIEW SHEET CONTEXT (for reference):\n{context}\n"),
            None => String::new(),
        };

        format!(
            "You are a helpful quiz grader evaluating a student's response. \
             Use the review sheet context, when provided, to give accurate and \
             contextually relevant feedback.\n\n\
             Question: {question}\n\n\
             Correct Answer: {correct_answer}\n\n\
             User's Response: {user_response}\n\
             {context_section}\n\
             Please provide:\n\
             1. A score from 0-100 based on how well the response matches the correct answer\n\
             2. Specific feedback on what the student got right\n\
             3. What key points are missing or incorrect, if any\n\n\
             Format your response as JSON with the following structure:\n\
             {{\n\
                 \"score\": <number 0-100>,\n\
                 \"feedback\": \"<overall feedback>\",\n\
                 \"missing_points\": [\"<point 1>\", \"<point 2>\", ...]\n\
             }}\n\n\
             Be fair but thorough. If the response captures the essence of the \
             answer even if worded differently, give appropriate credit. Only \
             mark points as missing if they are genuinely absent or incorrect."
        )
    }
}

#[async_trait::async_trait]
impl Grader for LlmGrader {
    async fn grade(
        &self,
        user_response: &str,
        correct_answer: &str,
        question: &str,
    ) -> Result<GradeResult> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: self.build_prompt(user_response, correct_answer, question),
            }],
            max_tokens: MAX_GRADE_TOKENS,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to reach the grader API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Grader API error ({status}): {body}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse grader API response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(parse_grade(&content))
    }
}

/// Parse the model's reply into a grade, degrading to the neutral default
/// on anything unusable
pub fn parse_grade(content: &str) -> GradeResult {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return GradeResult::neutral("empty reply from model");
    }

    let json_text = extract_json(trimmed);
    let value: Value = match serde_json::from_str(json_text) {
        Ok(value) => value,
        Err(e) => {
            debug!("Grader reply was not valid JSON: {}", e);
            return GradeResult::neutral("reply was not valid JSON");
        }
    };

    // Field-by-field tolerance: a missing score falls back to neutral,
    // missing text fields fall back to placeholders
    let score = value
        .get("score")
        .and_then(|s| s.as_f64())
        .map(|s| s.clamp(0.0, 100.0).round() as u32)
        .unwrap_or(super::NEUTRAL_SCORE);

    let feedback = value
        .get("feedback")
        .and_then(|f| f.as_str())
        .unwrap_or("Unable to generate detailed feedback.")
        .to_string();

    let missing_points = value
        .get("missing_points")
        .and_then(|m| m.as_array())
        .map(|points| {
            points
                .iter()
                .filter_map(|p| p.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    GradeResult {
        score,
        feedback,
        missing_points,
    }
}

/// Models often wrap JSON in markdown fences; unwrap before parsing
fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    text
}

/// Last `max` characters of a string, on character boundaries
fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        text.to_string()
    } else {
        text.chars().skip(count - max).collect()
    }
}

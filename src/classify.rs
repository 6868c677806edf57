//! Reply classification
//!
//! Decides which message in a polled thread, if any, is a genuine human
//! answer to the outstanding question. Everything else in the thread is
//! noise: the question itself, prior feedback, feedback echoed back by the
//! correspondent's mail client, instant auto-replies, and auto-quoted copies
//! of the question. Absence of a passing message is the normal steady state
//! while waiting, not an error.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::mail::{MessagePart, ThreadMessage};

/// Feedback markers that identify the service's own grading mail when it is
/// echoed back into the thread
const FEEDBACK_MARKERS: &[&str] = &["score:", "your score:", "feedback:", "missing points:"];

/// Length of the body preview scanned for feedback markers
const MARKER_PREVIEW_CHARS: usize = 200;

/// How many leading question words feed the quote-overlap check
const OVERLAP_WORDS: usize = 10;

/// Questions shorter than this skip the overlap check entirely
const MIN_QUESTION_CHARS: usize = 10;

static QUOTED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^>.*$").expect("valid regex"));
static ATTRIBUTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?ms)^On .+ wrote:.*$").expect("valid regex"));
static BLANK_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));
static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^<]+?>").expect("valid regex"));

/// Find the genuine human reply in a thread, newest first.
///
/// Returns the cleaned reply text of the first message that passes every
/// check, or `None` while no reply has arrived.
pub fn classify(
    messages: &[ThreadMessage],
    sent_message_id: &str,
    sent_timestamp_ms: i64,
    excluded_ids: &[String],
    expected_sender: &str,
    question_text: &str,
    config: &ClassifierConfig,
) -> Option<String> {
    let mut ordered: Vec<&ThreadMessage> = messages.iter().collect();
    ordered.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));

    let expected = expected_sender.to_lowercase();

    for message in ordered {
        // Self-sent traffic: the question and every prior feedback message
        if message.id == sent_message_id || excluded_ids.contains(&message.id) {
            continue;
        }

        // Delivery races: mail-server echo can land with a timestamp at or
        // just after the send
        let time_diff = message.timestamp_ms - sent_timestamp_ms;
        if time_diff <= config.reply_buffer_ms {
            debug!(
                "Message {}: too early ({:.1}s after question)",
                message.id,
                time_diff as f64 / 1000.0
            );
            continue;
        }

        // Only the designated correspondent counts
        if !message.from.to_lowercase().contains(&expected) {
            debug!("Message {}: not from {}", message.id, expected_sender);
            continue;
        }

        // Vacation responders and similar answer near-instantly
        if time_diff < config.auto_reply_cutoff_ms {
            debug!(
                "Message {}: too recent ({:.1}s), likely automated",
                message.id,
                time_diff as f64 / 1000.0
            );
            continue;
        }

        let body = extract_body(&message.payload).unwrap_or_default();

        // The correspondent's client sometimes bounces our feedback mail
        // back into the thread
        let preview: String = body.chars().take(MARKER_PREVIEW_CHARS).collect();
        let preview = preview.to_lowercase();
        if FEEDBACK_MARKERS.iter().any(|m| preview.contains(m)) {
            debug!("Message {}: looks like an echoed feedback mail", message.id);
            continue;
        }

        let cleaned = strip_quotes(&body);
        if cleaned.chars().count() < config.min_reply_chars {
            debug!(
                "Message {}: cleaned reply too short ({} chars)",
                message.id,
                cleaned.chars().count()
            );
            continue;
        }

        // A reply that is mostly the question's own opening words is a
        // client auto-quote, not an answer
        if question_text.chars().count() > MIN_QUESTION_CHARS
            && question_overlap(question_text, &cleaned) > config.max_question_overlap
        {
            debug!("Message {}: reply is a quote of the question", message.id);
            continue;
        }

        debug!("Valid response detected in message {}", message.id);
        return Some(cleaned);
    }

    None
}

/// Extract readable text from a MIME part tree: depth-first for the first
/// plain-text leaf, falling back to the first HTML leaf with tags stripped.
pub fn extract_body(payload: &MessagePart) -> Option<String> {
    if let Some(text) = find_leaf(payload, "text/plain") {
        return Some(text);
    }
    find_leaf(payload, "text/html").map(|html| HTML_TAG.replace_all(&html, "").into_owned())
}

fn find_leaf(part: &MessagePart, mime_type: &str) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case(mime_type) {
        if let Some(body) = &part.body {
            if !body.is_empty() {
                return Some(body.clone());
            }
        }
    }
    part.parts.iter().find_map(|sub| find_leaf(sub, mime_type))
}

/// Remove reply-chain artifacts: quoted lines, "On ... wrote:" attribution
/// blocks, and blank-line runs
pub fn strip_quotes(text: &str) -> String {
    let text = QUOTED_LINE.replace_all(text, "");
    let text = ATTRIBUTION.replace_all(&text, "");
    let text = BLANK_RUN.replace_all(&text, "\n");
    text.trim().to_string()
}

/// Ratio of the question's first `OVERLAP_WORDS` words that also appear in
/// the reply
fn question_overlap(question_text: &str, reply: &str) -> f64 {
    let question_words: HashSet<String> = question_text
        .to_lowercase()
        .split_whitespace()
        .take(OVERLAP_WORDS)
        .map(String::from)
        .collect();
    let reply_words: HashSet<String> = reply
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();

    let shared = question_words.intersection(&reply_words).count();
    shared as f64 / question_words.len().max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUESTION: &str = "What is the Hubble constant and how does it relate to galaxy recession velocities?";
    const SENT_TS: i64 = 1_700_000_000_000;

    fn message(id: &str, from: &str, offset_ms: i64, body: &str) -> ThreadMessage {
        ThreadMessage {
            id: id.to_string(),
            from: from.to_string(),
            timestamp_ms: SENT_TS + offset_ms,
            payload: MessagePart::text(body),
        }
    }

    fn classify_one(msg: ThreadMessage) -> Option<String> {
        classify(
            &[msg],
            "sent-1",
            SENT_TS,
            &["sent-1".to_string(), "feedback-1".to_string()],
            "student@example.com",
            QUESTION,
            &ClassifierConfig::default(),
        )
    }

    #[test]
    fn test_accepts_genuine_reply() {
        let msg = message(
            "reply-1",
            "Student <student@example.com>",
            15_000,
            "It describes the expansion rate of the universe, about 70 km/s/Mpc.",
        );
        let answer = classify_one(msg).unwrap();
        assert!(answer.contains("expansion rate"));
    }

    #[test]
    fn test_rejects_excluded_id() {
        let msg = message("feedback-1", "student@example.com", 60_000, "A fine answer");
        assert_eq!(classify_one(msg), None);
    }

    #[test]
    fn test_rejects_within_race_buffer() {
        // 1500ms after send: under the 2000ms buffer
        let msg = message("reply-1", "student@example.com", 1_500, "An answer body here");
        assert_eq!(classify_one(msg), None);
        // Exactly at the buffer is still rejected; strictly after is required
        let msg = message("reply-1", "student@example.com", 2_000, "An answer body here");
        assert_eq!(classify_one(msg), None);
    }

    #[test]
    fn test_race_buffer_boundary_in_isolation() {
        // With the automated-reply cutoff relaxed, the 2000ms buffer alone
        // decides: 1500ms is rejected, the same body at 3000ms is accepted
        let config = ClassifierConfig {
            auto_reply_cutoff_ms: 2_500,
            ..ClassifierConfig::default()
        };
        let classify_at = |offset_ms: i64| {
            classify(
                &[message("reply-1", "student@example.com", offset_ms, "The expansion rate of space itself")],
                "sent-1",
                SENT_TS,
                &["sent-1".to_string()],
                "student@example.com",
                QUESTION,
                &config,
            )
        };
        assert_eq!(classify_at(1_500), None);
        assert!(classify_at(3_000).is_some());
    }

    #[test]
    fn test_rejects_wrong_sender() {
        let msg = message(
            "reply-1",
            "Someone Else <other@example.com>",
            60_000,
            "An answer body here",
        );
        assert_eq!(classify_one(msg), None);
    }

    #[test]
    fn test_rejects_likely_automated() {
        // Right sender, but 3s after send: under the 10s automated cutoff
        let msg = message("reply-1", "student@example.com", 3_000, "Out of office right now");
        assert_eq!(classify_one(msg), None);
        // The same body past the cutoff is accepted
        let msg = message("reply-1", "student@example.com", 11_000, "Out of office right now");
        assert!(classify_one(msg).is_some());
    }

    #[test]
    fn test_rejects_feedback_echo() {
        let msg = message(
            "reply-1",
            "student@example.com",
            60_000,
            "Your Score: 85/100\n\nFeedback: solid grasp of the material.",
        );
        assert_eq!(classify_one(msg), None);
    }

    #[test]
    fn test_rejects_short_reply_after_quote_stripping() {
        let msg = message(
            "reply-1",
            "student@example.com",
            60_000,
            "ok\n> What is the Hubble constant and how does it relate\n> to galaxy recession velocities?",
        );
        assert_eq!(classify_one(msg), None);
    }

    #[test]
    fn test_rejects_quoted_question() {
        // The reply is just the question's opening words again
        let msg = message(
            "reply-1",
            "student@example.com",
            60_000,
            "What is the Hubble constant and how does it relate to",
        );
        assert_eq!(classify_one(msg), None);
    }

    #[test]
    fn test_newest_passing_message_wins() {
        let older = message("reply-1", "student@example.com", 20_000, "First answer attempt");
        let newer = message("reply-2", "student@example.com", 90_000, "Revised answer attempt");
        let result = classify(
            &[older, newer],
            "sent-1",
            SENT_TS,
            &["sent-1".to_string()],
            "student@example.com",
            QUESTION,
            &ClassifierConfig::default(),
        );
        assert_eq!(result.as_deref(), Some("Revised answer attempt"));
    }

    #[test]
    fn test_strip_quotes() {
        let raw = "My answer.\n\n\nOn Mon, Jan 1, 2026 at 9:00 AM Quiz <quiz@example.com> wrote:\n> What is the Hubble constant?\n";
        assert_eq!(strip_quotes(raw), "My answer.");
    }

    #[test]
    fn test_extract_body_prefers_plain_text() {
        let payload = MessagePart::multipart(
            "multipart/alternative",
            vec![
                MessagePart::html("<p>HTML answer</p>"),
                MessagePart::text("Plain answer"),
            ],
        );
        assert_eq!(extract_body(&payload).as_deref(), Some("Plain answer"));
    }

    #[test]
    fn test_extract_body_html_fallback_strips_tags() {
        let payload = MessagePart::multipart(
            "multipart/related",
            vec![MessagePart::multipart(
                "multipart/alternative",
                vec![MessagePart::html("<div>Nested <b>HTML</b> answer</div>")],
            )],
        );
        assert_eq!(extract_body(&payload).as_deref(), Some("Nested HTML answer"));
    }

    #[test]
    fn test_extract_body_empty_tree() {
        let payload = MessagePart::multipart("multipart/mixed", vec![]);
        assert_eq!(extract_body(&payload), None);
    }
}

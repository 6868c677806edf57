//! Mail channel abstraction
//!
//! The quiz loop talks to its correspondent through this narrow interface;
//! the Gmail REST implementation lives in [`gmail`]. Transport concerns
//! (auth, wire encoding) stay behind the trait so the loop and the reply
//! classifier only ever see decoded messages.

pub mod gmail;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Receipt for a delivered message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    /// Provider-assigned message id
    pub message_id: String,
    /// Thread the message landed in (newly created when none was given)
    pub thread_id: String,
}

/// One node of a MIME part tree, body data already decoded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePart {
    /// MIME type, e.g. `text/plain` or `multipart/alternative`
    pub mime_type: String,
    /// Decoded body text, when this part carries any
    pub body: Option<String>,
    /// Nested parts for multipart containers
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// A plain-text leaf part
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            mime_type: "text/plain".to_string(),
            body: Some(body.into()),
            parts: Vec::new(),
        }
    }

    /// An HTML leaf part
    pub fn html(body: impl Into<String>) -> Self {
        Self {
            mime_type: "text/html".to_string(),
            body: Some(body.into()),
            parts: Vec::new(),
        }
    }

    /// A multipart container
    pub fn multipart(mime_type: impl Into<String>, parts: Vec<MessagePart>) -> Self {
        Self {
            mime_type: mime_type.into(),
            body: None,
            parts,
        }
    }
}

/// A message as seen when polling a thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Provider-assigned message id
    pub id: String,
    /// Normalized `From` header
    pub from: String,
    /// Delivery timestamp, epoch milliseconds
    pub timestamp_ms: i64,
    /// Root of the MIME part tree
    pub payload: MessagePart,
}

/// Common trait for mail transports
#[async_trait::async_trait]
pub trait MailChannel: Send + Sync {
    /// Deliver a message, threading it into `thread_id` when given
    async fn send_message(
        &self,
        body: &str,
        thread_id: Option<&str>,
        subject: &str,
    ) -> Result<SentMessage>;

    /// Fetch every message currently in a thread
    async fn fetch_thread(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;

    /// Delivery timestamp of a message, epoch milliseconds
    async fn message_timestamp(&self, message_id: &str) -> Result<i64>;
}

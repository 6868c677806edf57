//! Gmail REST transport
//!
//! Sends RFC 2822 text messages through the Gmail API `messages/send`
//! endpoint and reads threads back for reply polling. Authentication uses a
//! token file produced by an out-of-band OAuth consent flow; the access
//! token is refreshed here against the Google token endpoint whenever it is
//! close to expiry.

use anyhow::{Result, Context, bail};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::mail::{MailChannel, MessagePart, SentMessage, ThreadMessage};

/// Gmail API base URL
const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Refresh the access token when it expires within this window
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

/// Gmail thread ids are normally 16+ hex chars; anything shorter is suspect
const MIN_PLAUSIBLE_THREAD_ID: usize = 8;

/// Stored OAuth credentials, as written by the consent flow
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    /// Current access token
    #[serde(alias = "access_token")]
    token: String,
    refresh_token: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    client_id: String,
    client_secret: String,
    /// Access token expiry; absent means "assume expired"
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl StoredToken {
    fn is_fresh(&self) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(TOKEN_EXPIRY_SKEW_SECS) > Utc::now(),
            None => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    grant_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Serialize)]
struct SendRequest {
    raw: String,
    #[serde(rename = "threadId", skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiThread {
    #[serde(default)]
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    #[serde(rename = "internalDate", default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<ApiPart>,
}

#[derive(Debug, Deserialize)]
struct ApiPart {
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<ApiHeader>,
    #[serde(default)]
    body: Option<ApiBody>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Deserialize)]
struct ApiHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ApiBody {
    #[serde(default)]
    data: Option<String>,
}

impl ApiMessage {
    fn timestamp_ms(&self) -> i64 {
        self.internal_date
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0)
    }

    fn from_header(&self) -> String {
        self.payload
            .as_ref()
            .and_then(|p| {
                p.headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("from"))
                    .map(|h| h.value.clone())
            })
            .unwrap_or_default()
    }
}

impl ApiPart {
    fn into_part(self) -> MessagePart {
        let body = self
            .body
            .and_then(|b| b.data)
            .and_then(|data| decode_body_data(&data));
        MessagePart {
            mime_type: self.mime_type,
            body,
            parts: self.parts.into_iter().map(ApiPart::into_part).collect(),
        }
    }
}

/// Decode Gmail's base64url body data (padded or not)
fn decode_body_data(data: &str) -> Option<String> {
    let decoded = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

/// Gmail client for the quiz thread
pub struct GmailClient {
    http_client: reqwest::Client,
    token: Mutex<StoredToken>,
    token_path: PathBuf,
    target_email: String,
}

impl GmailClient {
    /// Create a client from the main config, loading the stored token
    pub fn from_config(config: &Config) -> Result<Self> {
        let token_path = config.token_path()?;
        Self::new(&token_path, config.email.target_email.clone())
    }

    /// Create a client from an explicit token file and correspondent
    pub fn new(token_path: &Path, target_email: String) -> Result<Self> {
        let contents = std::fs::read_to_string(token_path).with_context(|| {
            format!(
                "Failed to read OAuth token file {} (run the consent flow first)",
                token_path.display()
            )
        })?;
        let token: StoredToken = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse OAuth token file {}", token_path.display()))?;

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            token: Mutex::new(token),
            token_path: token_path.to_path_buf(),
            target_email,
        })
    }

    /// Current access token, refreshed when close to expiry
    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if token.is_fresh() {
            return Ok(token.token.clone());
        }

        debug!("Refreshing Gmail access token");
        let request = RefreshRequest {
            client_id: &token.client_id,
            client_secret: &token.client_secret,
            refresh_token: &token.refresh_token,
            grant_type: "refresh_token",
        };

        let response = self
            .http_client
            .post(&token.token_uri)
            .form(&request)
            .send()
            .await
            .context("Failed to reach the OAuth token endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Token refresh failed ({status}): {body}");
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .context("Failed to parse token refresh response")?;

        token.token = refreshed.access_token;
        token.expiry = Some(Utc::now() + Duration::seconds(refreshed.expires_in));

        // Persist so the next process start skips an immediate refresh
        if let Ok(contents) = serde_json::to_string_pretty(&*token) {
            if let Err(e) = std::fs::write(&self.token_path, contents) {
                warn!("Could not persist refreshed token: {}", e);
            }
        }

        Ok(token.token.clone())
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/users/me/{}", GMAIL_API_BASE, path)
    }

    /// Build the base64url-encoded RFC 2822 message Gmail expects in `raw`
    fn encode_message(&self, body: &str, subject: &str) -> String {
        let message = format!(
            "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
            self.target_email, subject, body
        );
        URL_SAFE.encode(message.as_bytes())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let access_token = self.access_token().await?;
        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("Failed to reach the Gmail API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Gmail API error ({status}): {body}");
        }

        response.json().await.context("Failed to parse Gmail API response")
    }
}

#[async_trait::async_trait]
impl MailChannel for GmailClient {
    async fn send_message(
        &self,
        body: &str,
        thread_id: Option<&str>,
        subject: &str,
    ) -> Result<SentMessage> {
        let thread_id = thread_id.map(str::trim).filter(|t| !t.is_empty());
        if let Some(thread) = thread_id {
            if thread.len() < MIN_PLAUSIBLE_THREAD_ID {
                warn!("Thread id {:?} looks too short, trying it anyway", thread);
            }
        }

        // Replies within an existing thread carry a Re: subject
        let subject = if thread_id.is_some() && !subject.starts_with("Re:") {
            format!("Re: {subject}")
        } else {
            subject.to_string()
        };

        let request = SendRequest {
            raw: self.encode_message(body, &subject),
            thread_id: thread_id.map(String::from),
        };

        let access_token = self.access_token().await?;
        let response = self
            .http_client
            .post(self.api_url("messages/send"))
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .await
            .context("Failed to reach the Gmail API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Error sending email ({status}): {body}");
        }

        let sent: SendResponse = response
            .json()
            .await
            .context("Failed to parse Gmail send response")?;

        info!("Sent message {} in thread {}", sent.id, sent.thread_id);
        Ok(SentMessage {
            message_id: sent.id,
            thread_id: sent.thread_id,
        })
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let thread: ApiThread = self
            .get_json(&self.api_url(&format!("threads/{thread_id}")))
            .await
            .context("Error retrieving thread")?;

        Ok(thread
            .messages
            .into_iter()
            .map(|message| {
                let timestamp_ms = message.timestamp_ms();
                let from = message.from_header();
                let payload = message
                    .payload
                    .map(ApiPart::into_part)
                    .unwrap_or_default();
                ThreadMessage {
                    id: message.id,
                    from,
                    timestamp_ms,
                    payload,
                }
            })
            .collect())
    }

    async fn message_timestamp(&self, message_id: &str) -> Result<i64> {
        let message: ApiMessage = self
            .get_json(&self.api_url(&format!("messages/{message_id}?format=minimal")))
            .await
            .context("Error retrieving message")?;
        Ok(message.timestamp_ms())
    }
}

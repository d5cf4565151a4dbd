//! Chat-completion transport.
//!
//! Issues one streaming request per turn against an OpenAI-compatible
//! `chat/completions` endpoint and exposes the response body as a stream of
//! parsed SSE events. Retry/backoff is deliberately absent; a failed request
//! surfaces as one error for that turn.

use std::time::Duration;

use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::ClientError;
use crate::stream::{sse_event_stream, SseEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

/// Extract the incremental text carried by one chat-completion SSE event.
///
/// Returns `None` for `[DONE]`, undecodable payloads, and chunks without a
/// content delta (role-only chunks, usage frames).
#[must_use]
pub fn delta_text(event: &SseEvent) -> Option<String> {
    if crate::stream::is_done_event(event) {
        return None;
    }
    let chunk: ChatChunk = serde_json::from_str(&event.data).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
}

/// Streaming chat client for one configured endpoint and model.
pub struct ChatClient {
    http: reqwest::Client,
    completions_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatClient {
    /// Build a client from config. The bearer key is read from the
    /// configured environment variable; endpoints that need no key (local
    /// servers) work with the variable unset.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(60)))
            .build()
            .map_err(|err| ClientError::Config(format!("failed to build HTTP client: {err}")))?;
        let completions_url = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        Ok(Self {
            http,
            completions_url,
            api_key: std::env::var(&config.api_key_env).ok(),
            model: config.model.clone(),
        })
    }

    /// Request one streaming completion and return the SSE event stream.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the request cannot be sent
    /// and [`ClientError::Upstream`] for non-success HTTP statuses.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
    ) -> Result<impl Stream<Item = SseEvent> + Send, ClientError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };
        let mut request = self.http.post(&self.completions_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > 512 {
                let mut cut = 512;
                while cut > 0 && !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
                message.push_str("...");
            }
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(sse_event_stream(response.bytes_stream()))
    }
}

//! Chat-completion clients.
//!
//! [`ChatClient`] is the seam between the pipeline and the remote model;
//! [`OpenAiClient`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint over blocking HTTP.

use crate::config::Config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model
    System,
    /// The request itself
    User,
    /// A model reply
    Assistant,
}

/// One message of a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    /// Model name
    pub model: String,
    /// Conversation, system message first
    pub messages: Vec<ChatMessage>,
    /// Maximum completion length
    pub max_tokens: usize,
    /// Sampling temperature
    pub temperature: f32,
}

impl ChatRequest {
    /// Creates a deterministic (temperature 0) request.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, max_tokens: usize) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens,
            temperature: 0.0,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice, if it has any.
    fn into_reply(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
    }
}

/// A chat-completion backend.
pub trait ChatClient: Send + Sync {
    /// Sends a request and returns the reply text.
    ///
    /// `Ok(None)` means the API answered but gave no usable content.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, non-success statuses and
    /// undecodable responses.
    fn complete(&self, request: &ChatRequest) -> Result<Option<String>>;
}

/// Client for OpenAI-compatible chat-completion APIs.
pub struct OpenAiClient {
    endpoint: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl OpenAiClient {
    /// Creates a client for `base_url` (e.g. `https://api.openai.com/v1`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            client,
            timeout,
        })
    }

    /// Creates a client from the API settings of a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key is configured or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let key = config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::config("An API key is required"))?;
        Self::new(&config.api_base, key, config.request_timeout)
    }

    /// Full URL requests are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ChatClient for OpenAiClient {
    fn complete(&self, request: &ChatRequest) -> Result<Option<String>> {
        debug!(
            "POST {} (model {}, max_tokens {})",
            self.endpoint, request.model, request.max_tokens
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    Error::http(format!(
                        "Request timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    Error::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::api(status.as_u16(), body));
        }

        let body = response.text()?;
        trace!("Response body: {body}");
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| Error::response_parsing(e.to_string()))?;

        Ok(parsed.into_reply())
    }
}

/// Replays canned results and records the requests it was given.
#[cfg(test)]
pub(crate) struct ScriptedClient {
    replies: std::sync::Mutex<std::collections::VecDeque<Result<Option<String>>>>,
    requests: std::sync::Mutex<Vec<ChatRequest>>,
}

#[cfg(test)]
impl ScriptedClient {
    pub(crate) fn new(replies: Vec<Result<Option<String>>>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with the same text.
    pub(crate) fn always(reply: &str) -> Self {
        Self::new(std::iter::repeat_n(Ok(Some(reply.to_string())), 64).collect())
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ChatClient for ScriptedClient {
    fn complete(&self, request: &ChatRequest) -> Result<Option<String>> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::config("scripted client ran out of replies")))
    }
}

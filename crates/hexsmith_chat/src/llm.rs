//! Chat-completion client.
//!
//! Speaks the OpenAI chat-completions wire format, which most hosted and
//! self-hosted gateways accept. Base URL, path, model and credential come
//! from the environment.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ChatError, ChatResult};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_CHAT_PATH: &str = "/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Environment variables checked for a credential, first non-empty wins.
pub const API_KEY_VARS: &[&str] = &["OPENAI_API_KEY", "OPENAI_KEY", "OPENAI_TOKEN"];

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model override; the client default is used when `None`
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, temperature: f32) -> Self {
        Self {
            model: None,
            messages,
            temperature,
        }
    }

    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Content of the last user message.
    pub fn user_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Response from the completion service.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Message text as returned, code fences included
    pub content: String,
    pub model: String,
    pub status: u16,
    /// Raw response body for debug transcripts
    pub raw: Value,
}

/// Remote code-completion capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Default model name.
    fn model(&self) -> String;

    async fn complete(&self, request: CompletionRequest) -> ChatResult<CompletionResponse>;
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    chat_path: String,
    model: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_retries: 3,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn chat_path(mut self, path: impl Into<String>) -> Self {
        self.chat_path = path.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// Create a client from environment variables.
    ///
    /// Checks `OPENAI_API_KEY`, `OPENAI_KEY` and `OPENAI_TOKEN` for the
    /// credential; `OPENAI_BASE_URL`, `OPENAI_CHAT_PATH`, `OPENAI_MODEL` and
    /// `OPENAI_CHAT_MODEL` are optional.
    pub fn from_env() -> ChatResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> ChatResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = API_KEY_VARS
            .iter()
            .find_map(|key| non_empty(*key))
            .ok_or(ChatError::LlmNotConfigured)?;

        let mut client = Self::new(api_key);
        if let Some(url) = non_empty("OPENAI_BASE_URL") {
            client = client.base_url(url);
        }
        if let Some(path) = non_empty("OPENAI_CHAT_PATH") {
            client = client.chat_path(path);
        }
        if let Some(model) = non_empty("OPENAI_MODEL").or_else(|| non_empty("OPENAI_CHAT_MODEL")) {
            client = client.with_model(model);
        }
        Ok(client)
    }

    /// Full endpoint URL.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.chat_path.starts_with('/') {
            format!("{}{}", base, self.chat_path)
        } else {
            format!("{}/{}", base, self.chat_path)
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn model(&self) -> String {
        self.model.clone()
    }

    async fn complete(&self, request: CompletionRequest) -> ChatResult<CompletionResponse> {
        let url = self.endpoint();
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = OpenAIRequest {
            model: &model,
            messages: &request.messages,
            temperature: request.temperature,
        };

        // Retry logic for transient errors (5xx, rate limits, network issues)
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s
                let delay = Duration::from_secs(1 << attempt);
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(attempt = attempt + 1, "Completion request failed: {}", e);
                    last_error = Some(ChatError::LlmError(format!("Network error: {}", e)));
                    continue;
                }
            };

            let status = response.status();

            if status.is_server_error() || status.as_u16() == 429 {
                let text = response.text().await.unwrap_or_default();
                last_error = Some(ChatError::LlmError(format!(
                    "Completion API error {} (attempt {}/{}): {}",
                    status,
                    attempt + 1,
                    self.max_retries,
                    text
                )));
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(ChatError::LlmError(format!(
                    "Completion API error {}: {}",
                    status, text
                )));
            }

            let raw: Value = response
                .json()
                .await
                .map_err(|e| ChatError::LlmError(format!("Failed to parse response: {}", e)))?;
            debug!(status = status.as_u16(), "Completion response: {}", truncate(&raw.to_string(), 4000));

            return Ok(CompletionResponse {
                content: extract_content(&raw),
                model,
                status: status.as_u16(),
                raw,
            });
        }

        Err(last_error.unwrap_or_else(|| ChatError::LlmError("Max retries exceeded".to_string())))
    }
}

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
}

/// Message text of the first choice; empty when absent.
pub fn extract_content(raw: &Value) -> String {
    raw.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// First fenced code block of a completion.
static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"```[a-zA-Z]*\r?\n([\s\S]*?)\r?\n```").ok());

/// Return the body of the first fenced code block, or the input unchanged.
pub fn strip_code_fences(text: &str) -> String {
    let Some(fence) = CODE_FENCE.as_ref() else {
        return text.to_string();
    };
    match fence.captures(text).and_then(|c| c.get(1)) {
        Some(body) if !body.as_str().is_empty() => body.as_str().to_string(),
        _ => text.to_string(),
    }
}

/// Cut `text` to at most `max` bytes on a char boundary.
pub fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_no_credential() {
        assert!(matches!(
            OpenAiClient::from_lookup(lookup(&[("OPENAI_API_KEY", "  ")])),
            Err(ChatError::LlmNotConfigured)
        ));
    }

    #[test]
    fn test_credential_fallback_order() {
        let client =
            OpenAiClient::from_lookup(lookup(&[("OPENAI_TOKEN", "tok"), ("OPENAI_KEY", "key")]))
                .unwrap();
        assert_eq!(client.api_key, "key");
    }

    #[test]
    fn test_env_overrides() {
        let client = OpenAiClient::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "k"),
            ("OPENAI_BASE_URL", "http://localhost:8080/"),
            ("OPENAI_CHAT_PATH", "v1/chat"),
            ("OPENAI_CHAT_MODEL", "local-model"),
        ]))
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat");
        assert_eq!(client.model(), "local-model");
    }

    #[test]
    fn test_defaults() {
        let client = OpenAiClient::new("k");
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![Message::system("sys"), Message::user("task")];
        let body = OpenAIRequest {
            model: "m",
            messages: &messages,
            temperature: 0.0,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "task");
        assert_eq!(value["temperature"], 0.0);
    }

    #[test]
    fn test_extract_content() {
        let raw = serde_json::json!({"choices":[{"message":{"content":"zoombit.brake()"}}]});
        assert_eq!(extract_content(&raw), "zoombit.brake()");
        assert_eq!(extract_content(&serde_json::json!({"choices":[]})), "");
        assert_eq!(
            extract_content(&serde_json::json!({"choices":[{"message":{"content":null}}]})),
            ""
        );
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("Here:\n```typescript\nzoombit.brake()\n```\nDone"),
            "zoombit.brake()"
        );
        assert_eq!(strip_code_fences("```\na\nb\n```"), "a\nb");
        assert_eq!(strip_code_fences("basic.pause(100)"), "basic.pause(100)");
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_user_content() {
        let request = CompletionRequest::new(vec![Message::system("s"), Message::user("u")], 0.2);
        assert_eq!(request.user_content(), "u");
    }
}

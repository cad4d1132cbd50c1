use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.5,
            max_tokens: 800,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Text-generation collaborator.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl OpenAiConfig {
    /// `None` when `CONCOURSE_OPENAI_API_KEY` is unset.
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("CONCOURSE_OPENAI_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty())?;
        let model =
            env::var("CONCOURSE_OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url = env::var("CONCOURSE_OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Some(Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Shared outbound client with connect and request timeouts.
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(6).min(timeout))
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    config: OpenAiConfig,
    http_client: Client,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(self.config.api_key.as_str())
            .json(&payload)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "chat completion non-success status {}: {}",
                status.as_u16(),
                body
            );
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("chat completion parse failed")?;
        let text = extract_output_text(&body)
            .filter(|value| !value.trim().is_empty())
            .context("chat completion output text missing")?;

        debug!(
            model = %self.config.model,
            chars = text.chars().count(),
            "chat completion received"
        );
        Ok(text)
    }
}

/// First choice of a chat-completions payload, or the `output_text` of a
/// responses payload.
pub fn extract_output_text(payload: &serde_json::Value) -> Option<String> {
    if let Some(content) = payload
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
    {
        return Some(content.to_string());
    }

    payload
        .get("output_text")
        .and_then(|value| value.as_str())
        .map(ToString::to_string)
}

/// Strips a surrounding Markdown code fence (```json … ```) if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

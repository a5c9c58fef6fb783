//! Chat-completion client for OpenAI-compatible APIs (Groq by default).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama-3.1-70b-versatile";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ApiResponse {
    /// Text of the first choice, trimmed.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|c| c.message.content.trim())
            .filter(|t| !t.is_empty())
    }
}

pub struct LlmClient {
    api_key: String,
    model: String,
    endpoint: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            endpoint: GROQ_ENDPOINT.to_string(),
            max_tokens: 100,
            temperature: 0.7,
            timeout: DEFAULT_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Upper bound on each request, connect to last byte.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, messages: &[Message]) -> Result<ApiResponse> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("Failed to call chat completion API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion API error {status}: {body}");
        }

        resp.json::<ApiResponse>()
            .await
            .context("Failed to parse chat completion response")
    }

    /// Single-turn completion: one system prompt, one user prompt.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let resp = self
            .chat(&[Message::system(system), Message::user(prompt)])
            .await?;
        if let Some(usage) = &resp.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }
        resp.text()
            .map(str::to_string)
            .context("Chat completion returned no text")
    }
}

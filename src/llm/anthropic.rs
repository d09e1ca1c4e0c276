//! Anthropic messages-API client — the bundled `Llm` implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Llm, LlmError, ModelConfig, Tier};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    models: ModelConfig,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, models: ModelConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            models,
        }
    }

    /// Read the API key from `ANTHROPIC_API_KEY`.
    pub fn from_env(models: ModelConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LlmError::Transport("ANTHROPIC_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key, models))
    }
}

#[async_trait]
impl Llm for AnthropicClient {
    async fn invoke(
        &self,
        tier: Tier,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let model = self.models.model_for(tier);
        let request = MessagesRequest {
            model,
            max_tokens,
            system: system_prompt,
            messages: [Message {
                role: "user",
                content: user_prompt.trim(),
            }],
        };

        log::debug!("LLM call: tier={tier} model={model} max_tokens={max_tokens}");

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Transport(format!("HTTP {status}: {body}")));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let text = parsed
            .content
            .first()
            .map(|b| b.text.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::Transport("empty response content".to_string()));
        }
        Ok(text)
    }
}

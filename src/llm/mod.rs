//! LLM capability — tiered model access with tolerant JSON extraction
//! and bounded retry.
//!
//! The engine only ever sees the `Llm` trait. Two tiers exist: `creative`
//! for generation-quality calls (narrative, sequence review) and
//! `mechanical` for cheap structured classification (borderline
//! adjudication).

pub mod anthropic;

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model selection tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Creative,
    Mechanical,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Creative => write!(f, "creative"),
            Tier::Mechanical => write!(f, "mechanical"),
        }
    }
}

/// Model names per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub creative: String,
    pub mechanical: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            creative: "claude-sonnet-4-5-20250929".to_string(),
            mechanical: "claude-3-5-haiku-20241022".to_string(),
        }
    }
}

impl ModelConfig {
    pub fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Creative => &self.creative,
            Tier::Mechanical => &self.mechanical,
        }
    }
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM transport error: {0}")]
    Transport(String),
    #[error("Could not extract JSON from LLM response: {0}")]
    Json(String),
}

/// The LLM capability consumed by the pipeline.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Make one call on the given tier and return the raw text response.
    async fn invoke(
        &self,
        tier: Tier,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

const RETRY_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 3;
const BACKOFF_CAP_SECS: u64 = 30;

/// Call the LLM with bounded retry (3 attempts, exponential backoff
/// 3s → 30s) and parse the response as JSON.
///
/// Transport failures are retried; a JSON extraction failure on the final
/// text is not — the model answered, it just answered badly.
pub async fn call_json(
    llm: &dyn Llm,
    tier: Tier,
    system_prompt: &str,
    user_prompt: &str,
    max_tokens: u32,
) -> Result<serde_json::Value, LlmError> {
    let mut last_err = None;
    for attempt in 0..RETRY_ATTEMPTS {
        if attempt > 0 {
            let delay = (BACKOFF_BASE_SECS << (attempt - 1)).min(BACKOFF_CAP_SECS);
            log::debug!("LLM retry {attempt} on {tier} tier after {delay}s");
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        match llm.invoke(tier, system_prompt, user_prompt, max_tokens).await {
            Ok(text) => return extract_json(&text),
            Err(e) => {
                log::warn!("LLM call failed (attempt {}/{RETRY_ATTEMPTS}): {e}", attempt + 1);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| LlmError::Transport("no attempts made".to_string())))
}

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?\s*```").unwrap());

/// Extract and parse JSON from LLM response text.
///
/// Handles pure JSON, JSON inside ```json fences, and JSON embedded in
/// surrounding prose (first `{`/`[` to the matching last `}`/`]`).
pub fn extract_json(text: &str) -> Result<serde_json::Value, LlmError> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }

    if let Some(caps) = FENCE_RE.captures(text) {
        if let Ok(value) = serde_json::from_str(&caps[1]) {
            return Ok(value);
        }
    }

    for (opener, closer) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(opener), text.rfind(closer)) {
            if end > start {
                if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    let preview: String = text.chars().take(200).collect();
    Err(LlmError::Json(preview))
}

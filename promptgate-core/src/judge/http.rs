//! Default completion-service adapter: OpenAI-style chat completions over
//! HTTP. Applications with bespoke providers implement
//! [`CompletionService`](super::CompletionService) themselves.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{CompletionRequest, CompletionResponse, CompletionService};

pub struct ChatCompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl ChatCompletionClient {
    /// `base_url` is the API root (e.g. `https://api.openai.com/v1`).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env() -> Result<Self, String> {
        let base_url = std::env::var("PROMPTGATE_JUDGE_BASE_URL")
            .map_err(|_| "Missing PROMPTGATE_JUDGE_BASE_URL")?;
        let api_key = std::env::var("PROMPTGATE_JUDGE_API_KEY")
            .map_err(|_| "Missing PROMPTGATE_JUDGE_API_KEY")?;
        Ok(Self::new(base_url, api_key))
    }
}

#[async_trait]
impl CompletionService for ChatCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> CompletionResponse {
        let started = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": request.model,
            "messages": [
                ChatMessage { role: "system", content: &request.system_prompt },
                ChatMessage { role: "user", content: &request.user_prompt },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return CompletionResponse::failure(
                    e.to_string(),
                    &request.model,
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        if !response.status().is_success() {
            return CompletionResponse::failure(
                format!("judge endpoint returned {}", response.status()),
                &request.model,
                latency_ms,
            );
        }

        let parsed: ChatResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                return CompletionResponse::failure(e.to_string(), &request.model, latency_ms)
            }
        };

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        debug!(
            model = %parsed.model,
            prompt_tokens = parsed.usage.prompt_tokens,
            completion_tokens = parsed.usage.completion_tokens,
            latency_ms,
            "judge completion received"
        );

        CompletionResponse {
            success: !content.is_empty(),
            error: if content.is_empty() {
                Some("empty completion".to_string())
            } else {
                None
            },
            content,
            model: if parsed.model.is_empty() {
                request.model
            } else {
                parsed.model
            },
            prompt_tokens: parsed.usage.prompt_tokens,
            completion_tokens: parsed.usage.completion_tokens,
            latency_ms,
        }
    }
}

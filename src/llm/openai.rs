//! OpenAI Chat Completions API client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::ProviderError;
use crate::llm::provider::{
    GenerationClient, GenerationOptions, GenerationResult, retry_after_header, status_error,
    transport_error,
};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI-backed generation client. Lazily initialized like
/// [`AnthropicClient`](crate::llm::AnthropicClient).
pub struct OpenAiClient {
    model: String,
    api_key: Option<SecretString>,
    http: OnceCell<reqwest::Client>,
}

impl OpenAiClient {
    pub fn new(model: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            model: model.into(),
            api_key,
            http: OnceCell::new(),
        }
    }

    async fn http(&self) -> Result<&reqwest::Client, ProviderError> {
        self.http
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .build()
                    .map_err(|e| ProviderError::Unavailable {
                        provider: "openai".to_string(),
                        reason: format!("failed to build HTTP client: {e}"),
                    })
            })
            .await
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

#[async_trait]
impl GenerationClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> Result<GenerationResult, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::Misconfigured {
                provider: "openai".to_string(),
                reason: "no API key configured (set OPENAI_API_KEY)".to_string(),
            }
        })?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
        };

        debug!(model = %self.model, "Calling OpenAI Chat Completions API");

        let response = self
            .http()
            .await?
            .post(API_URL)
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("openai", e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("openai", status, retry_after, body));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::Unavailable {
                provider: "openai".to_string(),
                reason: format!("unreadable response body: {e}"),
            }
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Unavailable {
                provider: "openai".to_string(),
                reason: "response contained no choices".to_string(),
            })?;

        let mut metadata = HashMap::new();
        metadata.insert("model".to_string(), self.model.clone());
        if let Some(finish_reason) = choice.finish_reason {
            metadata.insert("finish_reason".to_string(), finish_reason);
        }

        Ok(GenerationResult {
            content: choice.message.content.unwrap_or_default(),
            tokens_used: parsed.usage.total_tokens,
            metadata,
        })
    }
}

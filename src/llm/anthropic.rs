//! Anthropic Messages API client.

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

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Anthropic-backed generation client.
///
/// The HTTP client is built on first use, so constructing this (or selecting
/// another provider entirely) never requires credentials to be present.
pub struct AnthropicClient {
    model: String,
    api_key: Option<SecretString>,
    http: OnceCell<reqwest::Client>,
}

impl AnthropicClient {
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
                        provider: "anthropic".to_string(),
                        reason: format!("failed to build HTTP client: {e}"),
                    })
            })
            .await
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl GenerationClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> Result<GenerationResult, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::Misconfigured {
                provider: "anthropic".to_string(),
                reason: "no API key configured (set ANTHROPIC_API_KEY)".to_string(),
            }
        })?;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.model, "Calling Anthropic Messages API");

        let response = self
            .http()
            .await?
            .post(API_URL)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("anthropic", e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("anthropic", status, retry_after, body));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            ProviderError::Unavailable {
                provider: "anthropic".to_string(),
                reason: format!("unreadable response body: {e}"),
            }
        })?;

        let content = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        let mut metadata = HashMap::new();
        metadata.insert("model".to_string(), self.model.clone());
        if let Some(stop_reason) = parsed.stop_reason {
            metadata.insert("stop_reason".to_string(), stop_reason);
        }
        metadata.insert(
            "input_tokens".to_string(),
            parsed.usage.input_tokens.to_string(),
        );
        metadata.insert(
            "output_tokens".to_string(),
            parsed.usage.output_tokens.to_string(),
        );

        Ok(GenerationResult {
            content,
            tokens_used: parsed.usage.input_tokens + parsed.usage.output_tokens,
            metadata,
        })
    }
}

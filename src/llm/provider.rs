//! Generation provider seam.
//!
//! Everything the engine knows about a backend is the `generate` capability;
//! concrete clients live behind `Arc<dyn GenerationClient>`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;

/// Per-call generation parameters.
///
/// Low temperature by default — extraction wants determinism, not prose.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 512,
        }
    }
}

/// Standardized output of one generation call.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Raw text output from the provider.
    pub content: String,
    /// Total tokens consumed by the call.
    pub tokens_used: u32,
    /// Provider-specific metadata, opaque to the engine.
    pub metadata: HashMap<String, String>,
}

/// A text-generation backend.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Provider name as recorded in logs and metadata.
    fn name(&self) -> &str;

    /// Generate text from a prompt.
    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> Result<GenerationResult, ProviderError>;
}

/// Map a reqwest transport failure onto a provider error.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        ProviderError::Unavailable {
            provider: provider.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Map a non-success HTTP status onto a provider error.
pub(crate) fn status_error(
    provider: &str,
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthFailed {
            provider: provider.to_string(),
        },
        429 => ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        _ => ProviderError::Unavailable {
            provider: provider.to_string(),
            reason: format!("HTTP {status}: {body}"),
        },
    }
}

/// Read a `retry-after` header as a whole-second duration.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

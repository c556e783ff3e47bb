//! Generation provider integration.
//!
//! Supports:
//! - **Anthropic**: Messages API over reqwest
//! - **OpenAI**: Chat Completions API over reqwest
//! - **Mock**: deterministic test double, no network
//!
//! Providers are selected by configuration from a closed set and initialized
//! lazily — selecting one backend never requires another backend's
//! credentials to be present.

mod anthropic;
mod mock;
mod openai;
pub mod provider;

pub use anthropic::AnthropicClient;
pub use mock::MockClient;
pub use openai::OpenAiClient;
pub use provider::{GenerationClient, GenerationOptions, GenerationResult};

use std::sync::Arc;

use tracing::info;

use crate::config::{ParseConfig, ProviderSelector};

/// Create a generation client from configuration.
///
/// Construction is infallible: credential checks are deferred to the first
/// `generate` call, where a missing key surfaces as
/// [`ProviderError::Misconfigured`](crate::error::ProviderError).
pub fn create_client(config: &ParseConfig) -> Arc<dyn GenerationClient> {
    match config.provider {
        ProviderSelector::Mock => {
            info!("Using mock generation client");
            Arc::new(MockClient::new())
        }
        ProviderSelector::Anthropic => {
            info!(model = %config.model, "Using Anthropic");
            Arc::new(AnthropicClient::new(&config.model, config.api_key.clone()))
        }
        ProviderSelector::OpenAi => {
            info!(model = %config.model, "Using OpenAI");
            Arc::new(OpenAiClient::new(&config.model, config.api_key.clone()))
        }
    }
}

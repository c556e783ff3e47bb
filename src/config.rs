//! Configuration types.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Which generation backend the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSelector {
    /// Deterministic test double — no network, no credentials.
    Mock,
    Anthropic,
    OpenAi,
}

impl ProviderSelector {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }
}

impl std::str::FromStr for ProviderSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                key: "provider".to_string(),
                message: format!("unknown provider '{other}'"),
            }),
        }
    }
}

/// Engine configuration.
///
/// Immutable for the lifetime of one engine: passed in at construction and
/// never mutated internally. Extraction logic reads only this value, never
/// ambient process state.
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Minimum confidence to accept a generative result without fallback.
    pub confidence_threshold: f32,
    /// Whether extraction prompts embed worked examples.
    pub use_few_shot: bool,
    /// Which generation backend to use.
    pub provider: ProviderSelector,
    /// Provider-specific model identifier.
    pub model: String,
    /// API key for network-backed providers. Checked lazily at first use.
    pub api_key: Option<SecretString>,
    /// Maximum concurrent per-item orchestrations in a batch run.
    pub batch_concurrency_limit: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            use_few_shot: true,
            provider: ProviderSelector::Mock,
            model: "mock-model".to_string(),
            api_key: None,
            batch_concurrency_limit: 5,
        }
    }
}

impl ParseConfig {
    /// Load configuration from `FINMAIL_*` environment variables, falling
    /// back to defaults for anything unset.
    ///
    /// Recognized variables: `FINMAIL_PROVIDER`, `FINMAIL_MODEL`,
    /// `FINMAIL_CONFIDENCE_THRESHOLD`, `FINMAIL_USE_FEW_SHOT`,
    /// `FINMAIL_BATCH_CONCURRENCY`, and the provider key variables
    /// `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(provider) = std::env::var("FINMAIL_PROVIDER") {
            config.provider = provider.parse()?;
        }

        config.model = match std::env::var("FINMAIL_MODEL") {
            Ok(model) => model,
            Err(_) => match config.provider {
                ProviderSelector::Mock => "mock-model".to_string(),
                ProviderSelector::Anthropic => "claude-sonnet-4-20250514".to_string(),
                ProviderSelector::OpenAi => "gpt-4o".to_string(),
            },
        };

        if let Ok(raw) = std::env::var("FINMAIL_CONFIDENCE_THRESHOLD") {
            let threshold: f32 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "FINMAIL_CONFIDENCE_THRESHOLD".to_string(),
                message: format!("'{raw}' is not a number"),
            })?;
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::InvalidValue {
                    key: "FINMAIL_CONFIDENCE_THRESHOLD".to_string(),
                    message: format!("{threshold} outside [0.0, 1.0]"),
                });
            }
            config.confidence_threshold = threshold;
        }

        if let Ok(raw) = std::env::var("FINMAIL_USE_FEW_SHOT") {
            config.use_few_shot = matches!(raw.as_str(), "1" | "true" | "yes");
        }

        if let Ok(raw) = std::env::var("FINMAIL_BATCH_CONCURRENCY") {
            config.batch_concurrency_limit =
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "FINMAIL_BATCH_CONCURRENCY".to_string(),
                    message: format!("'{raw}' is not an integer"),
                })?;
        }

        let key_var = match config.provider {
            ProviderSelector::Mock => None,
            ProviderSelector::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderSelector::OpenAi => Some("OPENAI_API_KEY"),
        };
        if let Some(var) = key_var
            && let Ok(key) = std::env::var(var)
        {
            config.api_key = Some(SecretString::from(key));
        }

        Ok(config)
    }
}

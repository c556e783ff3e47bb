//! Error types for finmail-parse.

use std::time::Duration;

/// Top-level error type for the parsing engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Item not found: {0}")]
    ItemNotFound(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Generation provider errors.
///
/// Every variant except [`ProviderError::Misconfigured`] is recoverable from
/// the engine's perspective: the generative attempt is recorded as failed and
/// the rule extractor takes over. `Misconfigured` means the selected provider
/// cannot work at all (no credentials) and is fatal at first use.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} timed out")]
    Timeout { provider: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} misconfigured: {reason}")]
    Misconfigured { provider: String, reason: String },
}

impl ProviderError {
    /// Whether the engine may recover by falling back to rule extraction.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Misconfigured { .. })
    }

    /// Short stable label recorded in the attempt log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "provider_timeout",
            Self::RateLimited { .. } => "provider_rate_limited",
            Self::Unavailable { .. } => "provider_unavailable",
            Self::AuthFailed { .. } => "provider_auth_failed",
            Self::Misconfigured { .. } => "provider_misconfigured",
        }
    }
}

/// Errors decoding a provider response into an extraction candidate.
///
/// All decode errors are non-fatal: they count as a failed generative attempt
/// and trigger the rule fallback.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Response is not well-formed JSON: {0}")]
    MalformedJson(String),

    #[error("Response missing required key: {0}")]
    MissingField(&'static str),

    #[error("Response omitted an explicit confidence value")]
    MissingConfidence,

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

impl DecodeError {
    /// Short stable label recorded in the attempt log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedJson(_) => "response_malformed_json",
            Self::MissingField(_) => "response_missing_field",
            Self::MissingConfidence => "response_missing_confidence",
            Self::InvalidValue { .. } => "response_invalid_value",
        }
    }
}

/// Persistence/collaborator errors from the item source and sinks.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Write failed: {0}")]
    Write(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },
}

/// Result type alias for the parsing engine.
pub type Result<T> = std::result::Result<T, Error>;

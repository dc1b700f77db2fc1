use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Startup configuration problems. Fatal: the bot refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Discord token missing: set BEHIND_BARS_DISCORD_TOKEN")]
    MissingToken,

    #[error("API key missing for LLM backend '{backend}': set BEHIND_BARS_LLM_API_KEY")]
    MissingApiKey { backend: String },

    #[error("chunk_overlap ({overlap}) must be less than chunk_size ({size}), and chunk_size must be positive")]
    InvalidChunking { size: usize, overlap: usize },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The embedding service could not be used. Recovered by keyword search.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding provider '{provider}' unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("embedding provider returned {got} vectors for {expected} inputs")]
    Mismatch { expected: usize, got: usize },
}

/// Failures of the answer-generation backend.
///
/// Only [`GenerationError::RateLimited`] is worth retrying; the orchestrator
/// surfaces the rest to the user straight away.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("authentication with the LLM backend failed ({status})")]
    Authentication { status: u16 },

    #[error("rate limited by the LLM backend")]
    RateLimited { retry_after: Option<Duration> },

    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM backend reported a timeout ({status})")]
    UpstreamTimeout { status: u16 },

    #[error("network error talking to the LLM backend: {0}")]
    Network(String),

    #[error("LLM backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed LLM response: {0}")]
    Malformed(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::RateLimited { .. })
    }

    /// Short plain-language message for Discord users.
    pub fn user_message(&self) -> &'static str {
        match self {
            GenerationError::Authentication { .. } => {
                "Sorry, I can't reach my answer service right now (it rejected my credentials). Please let a server admin know."
            }
            GenerationError::RateLimited { .. } => {
                "Sorry, I'm getting too many questions at once. Please try again in a minute."
            }
            GenerationError::Timeout(_) | GenerationError::UpstreamTimeout { .. } => {
                "Sorry, that took too long to answer. Please try again."
            }
            GenerationError::Network(_) | GenerationError::Api { .. } | GenerationError::Malformed(_) => {
                "Sorry, something went wrong while I was putting an answer together. Please try again later."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limit_is_retryable() {
        assert!(GenerationError::RateLimited { retry_after: None }.is_retryable());
        assert!(!GenerationError::Authentication { status: 401 }.is_retryable());
        assert!(!GenerationError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!GenerationError::UpstreamTimeout { status: 504 }.is_retryable());
        assert!(!GenerationError::Network("reset".into()).is_retryable());
    }

    #[test]
    fn user_messages_hide_internals() {
        let err = GenerationError::Api {
            status: 500,
            message: "stack trace at line 42".into(),
        };
        assert!(!err.user_message().contains("42"));
        assert!(err.user_message().starts_with("Sorry"));
    }
}

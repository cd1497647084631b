// src/infra/errors.rs — Error types for Delve

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DelveError {
    // Provider errors (retriable)
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    // Work-unit errors (isolated, never fatal to the loop)
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Task '{angle}' produced no results")]
    EmptyTask { angle: String },

    #[error("Parse error: {0}")]
    Parse(String),

    // Configuration
    #[error("Invalid rate limit for {window}: {limit} (must be > 0)")]
    InvalidLimit { window: String, limit: i64 },

    #[error("No provider configured. Set ANTHROPIC_API_KEY or configure [provider] in config.toml.")]
    NoProvider,

    #[error("Configuration error: {0}")]
    Config(String),

    // Infra
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DelveError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DelveError::Provider {
                retriable: true,
                ..
            } | DelveError::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let e = DelveError::Provider {
            provider: "anthropic".into(),
            message: "503".into(),
            retriable: true,
        };
        assert!(e.is_retriable());
        assert!(DelveError::RateLimited {
            provider: "anthropic".into(),
            retry_after_ms: 1000
        }
        .is_retriable());
        assert!(!DelveError::Validation("bad query".into()).is_retriable());
        assert!(!DelveError::NoProvider.is_retriable());
    }

    #[test]
    fn test_invalid_limit_message() {
        let e = DelveError::InvalidLimit {
            window: "minute".into(),
            limit: 0,
        };
        assert_eq!(e.to_string(), "Invalid rate limit for minute: 0 (must be > 0)");
    }
}

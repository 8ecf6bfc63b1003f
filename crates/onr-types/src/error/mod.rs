//! Typed error definitions for Open-Next-Router.
//!
//! This module provides a structured error hierarchy with specific error types
//! for different domains. All errors are designed to be:
//!
//! - **Serializable** for API responses via serde
//! - **Displayable** for logging via Display trait
//! - **Matchable** for error handling logic via enum variants
//! - **Composable** via thiserror derive macros

mod config;
mod provider;
mod proxy;

pub use config::ConfigError;
pub use provider::ProviderError;
pub use proxy::ProxyError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type that wraps all domain-specific errors.
///
/// Use this when you need a single error type that can represent
/// any gateway error.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "domain", content = "error")]
pub enum TypedError {
    /// Wraps a configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Wraps a provider DSL error
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Wraps a proxy operation error
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),
}

/// Standard Result type using TypedError.
pub type Result<T> = std::result::Result<T, TypedError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = TypedError::Proxy(ProxyError::UnknownModel { model: "gpt-x".to_string() });

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Proxy"));
        assert!(json.contains("gpt-x"));

        let deserialized: TypedError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, deserialized);
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::Invalid {
            file: "openai.conf".to_string(),
            message: "base_url must be an absolute URL".to_string(),
        };

        let msg = format!("{}", err);
        assert!(msg.contains("openai.conf"));
        assert!(msg.contains("absolute URL"));
    }
}

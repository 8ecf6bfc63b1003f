//! Proxy-related errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while forwarding a request to an upstream provider.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ProxyError {
    /// All credential checks failed (master key, access-key pool, token-key)
    #[error("unauthorized")]
    Unauthorized,

    /// Model not present in the models file and no provider override given
    #[error("No route for model: {model}")]
    UnknownModel {
        /// The model identifier with no configured route
        model: String,
    },

    /// Dial/TLS/timeout before upstream response headers arrived
    #[error("Upstream {provider} connect failed: {message}")]
    UpstreamConnect {
        /// Name of the upstream provider
        provider: String,
        /// Detailed connect error message
        message: String,
    },

    /// Non-2xx status from upstream (body is normalized per error_map)
    #[error("Upstream {provider} returned status {status}")]
    UpstreamHttp {
        /// Name of the upstream provider
        provider: String,
        /// HTTP status code returned by the upstream
        status: u16,
    },

    /// Request body codec failed
    #[error("Request transform failed: {message}")]
    BodyTransform {
        /// Description of the codec failure
        message: String,
    },

    /// OAuth token exchange failed
    #[error("oauth acquire failed: {message}")]
    OAuthAcquire {
        /// Upstream status or decode error
        message: String,
    },

    /// Client disconnected mid-stream; treated as a normal close
    #[error("Stream cancelled by client")]
    StreamCancelled,

    /// Internal proxy error (bugs, unexpected states)
    #[error("Internal proxy error: {message}")]
    Internal {
        /// Description of the internal error
        message: String,
    },
}

impl ProxyError {
    /// Get HTTP status code for this error.
    pub const fn http_status_code(&self) -> u16 {
        match *self {
            Self::Unauthorized => 401,
            Self::UnknownModel { .. } => 404,
            Self::UpstreamConnect { .. } | Self::OAuthAcquire { .. } => 502,
            Self::UpstreamHttp { status, .. } => status,
            Self::BodyTransform { .. } => 400,
            Self::StreamCancelled => 499,
            Self::Internal { .. } => 500,
        }
    }

    /// OpenAI-style error code string used in JSON error bodies.
    pub const fn code(&self) -> &'static str {
        match *self {
            Self::Unauthorized => "invalid_api_key",
            Self::UnknownModel { .. } => "model_not_found",
            Self::UpstreamConnect { .. } => "upstream_connect_error",
            Self::UpstreamHttp { .. } => "upstream_error",
            Self::BodyTransform { .. } => "invalid_request_error",
            Self::OAuthAcquire { .. } => "oauth_acquire_failed",
            Self::StreamCancelled => "stream_cancelled",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether a retry with the next rotated upstream key is allowed.
    /// Only pre-header connect failures qualify.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamConnect { .. })
    }
}

//! Per-request runtime metadata threaded through DSL evaluation.

/// Carries the resolved routing facts for one request. Exclusively owned by
/// that request's task; never shared across requests.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    /// API name, e.g. `chat.completions`, `responses`, `claude.messages`,
    /// `embeddings`, `gemini.generate_content`.
    pub api: String,
    /// Whether the client asked for a streaming response.
    pub is_stream: bool,

    /// Resolved provider name (lower-case).
    pub provider: String,
    /// Model as requested by the client.
    pub model: String,
    /// Model after `model_map` / `model_map_default`.
    pub model_mapped: String,

    /// Upstream base URL (provider literal or keystore override).
    pub base_url: String,
    /// Upstream path after `set_path`.
    pub path: String,
    /// Query string after `set_query` / `del_query` (no leading `?`).
    pub query: String,

    /// Chosen upstream API key value.
    pub channel_key: String,
    /// Keystore `base_url_override` for the chosen key, when present.
    pub channel_base_url: String,
    /// OAuth access token acquired for this request, when configured.
    pub oauth_access_token: String,
}

impl Meta {
    pub fn new(api: &str, is_stream: bool) -> Self {
        Self { api: api.to_string(), is_stream, ..Self::default() }
    }

    /// The model name to report upstream: mapped when a mapping applied,
    /// otherwise the client's model.
    pub fn effective_model(&self) -> &str {
        if self.model_mapped.is_empty() {
            &self.model
        } else {
            &self.model_mapped
        }
    }
}

//! Gateway configuration model.
//!
//! Mirrors the YAML layout of the gateway config file. Loading, env-var
//! overlay and validation live in `onr-core::config`; this module only
//! defines the shape and defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Full gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    /// Outbound HTTP proxy by provider name (values are proxy URLs).
    #[serde(default)]
    pub upstream_proxies: UpstreamProxiesConfig,
    #[serde(default)]
    pub usage_estimation: UsageEstimationConfig,
    #[serde(default)]
    pub traffic_dump: TrafficDumpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub listen: String,
    #[serde(default)]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub write_timeout_ms: u64,
    #[serde(default)]
    pub pid_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: String::new(),
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            pid_file: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AuthConfig {
    /// Master API key. Empty disables master-key auth.
    #[serde(default)]
    pub api_key: String,
    /// Controls `onr:v1` token-key auth behavior.
    #[serde(default)]
    pub token_key: TokenKeyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TokenKeyConfig {
    /// Allow BYOK token keys that only carry `uk` without `k`/`k64`.
    /// Default false for safety.
    #[serde(default)]
    pub allow_byok_without_k: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProvidersConfig {
    /// Directory holding `<name>.conf` provider files.
    #[serde(default)]
    pub dir: String,
    /// Watches `providers.dir` and reloads provider DSL files at runtime.
    #[serde(default)]
    pub auto_reload: AutoReloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AutoReloadConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct KeysConfig {
    #[serde(default)]
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelsConfig {
    /// Optional models list file. When missing, `/v1/models` returns an
    /// empty list.
    #[serde(default)]
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OAuthConfig {
    /// Controls whether OAuth access tokens are persisted to disk.
    #[serde(default)]
    pub token_persist: TokenPersistConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TokenPersistConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PricingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Base model pricing data.
    #[serde(default)]
    pub file: String,
    /// Local pricing overrides (channel/provider multipliers and model
    /// overrides).
    #[serde(default)]
    pub overrides_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UpstreamProxiesConfig {
    #[serde(default)]
    pub by_provider: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageEstimationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Rough chars-per-token ratio used when a provider reports no usage.
    #[serde(default)]
    pub chars_per_token: f64,
}

impl Default for UsageEstimationConfig {
    fn default() -> Self {
        Self { enabled: false, chars_per_token: 0.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TrafficDumpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dir: String,
    /// File path template; `{{.request_id}}` expands to the request id.
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub max_bytes: i64,
    #[serde(default)]
    pub mask_secrets: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub access_log: Option<bool>,
    #[serde(default)]
    pub access_log_path: String,
    #[serde(default)]
    pub access_log_format: String,
    #[serde(default)]
    pub access_log_format_preset: String,
    #[serde(default)]
    pub access_log_rotate: AccessLogRotateConfig,
    #[serde(default)]
    pub appname_infer: AppNameInferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AccessLogRotateConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_age_days: Option<i64>,
    #[serde(default)]
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppNameInferConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Value logged when inference fails; empty logs nothing.
    #[serde(default)]
    pub unknown: String,
}

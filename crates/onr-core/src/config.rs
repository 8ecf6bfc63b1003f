//! Config loading: YAML, then defaults, then env overrides, then
//! validation. Env overrides are re-evaluated on every load so reload picks
//! up rotated values without a restart.

use onr_types::{Config, ConfigError};
use std::collections::HashMap;

const DEFAULT_ACCESS_LOG_ROTATE_MAX_SIZE_MB: u64 = 100;
const DEFAULT_ACCESS_LOG_ROTATE_MAX_BACKUPS: usize = 14;
const DEFAULT_ACCESS_LOG_ROTATE_MAX_AGE_DAYS: i64 = 14;

pub fn load(path: &str) -> Result<Config, ConfigError> {
    let bytes = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    let mut cfg: Config = serde_yaml::from_str(&bytes).map_err(|e| ConfigError::Parse {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    apply_defaults(&mut cfg);
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

pub fn apply_defaults(cfg: &mut Config) {
    if cfg.server.listen.trim().is_empty() {
        cfg.server.listen = ":3300".to_string();
    }
    if cfg.server.read_timeout_ms == 0 {
        cfg.server.read_timeout_ms = 60_000;
    }
    if cfg.server.write_timeout_ms == 0 {
        cfg.server.write_timeout_ms = 60_000;
    }
    if cfg.server.pid_file.trim().is_empty() {
        cfg.server.pid_file = "/var/run/onr.pid".to_string();
    }
    if cfg.providers.dir.trim().is_empty() {
        cfg.providers.dir = "./config/providers".to_string();
    }
    if cfg.providers.auto_reload.debounce_ms == 0 {
        cfg.providers.auto_reload.debounce_ms = 300;
    }
    if cfg.keys.file.trim().is_empty() {
        cfg.keys.file = "./keys.yaml".to_string();
    }
    if cfg.models.file.trim().is_empty() {
        cfg.models.file = "./models.yaml".to_string();
    }
    if cfg.oauth.token_persist.dir.trim().is_empty() {
        cfg.oauth.token_persist.dir = "./run/oauth".to_string();
    }
    if cfg.pricing.file.trim().is_empty() {
        cfg.pricing.file = "./price.yaml".to_string();
    }
    if cfg.pricing.overrides_file.trim().is_empty() {
        cfg.pricing.overrides_file = "./price_overrides.yaml".to_string();
    }

    cfg.upstream_proxies.by_provider =
        normalize_provider_string_map(&cfg.upstream_proxies.by_provider);

    if cfg.usage_estimation.chars_per_token <= 0.0 {
        cfg.usage_estimation.chars_per_token = 4.0;
    }

    if cfg.traffic_dump.dir.trim().is_empty() {
        cfg.traffic_dump.dir = "./dumps".to_string();
    }
    if cfg.traffic_dump.file_path.trim().is_empty() {
        cfg.traffic_dump.file_path = "{{.request_id}}.log".to_string();
    }
    if cfg.traffic_dump.max_bytes == 0 {
        cfg.traffic_dump.max_bytes = 1024 * 1024;
    }
    if cfg.traffic_dump.mask_secrets.is_none() {
        cfg.traffic_dump.mask_secrets = Some(true);
    }

    if cfg.logging.level.trim().is_empty() {
        cfg.logging.level = "info".to_string();
    }
    if cfg.logging.access_log.is_none() {
        cfg.logging.access_log = Some(true);
    }
    if cfg.logging.access_log_rotate.max_size_mb.is_none() {
        cfg.logging.access_log_rotate.max_size_mb = Some(DEFAULT_ACCESS_LOG_ROTATE_MAX_SIZE_MB);
    }
    if cfg.logging.access_log_rotate.max_backups.is_none() {
        cfg.logging.access_log_rotate.max_backups = Some(DEFAULT_ACCESS_LOG_ROTATE_MAX_BACKUPS);
    }
    if cfg.logging.access_log_rotate.max_age_days.is_none() {
        cfg.logging.access_log_rotate.max_age_days = Some(DEFAULT_ACCESS_LOG_ROTATE_MAX_AGE_DAYS);
    }
}

pub fn apply_env_overrides(cfg: &mut Config) {
    apply_env_server_auth(cfg);
    apply_env_provider_and_data(cfg);
    apply_env_provider_proxies(cfg);
    apply_env_traffic_dump(cfg);
    apply_env_logging(cfg);
}

fn apply_env_server_auth(cfg: &mut Config) {
    if let Some(v) = env_str("ONR_LISTEN") {
        cfg.server.listen = v;
    }
    if let Some(v) = env_str("ONR_API_KEY") {
        cfg.auth.api_key = v;
    }
    cfg.auth.token_key.allow_byok_without_k =
        env_bool("ONR_TOKEN_KEY_ALLOW_BYOK_WITHOUT_K", cfg.auth.token_key.allow_byok_without_k);
    if let Some(n) = env_u64("ONR_READ_TIMEOUT_MS").filter(|n| *n > 0) {
        cfg.server.read_timeout_ms = n;
    }
    if let Some(n) = env_u64("ONR_WRITE_TIMEOUT_MS").filter(|n| *n > 0) {
        cfg.server.write_timeout_ms = n;
    }
    if let Some(v) = env_str("ONR_PID_FILE") {
        cfg.server.pid_file = v;
    }
}

fn apply_env_provider_and_data(cfg: &mut Config) {
    if let Some(v) = env_str("ONR_PROVIDERS_DIR") {
        cfg.providers.dir = v;
    }
    cfg.providers.auto_reload.enabled =
        env_bool("ONR_PROVIDERS_AUTO_RELOAD_ENABLED", cfg.providers.auto_reload.enabled);
    if let Some(n) = env_u64("ONR_PROVIDERS_AUTO_RELOAD_DEBOUNCE_MS") {
        cfg.providers.auto_reload.debounce_ms = n;
    }
    if let Some(v) = env_str("ONR_KEYS_FILE") {
        cfg.keys.file = v;
    }
    if let Some(v) = env_str("ONR_MODELS_FILE") {
        cfg.models.file = v;
    }
    cfg.oauth.token_persist.enabled =
        env_bool("ONR_OAUTH_TOKEN_PERSIST_ENABLED", cfg.oauth.token_persist.enabled);
    if let Some(v) = env_str("ONR_OAUTH_TOKEN_PERSIST_DIR") {
        cfg.oauth.token_persist.dir = v;
    }
    cfg.pricing.enabled = env_bool("ONR_PRICING_ENABLED", cfg.pricing.enabled);
    if let Some(v) = env_str("ONR_PRICE_FILE") {
        cfg.pricing.file = v;
    }
    if let Some(v) = env_str("ONR_PRICE_OVERRIDES_FILE") {
        cfg.pricing.overrides_file = v;
    }
    cfg.usage_estimation.enabled =
        env_bool("ONR_USAGE_ESTIMATION_ENABLED", cfg.usage_estimation.enabled);
}

fn apply_env_provider_proxies(cfg: &mut Config) {
    const PREFIX: &str = "ONR_UPSTREAM_PROXY_";
    for (key, value) in std::env::vars() {
        let Some(raw) = key.strip_prefix(PREFIX) else {
            continue;
        };
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            continue;
        }
        let provider = raw.to_lowercase();
        let value = value.trim().to_string();
        // empty value unsets the provider's proxy
        if value.is_empty() {
            cfg.upstream_proxies.by_provider.remove(&provider);
        } else {
            cfg.upstream_proxies.by_provider.insert(provider, value);
        }
    }
}

fn apply_env_traffic_dump(cfg: &mut Config) {
    cfg.traffic_dump.enabled = env_bool("ONR_TRAFFIC_DUMP_ENABLED", cfg.traffic_dump.enabled);
    if let Some(v) = env_str("ONR_TRAFFIC_DUMP_DIR") {
        cfg.traffic_dump.dir = v;
    }
    if let Some(v) = env_str("ONR_TRAFFIC_DUMP_FILE_PATH") {
        cfg.traffic_dump.file_path = v;
    }
    if let Some(n) = env_i64("ONR_TRAFFIC_DUMP_MAX_BYTES") {
        cfg.traffic_dump.max_bytes = n;
    }
    if let Some(default) = cfg.traffic_dump.mask_secrets {
        cfg.traffic_dump.mask_secrets =
            Some(env_bool("ONR_TRAFFIC_DUMP_MASK_SECRETS", default));
    }
}

fn apply_env_logging(cfg: &mut Config) {
    if let Some(v) = env_str("ONR_ACCESS_LOG_PATH") {
        cfg.logging.access_log_path = v;
    }
    if let Some(v) = env_str("ONR_ACCESS_LOG_FORMAT") {
        cfg.logging.access_log_format = v;
    }
    if let Some(v) = env_str("ONR_ACCESS_LOG_FORMAT_PRESET") {
        cfg.logging.access_log_format_preset = v;
    }
    cfg.logging.access_log_rotate.enabled =
        env_bool("ONR_ACCESS_LOG_ROTATE_ENABLED", cfg.logging.access_log_rotate.enabled);
    if let Some(n) = env_u64("ONR_ACCESS_LOG_ROTATE_MAX_SIZE_MB") {
        cfg.logging.access_log_rotate.max_size_mb = Some(n);
    }
    if let Some(n) = env_u64("ONR_ACCESS_LOG_ROTATE_MAX_BACKUPS") {
        cfg.logging.access_log_rotate.max_backups = Some(n as usize);
    }
    if let Some(n) = env_i64("ONR_ACCESS_LOG_ROTATE_MAX_AGE_DAYS") {
        cfg.logging.access_log_rotate.max_age_days = Some(n);
    }
    cfg.logging.access_log_rotate.compress =
        env_bool("ONR_ACCESS_LOG_ROTATE_COMPRESS", cfg.logging.access_log_rotate.compress);
}

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    for (provider, url) in &cfg.upstream_proxies.by_provider {
        if provider.trim().is_empty() || url.trim().is_empty() {
            continue;
        }
        // lightweight check; the proxy client validates when it builds
        if !url.contains("://") {
            return Err(ConfigError::Invalid {
                message: "upstream_proxies.by_provider must be a URL (e.g. http://127.0.0.1:7890)"
                    .to_string(),
            });
        }
    }
    if cfg.providers.auto_reload.enabled && cfg.providers.auto_reload.debounce_ms == 0 {
        return Err(ConfigError::Invalid {
            message: "providers.auto_reload.debounce_ms must be > 0 when providers.auto_reload.enabled=true"
                .to_string(),
        });
    }
    if cfg.traffic_dump.max_bytes < 0 {
        return Err(ConfigError::Invalid {
            message: "traffic_dump.max_bytes must be non-negative".to_string(),
        });
    }
    if cfg.oauth.token_persist.enabled && cfg.oauth.token_persist.dir.trim().is_empty() {
        return Err(ConfigError::Invalid {
            message: "oauth.token_persist.dir is required when oauth.token_persist.enabled=true"
                .to_string(),
        });
    }
    let rotate = &cfg.logging.access_log_rotate;
    if rotate.enabled {
        if cfg.logging.access_log != Some(true) {
            return Err(ConfigError::Invalid {
                message: "logging.access_log must be true when logging.access_log_rotate.enabled=true"
                    .to_string(),
            });
        }
        if cfg.logging.access_log_path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "logging.access_log_path is required when logging.access_log_rotate.enabled=true"
                    .to_string(),
            });
        }
    }
    if rotate.max_size_mb == Some(0) {
        return Err(ConfigError::Invalid {
            message: "logging.access_log_rotate.max_size_mb must be > 0".to_string(),
        });
    }
    if rotate.max_backups == Some(0) {
        return Err(ConfigError::Invalid {
            message: "logging.access_log_rotate.max_backups must be > 0".to_string(),
        });
    }
    if rotate.max_age_days.map(|n| n < 0).unwrap_or(false) {
        return Err(ConfigError::Invalid {
            message: "logging.access_log_rotate.max_age_days must be >= 0".to_string(),
        });
    }
    Ok(())
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_str(name)?.parse().ok()
}

fn env_i64(name: &str) -> Option<i64> {
    env_str(name)?.parse().ok()
}

fn env_bool(name: &str, default: bool) -> bool {
    let Some(v) = env_str(name) else {
        return default;
    };
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => true,
        "0" | "false" | "no" | "n" | "off" => false,
        _ => default,
    }
}

fn normalize_provider_string_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(map.len());
    for (k, v) in map {
        let key = k.trim().to_lowercase();
        let val = v.trim().to_string();
        if key.is_empty() || val.is_empty() {
            continue;
        }
        out.insert(key, val);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn write_cfg(content: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, content).unwrap();
        let p = path.to_string_lossy().into_owned();
        (dir, p)
    }

    #[test]
    fn test_defaults_fill_in() {
        let (_dir, path) = write_cfg("{}");
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.server.listen, ":3300");
        assert_eq!(cfg.server.read_timeout_ms, 60_000);
        assert_eq!(cfg.providers.dir, "./config/providers");
        assert_eq!(cfg.providers.auto_reload.debounce_ms, 300);
        assert_eq!(cfg.traffic_dump.max_bytes, 1024 * 1024);
        assert_eq!(cfg.traffic_dump.mask_secrets, Some(true));
        assert_eq!(cfg.logging.access_log, Some(true));
        assert_eq!(cfg.logging.access_log_rotate.max_size_mb, Some(100));
    }

    #[test]
    fn test_explicit_values_survive() {
        let (_dir, path) = write_cfg(
            r#"
server:
  listen: ":8080"
  read_timeout_ms: 5000
providers:
  dir: "/etc/onr/providers"
traffic_dump:
  enabled: true
  max_bytes: 2048
"#,
        );
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.server.listen, ":8080");
        assert_eq!(cfg.server.read_timeout_ms, 5000);
        assert_eq!(cfg.providers.dir, "/etc/onr/providers");
        assert!(cfg.traffic_dump.enabled);
        assert_eq!(cfg.traffic_dump.max_bytes, 2048);
    }

    #[test]
    fn test_rotate_validation() {
        let (_dir, path) = write_cfg(
            r#"
logging:
  access_log: true
  access_log_rotate:
    enabled: true
"#,
        );
        // rotate enabled without access_log_path fails
        assert!(load(&path).is_err());

        let (_dir2, path2) = write_cfg(
            r#"
logging:
  access_log: true
  access_log_path: "/var/log/onr/access.log"
  access_log_rotate:
    enabled: true
"#,
        );
        assert!(load(&path2).is_ok());
    }

    #[test]
    fn test_bad_proxy_url_rejected() {
        let (_dir, path) = write_cfg(
            r#"
upstream_proxies:
  by_provider:
    openai: "127.0.0.1:7890"
"#,
        );
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_provider_proxy_map_normalized() {
        let (_dir, path) = write_cfg(
            r#"
upstream_proxies:
  by_provider:
    " OpenAI ": "http://127.0.0.1:7890"
    empty: ""
"#,
        );
        let cfg = load(&path).unwrap();
        assert_eq!(
            cfg.upstream_proxies.by_provider.get("openai"),
            Some(&"http://127.0.0.1:7890".to_string())
        );
        assert!(!cfg.upstream_proxies.by_provider.contains_key("empty"));
    }
}

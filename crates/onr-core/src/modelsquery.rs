//! Upstream models-list query execution and extraction (admin surface).

use crate::balancequery::fetch_query_body;
use crate::dsl::ModelsQueryConfig;
use crate::jsonutil;
use crate::meta::Meta;
use crate::proxy::client::UpstreamClient;
use crate::proxy::executor::{eval_header_ops, resolve_query_url};
use serde_json::Value;

/// Query the provider's upstream model list and extract the ids.
pub async fn query_model_ids(
    client: &UpstreamClient,
    cfg: &ModelsQueryConfig,
    meta: &Meta,
) -> Result<Vec<String>, String> {
    let normalized = normalize_models_query_config(cfg);
    if normalized.mode.is_empty() {
        return Err("models query is not configured".to_string());
    }
    let base = if meta.channel_base_url.is_empty() {
        meta.base_url.as_str()
    } else {
        meta.channel_base_url.as_str()
    };
    let headers = eval_header_ops(&normalized.headers, meta);
    let url = resolve_query_url(base, &normalized.path);
    let body =
        fetch_query_body(client, &meta.provider, &normalized.method, &url, &headers).await?;
    extract_model_ids(&normalized, &body)
}

/// Fill in per-mode defaults: method, path, id paths, and the Gemini
/// `models/<id>` rewrite.
pub fn normalize_models_query_config(cfg: &ModelsQueryConfig) -> ModelsQueryConfig {
    let mut out = cfg.clone();
    out.mode = cfg.mode.trim().to_lowercase();
    if out.method.trim().is_empty() {
        out.method = "GET".to_string();
    }
    match out.mode.as_str() {
        "openai" => {
            if out.path.trim().is_empty() {
                out.path = "/v1/models".to_string();
            }
            if out.id_paths.is_empty() {
                out.id_paths = vec!["$.data[*].id".to_string()];
            }
        }
        "gemini" => {
            if out.path.trim().is_empty() {
                out.path = "/v1beta/models".to_string();
            }
            if out.id_paths.is_empty() {
                out.id_paths = vec!["$.models[*].name".to_string()];
            }
            if out.id_regex.trim().is_empty() {
                out.id_regex = "^models/(.+)$".to_string();
            }
        }
        _ => {}
    }
    out
}

/// Extract model ids from an upstream models response: collect by each id
/// path, rewrite via `id_regex` (first capture group wins), filter by
/// `id_allow_regex`, deduplicate preserving order.
pub fn extract_model_ids(cfg: &ModelsQueryConfig, body: &[u8]) -> Result<Vec<String>, String> {
    let normalized = normalize_models_query_config(cfg);
    if normalized.id_paths.is_empty() {
        return Ok(Vec::new());
    }
    let root: Value =
        serde_json::from_slice(body).map_err(|e| format!("parse response json: {e}"))?;

    let rewrite = compile_opt_regex(&normalized.id_regex, "id_regex")?;
    let allow = compile_opt_regex(&normalized.id_allow_regex, "id_allow_regex")?;

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for path in &normalized.id_paths {
        for v in jsonutil::get_values(&root, path) {
            let Some(raw) = v.as_str() else { continue };
            let mut id = raw.trim().to_string();
            if id.is_empty() {
                continue;
            }
            if let Some(re) = &rewrite {
                let Some(caps) = re.captures(&id) else { continue };
                id = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();
                if id.is_empty() {
                    continue;
                }
            }
            if let Some(re) = &allow {
                if !re.is_match(&id) {
                    continue;
                }
            }
            if seen.insert(id.clone()) {
                out.push(id);
            }
        }
    }
    Ok(out)
}

fn compile_opt_regex(src: &str, what: &str) -> Result<Option<regex::Regex>, String> {
    let s = src.trim();
    if s.is_empty() {
        return Ok(None);
    }
    regex::Regex::new(s).map(Some).map_err(|e| format!("invalid {what}: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_mode_defaults() {
        let cfg = ModelsQueryConfig { mode: "openai".to_string(), ..Default::default() };
        let body = br#"{"data":[{"id":"gpt-4o"},{"id":"gpt-4o-mini"},{"id":"gpt-4o"}]}"#;
        let ids = extract_model_ids(&cfg, body).unwrap();
        assert_eq!(ids, vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()]);

        let n = normalize_models_query_config(&cfg);
        assert_eq!(n.method, "GET");
        assert_eq!(n.path, "/v1/models");
    }

    #[test]
    fn test_gemini_mode_strips_models_prefix() {
        let cfg = ModelsQueryConfig { mode: "gemini".to_string(), ..Default::default() };
        let body = br#"{"models":[{"name":"models/gemini-pro"},{"name":"weird"}]}"#;
        let ids = extract_model_ids(&cfg, body).unwrap();
        assert_eq!(ids, vec!["gemini-pro".to_string()]);
    }

    #[test]
    fn test_allow_regex_filters() {
        let cfg = ModelsQueryConfig {
            mode: "custom".to_string(),
            id_paths: vec!["$.items[*].slug".to_string()],
            id_allow_regex: "^prod-".to_string(),
            ..Default::default()
        };
        let body = br#"{"items":[{"slug":"prod-a"},{"slug":"dev-b"},{"slug":"prod-c"}]}"#;
        let ids = extract_model_ids(&cfg, body).unwrap();
        assert_eq!(ids, vec!["prod-a".to_string(), "prod-c".to_string()]);
    }

    #[test]
    fn test_bad_json_is_an_error() {
        let cfg = ModelsQueryConfig { mode: "openai".to_string(), ..Default::default() };
        assert!(extract_model_ids(&cfg, b"nope").is_err());
    }

    #[tokio::test]
    async fn test_query_model_ids_rejects_unconfigured_mode() {
        let client =
            UpstreamClient::new(std::time::Duration::from_secs(1)).unwrap();
        let meta = Meta {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            ..Meta::default()
        };
        let err = query_model_ids(&client, &ModelsQueryConfig::default(), &meta)
            .await
            .unwrap_err();
        assert!(err.contains("not configured"), "{err}");
    }
}

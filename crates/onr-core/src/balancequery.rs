//! Balance query execution and extraction (admin surface, off the hot
//! path).

use crate::dsl::BalanceQueryConfig;
use crate::expr::BalanceExpr;
use crate::jsonutil;
use crate::meta::Meta;
use crate::proxy::client::UpstreamClient;
use crate::proxy::executor::{eval_header_ops, resolve_query_url};
use serde_json::Value;

const DEFAULT_SUBSCRIPTION_PATH: &str = "/v1/dashboard/billing/subscription";
const DEFAULT_USAGE_PATH: &str = "/v1/dashboard/billing/usage";

/// Extracted balance numbers for one provider key.
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub balance: f64,
    pub used: Option<f64>,
    pub unit: String,
}

/// Run the provider's configured balance query against the upstream and
/// extract the result. `meta` supplies the base URL and channel key the
/// header expressions read.
pub async fn query_balance(
    client: &UpstreamClient,
    cfg: &BalanceQueryConfig,
    meta: &Meta,
) -> Result<Balance, String> {
    let base = if meta.channel_base_url.is_empty() {
        meta.base_url.as_str()
    } else {
        meta.channel_base_url.as_str()
    };
    let headers = eval_header_ops(&cfg.headers, meta);
    let method = if cfg.method.trim().is_empty() { "GET" } else { cfg.method.trim() };

    match cfg.mode.trim().to_lowercase().as_str() {
        "openai" => {
            let sub_path = non_empty_or(&cfg.subscription_path, DEFAULT_SUBSCRIPTION_PATH);
            let usage_path = non_empty_or(&cfg.usage_path, DEFAULT_USAGE_PATH);
            let sub = fetch_query_body(
                client,
                &meta.provider,
                method,
                &resolve_query_url(base, sub_path),
                &headers,
            )
            .await?;
            let usage = fetch_query_body(
                client,
                &meta.provider,
                method,
                &resolve_query_url(base, usage_path),
                &headers,
            )
            .await?;
            extract_openai_balance(&sub, &usage)
        }
        "custom" => {
            let body = fetch_query_body(
                client,
                &meta.provider,
                method,
                &resolve_query_url(base, &cfg.path),
                &headers,
            )
            .await?;
            extract_balance(cfg, &body)
        }
        "" => Err("balance query is not configured".to_string()),
        other => Err(format!("unsupported balance mode {other:?}")),
    }
}

pub(crate) async fn fetch_query_body(
    client: &UpstreamClient,
    provider: &str,
    method: &str,
    url: &str,
    headers: &[(String, String)],
) -> Result<Vec<u8>, String> {
    client
        .fetch_ok_body(provider, method, url, headers)
        .await
        .map_err(|e| e.to_string())
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    let v = value.trim();
    if v.is_empty() {
        default
    } else {
        v
    }
}

/// Parse a custom-mode balance response body.
pub fn extract_balance(cfg: &BalanceQueryConfig, body: &[u8]) -> Result<Balance, String> {
    let mode = cfg.mode.trim().to_lowercase();
    if mode != "custom" {
        return Err(format!("unsupported balance mode {:?}", cfg.mode));
    }
    let root: Value =
        serde_json::from_slice(body).map_err(|e| format!("parse response json: {e}"))?;
    if !root.is_object() {
        return Err("response is not json object".to_string());
    }

    if cfg.balance_expr.is_none() && cfg.balance_path.trim().is_empty() {
        return Err("balance field is required".to_string());
    }
    let balance = eval_field(&root, &cfg.balance_expr, &cfg.balance_path);

    let used = if cfg.used_expr.is_some() || !cfg.used_path.trim().is_empty() {
        Some(eval_field(&root, &cfg.used_expr, &cfg.used_path))
    } else {
        None
    };

    Ok(Balance {
        balance,
        used,
        unit: if cfg.unit.trim().is_empty() { "USD".to_string() } else { cfg.unit.clone() },
    })
}

/// OpenAI-style subscription/usage pair: balance = hard limit - total usage
/// (usage endpoint reports cents).
pub fn extract_openai_balance(subscription_body: &[u8], usage_body: &[u8]) -> Result<Balance, String> {
    let sub: Value = serde_json::from_slice(subscription_body)
        .map_err(|e| format!("parse subscription json: {e}"))?;
    let usage: Value =
        serde_json::from_slice(usage_body).map_err(|e| format!("parse usage json: {e}"))?;

    let limit = jsonutil::get_float(&sub, "$.hard_limit_usd");
    let used = jsonutil::get_float(&usage, "$.total_usage") / 100.0;
    Ok(Balance { balance: limit - used, used: Some(used), unit: "USD".to_string() })
}

fn eval_field(root: &Value, expr: &Option<BalanceExpr>, path: &str) -> f64 {
    if let Some(e) = expr {
        return e.eval(root);
    }
    let p = path.trim();
    if p.is_empty() {
        return 0.0;
    }
    jsonutil::get_float(root, p)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_balance_with_paths() {
        let cfg = BalanceQueryConfig {
            mode: "custom".to_string(),
            balance_path: "$.data.balance".to_string(),
            used_path: "$.data.used".to_string(),
            unit: "CNY".to_string(),
            ..Default::default()
        };
        let body = br#"{"data":{"balance":12.5,"used":7.5}}"#;
        let b = extract_balance(&cfg, body).unwrap();
        assert_eq!(b.balance, 12.5);
        assert_eq!(b.used, Some(7.5));
        assert_eq!(b.unit, "CNY");
    }

    #[test]
    fn test_custom_balance_with_expr() {
        let cfg = BalanceQueryConfig {
            mode: "custom".to_string(),
            balance_expr: Some(BalanceExpr::parse("$.total - $.spent").unwrap()),
            ..Default::default()
        };
        let b = extract_balance(&cfg, br#"{"total":10,"spent":4}"#).unwrap();
        assert_eq!(b.balance, 6.0);
        assert_eq!(b.used, None);
        assert_eq!(b.unit, "USD");
    }

    #[test]
    fn test_custom_balance_requires_field() {
        let cfg = BalanceQueryConfig { mode: "custom".to_string(), ..Default::default() };
        assert!(extract_balance(&cfg, b"{}").is_err());

        let openai = BalanceQueryConfig { mode: "openai".to_string(), ..Default::default() };
        assert!(extract_balance(&openai, b"{}").is_err());
    }

    #[tokio::test]
    async fn test_query_balance_rejects_unconfigured_mode() {
        let client =
            UpstreamClient::new(std::time::Duration::from_secs(1)).unwrap();
        let meta = Meta {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            ..Meta::default()
        };
        let err = query_balance(&client, &BalanceQueryConfig::default(), &meta)
            .await
            .unwrap_err();
        assert!(err.contains("not configured"), "{err}");

        let bogus = BalanceQueryConfig { mode: "weird".to_string(), ..Default::default() };
        let err = query_balance(&client, &bogus, &meta).await.unwrap_err();
        assert!(err.contains("unsupported"), "{err}");
    }

    #[test]
    fn test_non_empty_or() {
        assert_eq!(non_empty_or("", "/default"), "/default");
        assert_eq!(non_empty_or("  ", "/default"), "/default");
        assert_eq!(non_empty_or("/v1/billing", "/default"), "/v1/billing");
    }

    #[test]
    fn test_openai_subscription_usage_pair() {
        let sub = br#"{"hard_limit_usd":120.0}"#;
        let usage = br#"{"total_usage":2500.0}"#;
        let b = extract_openai_balance(sub, usage).unwrap();
        assert_eq!(b.used, Some(25.0));
        assert_eq!(b.balance, 95.0);
    }
}

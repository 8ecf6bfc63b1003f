//! Request/response executor: applies a compiled provider program to one
//! request's URL, headers and body, and best-effort JSON ops to unary
//! response bodies.

use crate::dsl::{
    AuthOp, HeaderOp, JsonOp, ProviderFile, QueryOp, RequestTransform, ResponseDirective,
};
use crate::jsonutil;
use crate::meta::Meta;
use crate::proxy::codecs;
use onr_types::ProxyError;
use serde_json::Value;

/// The upstream request after the request phase.
#[derive(Debug, Clone, Default)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Run the request phase in declared order: base URL, path/query ops, model
/// map, header composition, body transform.
pub fn apply_request_phase(
    pf: &ProviderFile,
    meta: &mut Meta,
    body: &[u8],
) -> Result<PreparedRequest, ProxyError> {
    // (a) base URL: keystore override wins over the provider literal
    meta.base_url = pf.routing.base_url.clone();
    let effective_base = if meta.channel_base_url.is_empty() {
        meta.base_url.clone()
    } else {
        meta.channel_base_url.clone()
    };

    // model mapping resolves before path/query ops so `$request.model_mapped`
    // is usable inside `set_path` expressions
    let transform = pf.request.select(&meta.api, meta.is_stream);
    apply_model_map(&transform, meta);

    // path and query ops from the first routing match
    if let Some(m) = pf.routing.select(&meta.api, meta.is_stream) {
        if let Some(path) = &m.set_path {
            meta.path = path.eval(meta);
        }
        for op in &m.query_ops {
            match op {
                QueryOp::Set { name, value } => {
                    let v = value.eval(meta);
                    set_query_param(&mut meta.query, name, &v);
                }
                QueryOp::Del { name } => del_query_param(&mut meta.query, name),
            }
        }
    }

    // (d) headers: start empty, auth ops first, then per-match set/del
    let phase_headers = pf.headers.select(&meta.api, meta.is_stream);
    let mut headers: Vec<(String, String)> = Vec::new();
    for op in &phase_headers.auth {
        match op {
            AuthOp::Bearer => {
                set_header(&mut headers, "Authorization", &format!("Bearer {}", meta.channel_key));
            }
            AuthOp::HeaderKey(name) => set_header(&mut headers, name, &meta.channel_key.clone()),
            AuthOp::OAuthBearer => set_header(
                &mut headers,
                "Authorization",
                &format!("Bearer {}", meta.oauth_access_token),
            ),
        }
    }
    for op in &phase_headers.request {
        match op {
            HeaderOp::Set { name, value } => {
                let v = value.eval(meta);
                set_header(&mut headers, name, &v);
            }
            HeaderOp::Del { name } => del_header(&mut headers, name),
        }
    }

    // (e) body: named codec first, then JSON ops in listed order
    let mut out_body = body.to_vec();
    if !transform.req_map.is_empty() {
        let codec = codecs::lookup_req_map(&transform.req_map).ok_or_else(|| {
            ProxyError::Internal { message: format!("unknown req_map mode {:?}", transform.req_map) }
        })?;
        out_body = codec(&out_body)
            .map_err(|message| ProxyError::BodyTransform { message })?;
    }
    if !transform.json_ops.is_empty() {
        out_body = apply_json_ops_strict(&transform.json_ops, meta, &out_body)
            .map_err(|message| ProxyError::BodyTransform { message })?;
    }

    let url = join_url(&effective_base, &meta.path, &meta.query);
    Ok(PreparedRequest { url, headers, body: out_body })
}

fn apply_model_map(transform: &RequestTransform, meta: &mut Meta) {
    let model = meta.model.trim();
    for (from, to) in &transform.model_map {
        if from == model {
            meta.model_mapped = to.eval(meta);
            return;
        }
    }
    if let Some(default) = &transform.model_map_default {
        meta.model_mapped = default.eval(meta);
    }
}

/// Request-phase JSON ops: a body that fails to decode is an error.
fn apply_json_ops_strict(
    ops: &[JsonOp],
    meta: &Meta,
    body: &[u8],
) -> Result<Vec<u8>, String> {
    let mut root: Value =
        serde_json::from_slice(body).map_err(|e| format!("request body is not json: {e}"))?;
    apply_json_ops(ops, meta, &mut root)?;
    serde_json::to_vec(&root).map_err(|e| e.to_string())
}

/// Apply JSON ops to a decoded tree in declared order.
pub fn apply_json_ops(ops: &[JsonOp], meta: &Meta, root: &mut Value) -> Result<(), String> {
    for op in ops {
        match op {
            JsonOp::Set { path, value } => {
                jsonutil::set_value(root, path, eval_json_value(value, meta))?;
            }
            JsonOp::SetIfAbsent { path, value } => {
                if !jsonutil::path_exists(root, path) {
                    jsonutil::set_value(root, path, eval_json_value(value, meta))?;
                }
            }
            JsonOp::Del { path } => jsonutil::delete_value(root, path)?,
            JsonOp::Rename { from, to } => jsonutil::rename_value(root, from, to)?,
        }
    }
    Ok(())
}

/// Expression results that parse as JSON scalars become typed values;
/// everything else stays a string.
fn eval_json_value(expr: &crate::expr::Expr, meta: &Meta) -> Value {
    let s = expr.eval(meta);
    match serde_json::from_str::<Value>(&s) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => v,
        _ => Value::String(s),
    }
}

/// Response-phase JSON ops are best-effort: a non-JSON body passes through
/// unchanged with a warning.
pub fn apply_response_json_ops(dir: &ResponseDirective, meta: &Meta, body: &[u8]) -> Vec<u8> {
    if dir.json_ops.is_empty() {
        return body.to_vec();
    }
    let Ok(mut root) = serde_json::from_slice::<Value>(body) else {
        tracing::warn!(
            provider = %meta.provider,
            api = %meta.api,
            "response body is not decodable json, emitting upstream bytes unchanged"
        );
        return body.to_vec();
    };
    if let Err(e) = apply_json_ops(&dir.json_ops, meta, &mut root) {
        tracing::warn!(provider = %meta.provider, error = %e, "response json op failed");
        return body.to_vec();
    }
    serde_json::to_vec(&root).unwrap_or_else(|_| body.to_vec())
}

/// Evaluate a standalone header-op list (balance/models query requests).
pub fn eval_header_ops(ops: &[HeaderOp], meta: &Meta) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for op in ops {
        match op {
            HeaderOp::Set { name, value } => {
                let v = value.eval(meta);
                set_header(&mut out, name, &v);
            }
            HeaderOp::Del { name } => del_header(&mut out, name),
        }
    }
    out
}

/// Resolve a balance/models query path against the provider base URL.
/// Absolute `http(s)://` paths win; everything else joins onto the base.
pub fn resolve_query_url(base: &str, path: &str) -> String {
    let p = path.trim();
    if p.starts_with("http://") || p.starts_with("https://") {
        return p.to_string();
    }
    join_url(base, p, "")
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    del_header(headers, name);
    headers.push((name.to_string(), value.to_string()));
}

fn del_header(headers: &mut Vec<(String, String)>, name: &str) {
    headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
}

fn set_query_param(query: &mut String, name: &str, value: &str) {
    del_query_param(query, name);
    let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    let pair = format!("{name}={encoded}");
    if query.is_empty() {
        *query = pair;
    } else {
        query.push('&');
        query.push_str(&pair);
    }
}

fn del_query_param(query: &mut String, name: &str) {
    if query.is_empty() {
        return;
    }
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| pair.split('=').next() != Some(name))
        .collect();
    *query = kept.join("&");
}

fn join_url(base: &str, path: &str, query: &str) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    if !path.is_empty() {
        if !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);
    }
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::validate_provider_file;
    use serde_json::json;
    use std::io::Write;

    const CONF: &str = r#"
syntax "next-router/0.1";
provider "openai" {
  defaults {
    upstream_config { base_url = "https://api.openai.com"; }
    auth { auth_bearer; }
  }
  match api = "chat.completions" {
    upstream {
      set_path "/v1/chat/completions";
      set_query "api-version" "2024-06-01";
    }
    request {
      set_header "X-Title" "onr";
      model_map "gpt-4o" "gpt-4o-2024-11-20";
      model_map_default $request.model;
      json_set "$.model" $request.model_mapped;
      json_set_if_absent "$.temperature" "0.7";
      json_del "$.internal";
    }
  }
}
"#;

    fn provider() -> ProviderFile {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openai.conf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(CONF.as_bytes()).unwrap();
        validate_provider_file(&path.to_string_lossy()).unwrap()
    }

    #[test]
    fn test_full_request_phase() {
        let pf = provider();
        let mut meta = Meta::new("chat.completions", false);
        meta.model = "gpt-4o".to_string();
        meta.channel_key = "sk-abc".to_string();

        let body = serde_json::to_vec(&json!({
            "model": "gpt-4o",
            "internal": true,
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();
        let prepared = apply_request_phase(&pf, &mut meta, &body).unwrap();

        assert_eq!(
            prepared.url,
            "https://api.openai.com/v1/chat/completions?api-version=2024-06-01"
        );
        assert_eq!(meta.model_mapped, "gpt-4o-2024-11-20");
        assert!(prepared
            .headers
            .contains(&("Authorization".to_string(), "Bearer sk-abc".to_string())));
        assert!(prepared.headers.contains(&("X-Title".to_string(), "onr".to_string())));

        let out: Value = serde_json::from_slice(&prepared.body).unwrap();
        assert_eq!(out["model"], "gpt-4o-2024-11-20");
        assert_eq!(out["temperature"], 0.7);
        assert!(out.get("internal").is_none());
    }

    #[test]
    fn test_channel_base_url_override_wins() {
        let pf = provider();
        let mut meta = Meta::new("chat.completions", false);
        meta.model = "other".to_string();
        meta.channel_base_url = "https://alt.example.com".to_string();
        let prepared = apply_request_phase(&pf, &mut meta, b"{}").unwrap();
        assert!(prepared.url.starts_with("https://alt.example.com/v1/chat/completions"));
        // model_map_default keeps the client model
        assert_eq!(meta.model_mapped, "other");
    }

    #[test]
    fn test_set_if_absent_is_noop_when_present() {
        let pf = provider();
        let mut meta = Meta::new("chat.completions", false);
        meta.model = "gpt-4o".to_string();
        let body = serde_json::to_vec(&json!({"model": "gpt-4o", "temperature": 0.1})).unwrap();
        let prepared = apply_request_phase(&pf, &mut meta, &body).unwrap();
        let out: Value = serde_json::from_slice(&prepared.body).unwrap();
        assert_eq!(out["temperature"], 0.1);
    }

    #[test]
    fn test_non_json_request_body_is_an_error() {
        let pf = provider();
        let mut meta = Meta::new("chat.completions", false);
        meta.model = "gpt-4o".to_string();
        let err = apply_request_phase(&pf, &mut meta, b"not json").unwrap_err();
        assert!(matches!(err, ProxyError::BodyTransform { .. }));
    }

    #[test]
    fn test_response_ops_best_effort_on_bad_json() {
        let dir = ResponseDirective {
            json_ops: vec![JsonOp::Del { path: "$.x".to_string() }],
            ..ResponseDirective::default()
        };
        let meta = Meta::new("chat.completions", false);
        assert_eq!(apply_response_json_ops(&dir, &meta, b"not json"), b"not json".to_vec());

        let out = apply_response_json_ops(&dir, &meta, br#"{"x":1,"y":2}"#);
        assert_eq!(serde_json::from_slice::<Value>(&out).unwrap(), json!({"y": 2}));
    }

    #[test]
    fn test_eval_header_ops_set_then_del() {
        use crate::expr::Expr;
        let mut meta = Meta::new("chat.completions", false);
        meta.channel_key = "sk-abc".to_string();
        let ops = vec![
            HeaderOp::Set {
                name: "Authorization".to_string(),
                value: Expr::parse("concat(\"Bearer \", $channel.key)").unwrap(),
            },
            HeaderOp::Set {
                name: "X-Drop".to_string(),
                value: Expr::parse("\"x\"").unwrap(),
            },
            HeaderOp::Del { name: "x-drop".to_string() },
        ];
        let headers = eval_header_ops(&ops, &meta);
        assert_eq!(headers, vec![("Authorization".to_string(), "Bearer sk-abc".to_string())]);
    }

    #[test]
    fn test_resolve_query_url() {
        assert_eq!(
            resolve_query_url("https://api.openai.com", "/v1/models"),
            "https://api.openai.com/v1/models"
        );
        assert_eq!(
            resolve_query_url("https://api.openai.com/", "v1/models"),
            "https://api.openai.com/v1/models"
        );
        assert_eq!(
            resolve_query_url("https://api.openai.com", "https://billing.example.com/v1/usage"),
            "https://billing.example.com/v1/usage"
        );
    }

    #[test]
    fn test_query_param_ops() {
        let mut q = String::new();
        set_query_param(&mut q, "alt", "sse");
        set_query_param(&mut q, "key", "abc");
        assert_eq!(q, "alt=sse&key=abc");
        set_query_param(&mut q, "alt", "json");
        assert_eq!(q, "key=abc&alt=json");
        del_query_param(&mut q, "key");
        assert_eq!(q, "alt=json");
    }
}

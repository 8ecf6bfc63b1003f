//! Request-id, access-log, and auth middleware.

use crate::result_context::ResultContext;
use crate::state::SharedState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use onr_core::requestid;
use onr_core::tokenkey::{self, TokenMode, TokenParseOptions};
use serde_json::json;
use std::time::Instant;
use subtle::ConstantTimeEq;

/// The request id assigned by [`request_id_middleware`].
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Credential facts established by the auth middleware.
#[derive(Debug, Clone, Default)]
pub struct AuthInfo {
    pub access_key_name: String,
    /// The accepted client credential; feeds the OAuth cache key hash.
    pub credential: String,
    pub token_provider: String,
    pub token_model_override: String,
    pub token_upstream_key: String,
    pub byok: bool,
}

/// Echo the caller's request id or generate one; expose it on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let header_key = requestid::resolve_header_key("");
    let id = request
        .headers()
        .get(header_key)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(requestid::gen);

    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(v) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(header_key, v);
    }
    response
}

/// Writes one access-log line per request once the response body finishes
/// (or the client goes away). Streaming responses therefore log with final
/// usage and pacing fields filled in by the handler's completion stage.
pub async fn access_log_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(access_log) = state.access_log.clone() else {
        let ctx = ResultContext::new();
        request.extensions_mut().insert(ctx);
        return next.run(request).await;
    };

    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let client_ip = client_ip_of(&request);

    let ctx = ResultContext::new();
    resolve_appname(&state, &request, &ctx);
    request.extensions_mut().insert(ctx.clone());

    let response = next.run(request).await;
    let status = response.status().as_u16();

    let guard = LogOnDrop {
        access_log,
        ctx,
        start,
        status,
        method,
        path,
        client_ip,
        done: false,
    };

    let (parts, body) = response.into_parts();
    let mut inner = body.into_data_stream();
    let logged = async_stream::stream! {
        let mut guard = guard;
        while let Some(item) = inner.next().await {
            yield item;
        }
        guard.emit();
    };
    Response::from_parts(parts, Body::from_stream(logged))
}

struct LogOnDrop {
    access_log: std::sync::Arc<crate::state::AccessLog>,
    ctx: ResultContext,
    start: Instant,
    status: u16,
    method: String,
    path: String,
    client_ip: String,
    done: bool,
}

impl LogOnDrop {
    fn emit(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let latency = self.start.elapsed();
        let fields = self.ctx.to_log_fields();
        let ts = chrono::Local::now();
        let line = match &self.access_log.formatter {
            Some(f) => f.format(
                ts,
                self.status,
                latency,
                &self.client_ip,
                &self.method,
                &self.path,
                &fields,
                self.access_log.color,
            ),
            None => default_line(
                ts,
                self.status,
                latency,
                &self.client_ip,
                &self.method,
                &self.path,
                &fields,
                self.access_log.color,
            ),
        };
        self.access_log.write_line(&line);
    }
}

impl Drop for LogOnDrop {
    fn drop(&mut self) {
        // client disconnects drop the body stream; still log the request
        self.emit();
    }
}

/// Fallback line when no `$var` format is configured.
#[allow(clippy::too_many_arguments)]
fn default_line(
    ts: chrono::DateTime<chrono::Local>,
    status: u16,
    latency: std::time::Duration,
    client_ip: &str,
    method: &str,
    path: &str,
    fields: &std::collections::HashMap<String, String>,
    color: bool,
) -> String {
    let mut extras: Vec<(&String, &String)> = fields.iter().collect();
    extras.sort_by_key(|(k, _)| (*k).clone());
    let extras = extras
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{} | {} | {}ms | {} | {} {} | {}",
        ts.format("%Y/%m/%d - %H:%M:%S"),
        onr_core::logx::colorize_status_with(status, color),
        latency.as_millis(),
        if client_ip.is_empty() { "-" } else { client_ip },
        method,
        path,
        if extras.is_empty() { "-".to_string() } else { extras },
    )
}

fn client_ip_of(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| request.headers().get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn resolve_appname(state: &SharedState, request: &Request, ctx: &ResultContext) {
    let explicit = request
        .headers()
        .get("appname")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(name) = explicit {
        let name = name.to_string();
        ctx.update(|f| f.appname = name);
        return;
    }
    let infer_cfg = &state.config.logging.appname_infer;
    if !infer_cfg.enabled {
        return;
    }
    let ua = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let name = onr_core::appname::infer(ua)
        .map(String::from)
        .unwrap_or_else(|| infer_cfg.unknown.trim().to_string());
    if !name.is_empty() {
        ctx.update(|f| f.appname = name);
    }
}

/// Credential resolution: master key, access-key pool, then `onr:v1?`
/// token-key. All comparisons are constant-time.
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let credential = extract_credential(&request);
    let master = state.config.auth.api_key.trim();
    let allow_byok = state.config.auth.token_key.allow_byok_without_k;

    let mut info: Option<AuthInfo> = None;

    if !master.is_empty() && ct_eq(&credential, master) {
        info = Some(AuthInfo { credential: credential.clone(), ..AuthInfo::default() });
    }
    if info.is_none() {
        if let Some((name, _)) = state.keys().match_access_key(&credential) {
            info = Some(AuthInfo {
                access_key_name: name,
                credential: credential.clone(),
                ..AuthInfo::default()
            });
        }
    }
    if info.is_none() && tokenkey::is_token_key(&credential) {
        let opts = TokenParseOptions { allow_byok_without_k: allow_byok };
        if let Ok((claims, access_key)) = tokenkey::parse(&credential, opts) {
            let mut ok = false;
            let mut access_key_name = String::new();
            if !access_key.trim().is_empty() {
                if !master.is_empty() && ct_eq(&access_key, master) {
                    ok = true;
                }
                if !ok {
                    if let Some((name, _)) = state.keys().match_access_key(&access_key) {
                        access_key_name = name;
                        ok = true;
                    }
                }
            } else if allow_byok
                && claims.mode == TokenMode::Byok
                && !claims.upstream_key.trim().is_empty()
            {
                ok = true;
            }
            if ok {
                info = Some(AuthInfo {
                    access_key_name,
                    credential: access_key,
                    token_provider: claims.provider,
                    token_model_override: claims.model_override,
                    token_upstream_key: claims.upstream_key,
                    byok: claims.mode == TokenMode::Byok,
                });
            }
        }
    }

    match info {
        Some(info) => {
            request.extensions_mut().insert(info);
            next.run(request).await
        }
        None => unauthorized_response(),
    }
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({
            "error": {
                "message": "unauthorized",
                "type": "invalid_request_error",
                "code": "invalid_api_key",
            }
        })),
    )
        .into_response()
}

fn ct_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// `Authorization: Bearer` first, then `x-api-key`, `x-goog-api-key`, then
/// the `key` query parameter.
fn extract_credential(request: &Request) -> String {
    if let Some(v) = request.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let v = v.trim();
        let bearer = v.strip_prefix("Bearer ").unwrap_or(v).trim();
        if !bearer.is_empty() {
            return bearer.to_string();
        }
    }
    for name in ["x-api-key", "x-goog-api-key"] {
        if let Some(v) = request.headers().get(name).and_then(|v| v.to_str().ok()) {
            let v = v.trim();
            if !v.is_empty() {
                return v.to_string();
            }
        }
    }
    if let Some(query) = request.uri().query() {
        for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
            if k == "key" && !v.trim().is_empty() {
                return v.trim().to_string();
            }
        }
    }
    String::new()
}

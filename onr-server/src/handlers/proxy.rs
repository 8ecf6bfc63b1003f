//! The proxied API pipeline: route selection, DSL execution, upstream
//! call with key rotation, streaming/unary response transformation, usage
//! extraction, pricing, and traffic dump capture.

use crate::middleware::{AuthInfo, RequestId};
use crate::result_context::ResultContext;
use crate::state::SharedState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use onr_core::dsl::{ProviderFile, ResponseDirective, ResponseOp};
use onr_core::keystore::UpstreamKey;
use onr_core::meta::Meta;
use onr_core::oauth::AcquireInput;
use onr_core::proxy::codecs;
use onr_core::proxy::error_map::normalize_error_body;
use onr_core::proxy::executor::{apply_request_phase, apply_response_json_ops, PreparedRequest};
use onr_core::proxy::stream::{shared_state, transform_stream, SharedStreamState};
use onr_core::trafficdump::Recorder;
use onr_core::usage;
use onr_types::ProxyError;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// One parsed API call, normalized across the OpenAI/Anthropic/Gemini
/// surfaces.
struct ApiCall {
    api: String,
    stream: bool,
    model: String,
    body: Vec<u8>,
}

pub async fn chat_completions(
    State(state): State<SharedState>,
    request: axum::extract::Request,
) -> Response {
    openai_family(state, "chat.completions", request).await
}

pub async fn responses(
    State(state): State<SharedState>,
    request: axum::extract::Request,
) -> Response {
    openai_family(state, "responses", request).await
}

pub async fn embeddings(
    State(state): State<SharedState>,
    request: axum::extract::Request,
) -> Response {
    openai_family(state, "embeddings", request).await
}

pub async fn claude_messages(
    State(state): State<SharedState>,
    request: axum::extract::Request,
) -> Response {
    openai_family(state, "claude.messages", request).await
}

async fn openai_family(
    state: SharedState,
    api: &str,
    request: axum::extract::Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match read_body(&state, body).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let root: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let call = ApiCall {
        api: api.to_string(),
        stream: root.get("stream").and_then(Value::as_bool).unwrap_or(false),
        model: root
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
        body: body.to_vec(),
    };
    run_proxy(state, parts, call).await
}

/// `POST /v1beta/models/<model>:generateContent` and
/// `...:streamGenerateContent?alt=sse`.
pub async fn gemini_generate(
    State(state): State<SharedState>,
    Path(rest): Path<String>,
    request: axum::extract::Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let Some((model, op)) = rest.rsplit_once(':') else {
        return error_response(404, "not_found", &format!("unsupported path {rest:?}"));
    };
    let stream = match op {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return error_response(404, "not_found", &format!("unsupported operation {other:?}"))
        }
    };
    let body = match read_body(&state, body).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let call = ApiCall {
        api: "gemini.generate_content".to_string(),
        stream,
        model: model.trim().to_string(),
        body: body.to_vec(),
    };
    run_proxy(state, parts, call).await
}

/// Read the client body under the configured server read timeout.
async fn read_body(state: &SharedState, body: Body) -> Result<Bytes, Response> {
    let timeout = std::time::Duration::from_millis(state.config.server.read_timeout_ms);
    match tokio::time::timeout(timeout, axum::body::to_bytes(body, usize::MAX)).await {
        Ok(Ok(b)) => Ok(b),
        Ok(Err(e)) => {
            Err(error_response(400, "invalid_request_error", &format!("read body: {e}")))
        }
        Err(_) => Err(error_response(408, "request_timeout", "client body read timed out")),
    }
}

async fn run_proxy(
    state: SharedState,
    parts: axum::http::request::Parts,
    mut call: ApiCall,
) -> Response {
    let auth = parts.extensions.get::<AuthInfo>().cloned().unwrap_or_default();
    let ctx = parts.extensions.get::<ResultContext>().cloned().unwrap_or_default();
    let request_id = parts
        .extensions
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();

    // token-key model override replaces the routed model
    if !auth.token_model_override.is_empty() {
        call.model = auth.token_model_override.clone();
    }

    ctx.update(|f| {
        f.api = call.api.clone();
        f.stream = Some(call.stream);
        f.model = call.model.clone();
    });

    // provider resolution: header force, then token override, then router
    let forced_provider = parts
        .headers
        .get("x-onr-provider")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty());

    let router = state.model_router();
    let (provider, provider_source) = if let Some(p) = forced_provider {
        (p, "header")
    } else if !auth.token_provider.is_empty() {
        (auth.token_provider.clone(), "token")
    } else {
        match router.next_provider(&call.model) {
            Some(p) => (p, "router"),
            None => {
                return error_response(
                    404,
                    "model_not_found",
                    &format!("no route for model {:?}", call.model),
                )
            }
        }
    };

    // a model override must stay within the model's provider pool when the
    // route is known
    if !auth.token_model_override.is_empty()
        && router.route(&call.model).is_some()
        && !router.model_has_provider(&call.model, &provider)
    {
        return error_response(
            404,
            "model_not_found",
            &format!("model {:?} is not served by provider {provider:?}", call.model),
        );
    }

    ctx.update(|f| {
        f.provider = provider.clone();
        f.provider_source = provider_source.to_string();
    });

    let Some(pf) = state.registry.get(&provider) else {
        return error_response(404, "model_not_found", &format!("unknown provider {provider:?}"));
    };

    let mut recorder = Recorder::start(&state.dump_config(), &request_id);
    if let Some(rec) = recorder.as_mut() {
        rec.set_meta("api", &call.api);
        rec.set_meta("provider", &provider);
        rec.set_meta("model", &call.model);
        let headers = header_pairs(&parts.headers);
        let uri = parts.uri.to_string();
        let capped = rec.max_bytes() > 0 && call.body.len() > rec.max_bytes();
        rec.record_origin_request(parts.method.as_str(), &uri, &headers, &call.body, capped);
    }

    match forward(&state, pf.as_ref(), &call, &auth, &ctx, recorder).await {
        Ok(response) => response,
        Err(e) => {
            let status = e.http_status_code();
            tracing::warn!(provider = %provider, api = %call.api, error = %e, "proxy request failed");
            error_response(status, e.code(), &e.to_string())
        }
    }
}

async fn forward(
    state: &SharedState,
    pf: &ProviderFile,
    call: &ApiCall,
    auth: &AuthInfo,
    ctx: &ResultContext,
    recorder: Option<Recorder>,
) -> Result<Response, ProxyError> {
    let start = Instant::now();

    // first key: BYOK skips rotation entirely
    let byok_key = (!auth.token_upstream_key.trim().is_empty()).then(|| UpstreamKey {
        name: "byok".to_string(),
        value: auth.token_upstream_key.trim().to_string(),
        base_url_override: String::new(),
    });
    let keys = state.keys();
    let first_key = byok_key.clone().or_else(|| keys.next_key(&pf.name));

    let (prepared, meta) =
        prepare(state, pf, call, auth, first_key.clone()).await?;

    let mut response = state.upstream.send(&pf.name, &prepared, call.stream).await;
    let mut sent = prepared;
    let mut sent_meta = meta;

    // pre-header connect failures retry once with the next rotated key
    let should_retry =
        matches!(&response, Err(e) if e.is_retryable()) && byok_key.is_none();
    if should_retry {
        if let Err(err) = &response {
            tracing::warn!(provider = %pf.name, error = %err, "upstream connect failed, retrying with next key");
        }
        let next_key = keys.next_key(&pf.name);
        let (prepared2, meta2) = prepare(state, pf, call, auth, next_key).await?;
        response = state.upstream.send(&pf.name, &prepared2, call.stream).await;
        sent = prepared2;
        sent_meta = meta2;
    }
    let upstream_response = response?;
    let meta = sent_meta;

    let mut recorder = recorder;
    if let Some(rec) = recorder.as_mut() {
        rec.record_upstream_request("POST", &sent.url, &sent.headers, &sent.body);
    }

    let status = upstream_response.status();
    ctx.update(|f| f.upstream_status = Some(status.as_u16()));

    let upstream_headers = response_header_pairs(upstream_response.headers());
    let content_encoding = upstream_response
        .headers()
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if !status.is_success() {
        let body = upstream_response.bytes().await.unwrap_or_default();
        let error_dir = pf.error.select(&call.api, call.stream);
        let (out, ct) = normalize_error_body(&error_dir.mode, status.as_u16(), &body);
        if let Some(rec) = recorder.as_mut() {
            rec.record_upstream_response(status.as_u16(), &upstream_headers, &body, false);
            rec.record_proxy_response(&out, false);
        }
        close_recorder(recorder);
        let mut builder = Response::builder().status(status.as_u16());
        if let Some(ct) = ct {
            builder = builder.header("Content-Type", ct);
        } else if let Some((_, v)) =
            upstream_headers.iter().find(|(n, _)| n.eq_ignore_ascii_case("content-type"))
        {
            builder = builder.header("Content-Type", v.as_str());
        }
        return builder
            .body(Body::from(out))
            .map_err(|e| ProxyError::Internal { message: e.to_string() });
    }

    let response_dir = pf.response.select(&call.api, call.stream);
    let usage_cfg = pf.usage.select(&call.api, call.stream);
    let finish_cfg = pf.finish.select(&call.api, call.stream);

    let content_type = upstream_headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.to_lowercase())
        .unwrap_or_default();
    let is_sse = content_type.contains("text/event-stream")
        || matches!(response_dir.op, ResponseOp::SseParse(_));

    if call.stream || is_sse {
        stream_response(
            state, call, &meta, &response_dir, &usage_cfg, &finish_cfg, ctx, recorder,
            upstream_response, &upstream_headers, &content_encoding, start,
        )
    } else {
        unary_response(
            state, call, &meta, &response_dir, &usage_cfg, &finish_cfg, ctx, recorder,
            upstream_response, &upstream_headers, &content_encoding,
        )
        .await
    }
}

/// Build the prepared upstream request for one key choice: key + OAuth into
/// meta, then the DSL request phase.
async fn prepare(
    state: &SharedState,
    pf: &ProviderFile,
    call: &ApiCall,
    auth: &AuthInfo,
    key: Option<UpstreamKey>,
) -> Result<(PreparedRequest, Meta), ProxyError> {
    let mut meta = Meta::new(&call.api, call.stream);
    meta.provider = pf.name.clone();
    meta.model = call.model.clone();
    if let Some(k) = key {
        meta.channel_key = k.value;
        meta.channel_base_url = k.base_url_override;
    }

    let phase_headers = pf.headers.select(&call.api, call.stream);
    if phase_headers.oauth.is_configured() {
        let oauth = &phase_headers.oauth;
        let eval = |e: &Option<onr_core::expr::Expr>| {
            e.as_ref().map(|e| e.eval(&meta)).unwrap_or_default()
        };
        let token_url = eval(&oauth.token_url);
        if token_url.trim().is_empty() {
            return Err(ProxyError::OAuthAcquire {
                message: format!("oauth_mode {:?} requires oauth_token_url", oauth.mode),
            });
        }
        let client_id = eval(&oauth.client_id);
        let identity = if client_id.is_empty() { oauth.mode.clone() } else { client_id.clone() };
        let mut form: Vec<(String, String)> =
            oauth.form.iter().map(|(k, e)| (k.clone(), e.eval(&meta))).collect();
        if let Some(refresh) = &oauth.refresh_token {
            let v = refresh.eval(&meta);
            if !v.is_empty() && !form.iter().any(|(k, _)| k == "refresh_token") {
                form.push(("refresh_token".to_string(), v));
            }
        }
        if let Some(scope) = &oauth.scope {
            let v = scope.eval(&meta);
            if !v.is_empty() && !form.iter().any(|(k, _)| k == "scope") {
                form.push(("scope".to_string(), v));
            }
        }
        if let Some(audience) = &oauth.audience {
            let v = audience.eval(&meta);
            if !v.is_empty() && !form.iter().any(|(k, _)| k == "audience") {
                form.push(("audience".to_string(), v));
            }
        }
        let basic_auth = (!client_id.is_empty()).then(|| (client_id, eval(&oauth.client_secret)));
        let input = AcquireInput {
            cache_key: onr_core::oauth::cache_key(&auth.credential, &pf.name, &identity),
            token_url,
            method: oauth.method.clone(),
            content_type: oauth.content_type.clone(),
            form,
            basic_auth,
            token_path: oauth.token_path.clone(),
            expires_in_path: oauth.expires_in_path.clone(),
            token_type_path: oauth.token_type_path.clone(),
            timeout_ms: oauth.timeout_ms,
            refresh_skew_sec: oauth.refresh_skew_sec,
            fallback_ttl_sec: oauth.fallback_ttl_sec,
        };
        let token = state.oauth.acquire(&input).await?;
        meta.oauth_access_token = token.access_token;
    }

    let prepared = apply_request_phase(pf, &mut meta, &call.body)?;
    Ok((prepared, meta))
}

#[allow(clippy::too_many_arguments)]
fn stream_response(
    state: &SharedState,
    call: &ApiCall,
    meta: &Meta,
    response_dir: &ResponseDirective,
    usage_cfg: &onr_core::dsl::UsageExtractConfig,
    finish_cfg: &onr_core::dsl::FinishReasonExtractConfig,
    ctx: &ResultContext,
    recorder: Option<Recorder>,
    upstream_response: reqwest::Response,
    upstream_headers: &[(String, String)],
    content_encoding: &str,
    start: Instant,
) -> Result<Response, ProxyError> {
    let status = upstream_response.status().as_u16();
    let stream_state = shared_state(state.dump_config().max_bytes);

    let upstream: BoxStream<'static, Result<Bytes, String>> = Box::pin(
        upstream_response
            .bytes_stream()
            .map(|item| item.map_err(|e| format!("upstream read: {e}"))),
    );
    let plan = transform_stream(upstream, content_encoding, response_dir, meta, stream_state.clone())?;

    let transformed = plan.strip_content_encoding || plan.content_type_override.is_some();
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_headers {
        let lower = name.to_lowercase();
        if lower == "content-length" && transformed {
            continue;
        }
        if lower == "content-encoding" && plan.strip_content_encoding {
            continue;
        }
        if lower == "content-type" && plan.content_type_override.is_some() {
            continue;
        }
        if lower == "transfer-encoding" {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(ct) = plan.content_type_override {
        builder = builder.header("Content-Type", ct);
        builder = builder.header("Cache-Control", "no-cache");
    }

    let body = finish_stream_body(
        plan.body,
        stream_state,
        FinishArgs {
            state: state.clone(),
            ctx: ctx.clone(),
            recorder: Arc::new(Mutex::new(recorder)),
            usage_cfg: usage_cfg.clone(),
            finish_cfg: finish_cfg.clone(),
            provider: meta.provider.clone(),
            model: pricing_model(meta, call),
            status,
            upstream_headers: upstream_headers.to_vec(),
            start,
        },
    );

    builder
        .body(Body::from_stream(body))
        .map_err(|e| ProxyError::Internal { message: e.to_string() })
}

struct FinishArgs {
    state: SharedState,
    ctx: ResultContext,
    recorder: Arc<Mutex<Option<Recorder>>>,
    usage_cfg: onr_core::dsl::UsageExtractConfig,
    finish_cfg: onr_core::dsl::FinishReasonExtractConfig,
    provider: String,
    model: String,
    status: u16,
    upstream_headers: Vec<(String, String)>,
    start: Instant,
}

/// Wrap the downstream body so usage extraction, pricing, metrics, and the
/// dump all run when the stream ends (the access-log wrapper sits outside
/// and logs after this completes).
fn finish_stream_body(
    mut body: BoxStream<'static, Result<Bytes, String>>,
    stream_state: SharedStreamState,
    args: FinishArgs,
) -> BoxStream<'static, Result<Bytes, std::io::Error>> {
    Box::pin(async_stream::stream! {
        while let Some(item) = body.next().await {
            yield item.map_err(std::io::Error::other);
        }

        let (tail, upstream_dump, proxy_dump, first_at, last_at) = {
            let st = stream_state.lock().unwrap_or_else(|e| e.into_inner());
            (
                st.usage_tail.bytes().to_vec(),
                (st.upstream_dump.bytes().to_vec(), st.upstream_dump.truncated()),
                (st.proxy_dump.bytes().to_vec(), st.proxy_dump.truncated()),
                st.first_byte_at,
                st.last_byte_at,
            )
        };

        let extracted = usage::extract_usage_from_sse_tail(&args.usage_cfg, &tail);
        let finish_reason = usage::extract_finish_reason(&args.finish_cfg, &tail, true);
        let usage_val = apply_usage(
            &args.state,
            &args.ctx,
            extracted,
            &args.provider,
            &args.model,
            0,
            proxy_dump.0.len(),
        );
        let metrics = usage::stream_metrics(
            args.start,
            first_at,
            last_at,
            usage_val.map(|u| u.output_tokens).unwrap_or(0),
        );
        args.ctx.update(|f| {
            if !finish_reason.is_empty() {
                f.finish_reason = finish_reason;
            }
            f.ttft_ms = Some(metrics.ttft_ms);
            f.tps = Some(metrics.tps);
        });

        let mut recorder = args.recorder.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(rec) = recorder.as_mut() {
            rec.record_upstream_response(args.status, &args.upstream_headers, &upstream_dump.0, upstream_dump.1);
            rec.record_proxy_response(&proxy_dump.0, proxy_dump.1);
        }
        close_recorder(recorder);
    })
}

#[allow(clippy::too_many_arguments)]
async fn unary_response(
    state: &SharedState,
    call: &ApiCall,
    meta: &Meta,
    response_dir: &ResponseDirective,
    usage_cfg: &onr_core::dsl::UsageExtractConfig,
    finish_cfg: &onr_core::dsl::FinishReasonExtractConfig,
    ctx: &ResultContext,
    mut recorder: Option<Recorder>,
    upstream_response: reqwest::Response,
    upstream_headers: &[(String, String)],
    content_encoding: &str,
) -> Result<Response, ProxyError> {
    let status = upstream_response.status().as_u16();
    let raw = upstream_response
        .bytes()
        .await
        .map_err(|e| ProxyError::Internal { message: format!("read upstream body: {e}") })?
        .to_vec();

    let needs_transform = matches!(response_dir.op, ResponseOp::RespMap(_))
        || !response_dir.json_ops.is_empty();

    // transforming pipelines operate on decoded bytes
    let ce = content_encoding.trim().to_lowercase();
    let mut decoded = raw.clone();
    let mut stripped_encoding = false;
    if needs_transform && ce == "gzip" {
        decoded = gunzip_all(&raw)?;
        stripped_encoding = true;
    } else if needs_transform && !ce.is_empty() && ce != "identity" {
        return Err(ProxyError::Internal {
            message: format!("cannot transform encoded upstream response (Content-Encoding={ce:?})"),
        });
    }

    let mut out = decoded.clone();
    if let ResponseOp::RespMap(mode) = &response_dir.op {
        match codecs::lookup_resp_map(mode) {
            Some(codec) => match codec(&out) {
                Ok(mapped) => out = mapped,
                Err(e) => {
                    // response_transform policy: emit upstream bytes unchanged
                    tracing::warn!(provider = %meta.provider, mode = %mode, error = %e, "resp_map failed, passing upstream body through");
                    out = decoded.clone();
                }
            },
            None => {
                return Err(ProxyError::Internal {
                    message: format!("unknown resp_map mode {mode:?}"),
                })
            }
        }
    }
    out = apply_response_json_ops(response_dir, meta, &out);

    let extraction_src = if needs_transform { &out } else { &decoded };
    let extracted = usage::extract_usage(usage_cfg, extraction_src);
    let finish_reason = usage::extract_finish_reason(finish_cfg, extraction_src, false);
    apply_usage(
        state,
        ctx,
        extracted,
        &meta.provider,
        &pricing_model(meta, call),
        call.body.len(),
        out.len(),
    );
    if !finish_reason.is_empty() {
        ctx.update(|f| f.finish_reason = finish_reason);
    }

    if let Some(rec) = recorder.as_mut() {
        rec.record_upstream_response(status, upstream_headers, &raw, false);
        rec.record_proxy_response(&out, false);
    }
    close_recorder(recorder);

    let body_changed = out != raw;
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_headers {
        let lower = name.to_lowercase();
        if lower == "content-length" && body_changed {
            continue;
        }
        if lower == "content-encoding" && stripped_encoding {
            continue;
        }
        if lower == "transfer-encoding" {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(out))
        .map_err(|e| ProxyError::Internal { message: e.to_string() })
}

/// Fill usage + cost context fields. Falls back to length-based estimation
/// when the provider reported nothing and estimation is enabled.
fn apply_usage(
    state: &SharedState,
    ctx: &ResultContext,
    extracted: Option<usage::Usage>,
    provider: &str,
    model: &str,
    request_len: usize,
    response_len: usize,
) -> Option<usage::Usage> {
    let est_cfg = &state.config.usage_estimation;
    let (u, stage) = match extracted.filter(|u| !u.is_empty()) {
        Some(u) => (u, "final"),
        None if est_cfg.enabled => {
            let input = usage::estimate_tokens(request_len, est_cfg.chars_per_token);
            let output = usage::estimate_tokens(response_len, est_cfg.chars_per_token);
            (
                usage::Usage {
                    input_tokens: input,
                    output_tokens: output,
                    total_tokens: input + output,
                    ..usage::Usage::default()
                },
                "estimated",
            )
        }
        None => return None,
    };

    ctx.update(|f| {
        f.usage_stage = stage.to_string();
        f.input_tokens = Some(u.input_tokens);
        f.output_tokens = Some(u.output_tokens);
        f.total_tokens = Some(u.total_tokens);
        f.cache_read_tokens = Some(u.cache_read_tokens);
        f.cache_write_tokens = Some(u.cache_write_tokens);
        f.billable_input_tokens = Some((u.input_tokens - u.cache_read_tokens).max(0));
    });

    if state.config.pricing.enabled {
        if let Some((price, cost)) = state.pricing().cost(
            provider,
            model,
            u.input_tokens,
            u.output_tokens,
            u.cache_read_tokens,
            u.cache_write_tokens,
        ) {
            ctx.update(|f| {
                f.cost_total = Some(cost.total);
                f.cost_input = Some(cost.input);
                f.cost_output = Some(cost.output);
                f.cost_cache_read = Some(cost.cache_read);
                f.cost_cache_write = Some(cost.cache_write);
                f.cost_multiplier = Some(price.multiplier);
                f.cost_model = price.model.clone();
                f.cost_channel = price.channel.clone();
                f.cost_unit = price.unit.clone();
            });
        }
    }
    Some(u)
}

fn pricing_model(meta: &Meta, call: &ApiCall) -> String {
    let m = meta.effective_model();
    if m.is_empty() {
        call.model.clone()
    } else {
        m.to_string()
    }
}

fn close_recorder(recorder: Option<Recorder>) {
    if let Some(rec) = recorder {
        if let Err(e) = rec.close() {
            tracing::warn!(error = %e, "traffic dump write failed");
        }
    }
}

fn gunzip_all(raw: &[u8]) -> Result<Vec<u8>, ProxyError> {
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(raw);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ProxyError::Internal { message: format!("gzip decode: {e}") })?;
    Ok(out)
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect()
}

fn response_header_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect()
}

fn error_response(status: u16, code: &str, message: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        axum::Json(json!({
            "error": {
                "message": message,
                "type": if status.is_client_error() { "invalid_request_error" } else { "api_error" },
                "code": code,
            }
        })),
    )
        .into_response()
}

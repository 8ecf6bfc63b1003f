//! Model listing and admin endpoints.

use crate::state::SharedState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use onr_core::meta::Meta;
use serde_json::json;

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

/// `GET /admin/providers`
pub async fn admin_providers(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({ "providers": state.registry.list_provider_names() }))
}

/// `GET /admin/providers/:name/balance` — run the provider's configured
/// balance query against the upstream.
pub async fn admin_provider_balance(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Response {
    let Some(pf) = state.registry.get(&name) else {
        return admin_error(StatusCode::NOT_FOUND, &format!("unknown provider {name:?}"));
    };
    let cfg = pf.balance.select("", false);
    if cfg.mode.trim().is_empty() {
        return admin_error(
            StatusCode::NOT_FOUND,
            &format!("provider {:?} has no balance query configured", pf.name),
        );
    }
    let meta = admin_meta(&state, pf.as_ref());
    match onr_core::balancequery::query_balance(&state.upstream, &cfg, &meta).await {
        Ok(balance) => Json(json!({
            "provider": pf.name,
            "balance": balance.balance,
            "used": balance.used,
            "unit": balance.unit,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(provider = %pf.name, error = %e, "balance query failed");
            admin_error(StatusCode::BAD_GATEWAY, &e)
        }
    }
}

/// `GET /admin/providers/:name/models` — query the provider's upstream
/// model list.
pub async fn admin_provider_models(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Response {
    let Some(pf) = state.registry.get(&name) else {
        return admin_error(StatusCode::NOT_FOUND, &format!("unknown provider {name:?}"));
    };
    if pf.models.mode.trim().is_empty() {
        return admin_error(
            StatusCode::NOT_FOUND,
            &format!("provider {:?} has no models query configured", pf.name),
        );
    }
    let meta = admin_meta(&state, pf.as_ref());
    match onr_core::modelsquery::query_model_ids(&state.upstream, &pf.models, &meta).await {
        Ok(ids) => Json(json!({ "provider": pf.name, "models": ids })).into_response(),
        Err(e) => {
            tracing::warn!(provider = %pf.name, error = %e, "models query failed");
            admin_error(StatusCode::BAD_GATEWAY, &e)
        }
    }
}

/// Minimal request context for admin queries: base URL plus a rotated
/// upstream key for the header expressions.
fn admin_meta(state: &SharedState, pf: &onr_core::dsl::ProviderFile) -> Meta {
    let mut meta = Meta::new("", false);
    meta.provider = pf.name.clone();
    meta.base_url = pf.routing.base_url.clone();
    if let Some(key) = state.keys().next_key(&pf.name) {
        meta.channel_key = key.value;
        meta.channel_base_url = key.base_url_override;
    }
    meta
}

fn admin_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "message": message,
                "type": if status.is_client_error() { "invalid_request_error" } else { "api_error" },
                "code": if status == StatusCode::NOT_FOUND { "not_found" } else { "upstream_error" },
            }
        })),
    )
        .into_response()
}

/// `GET /v1/models` — OpenAI-shaped list; `created` is process start time.
pub async fn openai_models(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.model_router().to_openai_list_at(state.started_at_unix))
}

/// `GET /v1beta/models` — Gemini-shaped list.
pub async fn gemini_models(State(state): State<SharedState>) -> impl IntoResponse {
    let ids = state.model_router().models();
    let models: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| json!({"name": id, "displayName": id}))
        .collect();
    Json(json!({ "models": models, "nextPageToken": null }))
}

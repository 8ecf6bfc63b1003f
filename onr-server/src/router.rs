//! HTTP surface assembly.

use crate::handlers::{models, proxy};
use crate::middleware;
use crate::state::SharedState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the gateway router. `/healthz` is open; everything else sits
/// behind the auth middleware. Request-id assignment and access logging
/// wrap the whole surface.
pub fn build_router(state: SharedState) -> Router {
    let secured = Router::new()
        .route("/admin/providers", get(models::admin_providers))
        .route("/admin/providers/:name/balance", get(models::admin_provider_balance))
        .route("/admin/providers/:name/models", get(models::admin_provider_models))
        .route("/v1/models", get(models::openai_models))
        .route("/v1/chat/completions", post(proxy::chat_completions))
        .route("/v1/responses", post(proxy::responses))
        .route("/v1/embeddings", post(proxy::embeddings))
        .route("/v1/messages", post(proxy::claude_messages))
        .route("/v1beta/models", get(models::gemini_models))
        .route("/v1beta/models/*rest", post(proxy::gemini_generate))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(models::healthz))
        .merge(secured)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::access_log_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .with_state(state)
}

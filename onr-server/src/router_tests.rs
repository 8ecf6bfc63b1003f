//! Router-level tests: auth gate, open endpoints, model listing, and
//! route-selection failures. No upstream network involved.

use crate::state::{AppState, SharedState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::io::Write;
use std::sync::Arc;
use tower::ServiceExt;

const PROVIDER_CONF: &str = r#"
syntax "next-router/0.1";
provider "openai" {
  defaults {
    upstream_config { base_url = "https://api.openai.com"; }
    auth { auth_bearer; }
  }
  match api = "chat.completions" {
    upstream { set_path "/v1/chat/completions"; }
    response { resp_passthrough; }
  }
}
"#;

fn test_state() -> (tempfile::TempDir, SharedState) {
    let dir = tempfile::tempdir().unwrap();
    let providers = dir.path().join("providers");
    std::fs::create_dir(&providers).unwrap();
    let mut f = std::fs::File::create(providers.join("openai.conf")).unwrap();
    f.write_all(PROVIDER_CONF.as_bytes()).unwrap();

    let keys_path = dir.path().join("keys.yaml");
    std::fs::write(
        &keys_path,
        "providers:\n  openai:\n    keys:\n      - name: main\n        value: sk-upstream\naccess_keys:\n  - name: client-a\n    value: ak-valid\n",
    )
    .unwrap();

    let models_path = dir.path().join("models.yaml");
    std::fs::write(
        &models_path,
        "models:\n  gpt-4o-mini:\n    providers: [openai]\n    strategy: round_robin\n    owned_by: openai\n",
    )
    .unwrap();

    let mut cfg = onr_types::Config::default();
    onr_core::config::apply_defaults(&mut cfg);
    cfg.auth.api_key = "master-key".to_string();
    cfg.providers.dir = providers.to_string_lossy().into_owned();
    cfg.traffic_dump.enabled = false;

    let registry = Arc::new(onr_core::dsl::Registry::new());
    registry.load_from_dir_strict(&cfg.providers.dir).unwrap();
    let keys = onr_core::keystore::Store::load(&keys_path.to_string_lossy()).unwrap();
    let models = onr_core::models::ModelRouter::load(&models_path.to_string_lossy()).unwrap();
    let upstream = Arc::new(
        onr_core::proxy::client::UpstreamClient::new(std::time::Duration::from_secs(5)).unwrap(),
    );
    let oauth = Arc::new(onr_core::oauth::OAuthClient::new(false, ""));

    let state = Arc::new(AppState::new(
        cfg,
        registry,
        keys,
        models,
        onr_core::pricing::Resolver::empty(),
        upstream,
        oauth,
        None,
        1_700_000_000,
    ));
    (dir, state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_is_open() {
    let (_dir, state) = test_state();
    let app = crate::router::build_router(state);
    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({"ok": true}));
}

#[tokio::test]
async fn missing_credential_is_unauthorized() {
    let (_dir, state) = test_state();
    let app = crate::router::build_router(state);
    let response = app
        .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "invalid_api_key");
    assert_eq!(body["error"]["message"], "unauthorized");
}

#[tokio::test]
async fn master_key_and_access_key_both_authenticate() {
    let (_dir, state) = test_state();
    for credential in ["master-key", "ak-valid"] {
        let app = crate::router::build_router(state.clone());
        let response = app
            .oneshot(
                Request::get("/v1/models")
                    .header("Authorization", format!("Bearer {credential}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "credential {credential}");
        let body = body_json(response).await;
        assert_eq!(body["object"], "list");
        assert_eq!(body["data"][0]["id"], "gpt-4o-mini");
        assert_eq!(body["data"][0]["created"], 1_700_000_000);
    }
}

#[tokio::test]
async fn token_key_authenticates_with_embedded_access_key() {
    let (_dir, state) = test_state();
    let token = onr_core::tokenkey::build(&onr_core::tokenkey::TokenKeyInput {
        access_key: "ak-valid".to_string(),
        use_k64: true,
        ..Default::default()
    });
    let app = crate::router::build_router(state);
    let response = app
        .oneshot(
            Request::get("/v1/models")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn x_api_key_and_goog_header_accepted() {
    let (_dir, state) = test_state();
    for header in ["x-api-key", "x-goog-api-key"] {
        let app = crate::router::build_router(state.clone());
        let response = app
            .oneshot(
                Request::get("/v1/models")
                    .header(header, "ak-valid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "header {header}");
    }
}

#[tokio::test]
async fn admin_providers_lists_loaded_names() {
    let (_dir, state) = test_state();
    let app = crate::router::build_router(state);
    let response = app
        .oneshot(
            Request::get("/admin/providers")
                .header("Authorization", "Bearer master-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({"providers": ["openai"]}));
}

#[tokio::test]
async fn admin_balance_and_models_require_configuration() {
    let (_dir, state) = test_state();
    // the test provider configures neither a balance nor a models query
    for path in ["/admin/providers/openai/balance", "/admin/providers/openai/models"] {
        let app = crate::router::build_router(state.clone());
        let response = app
            .oneshot(
                Request::get(path)
                    .header("Authorization", "Bearer master-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "path {path}");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "not_found");
        assert!(
            body["error"]["message"].as_str().unwrap().contains("configured"),
            "{body}"
        );
    }
}

#[tokio::test]
async fn admin_balance_unknown_provider_is_not_found() {
    let (_dir, state) = test_state();
    let app = crate::router::build_router(state);
    let response = app
        .oneshot(
            Request::get("/admin/providers/nope/balance")
                .header("Authorization", "Bearer master-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("unknown provider"));
}

#[tokio::test]
async fn unknown_model_is_model_not_found() {
    let (_dir, state) = test_state();
    let app = crate::router::build_router(state);
    let response = app
        .oneshot(
            Request::post("/v1/chat/completions")
                .header("Authorization", "Bearer master-key")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    r#"{"model":"does-not-exist","messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "model_not_found");
}

#[tokio::test]
async fn gemini_model_listing_shape() {
    let (_dir, state) = test_state();
    let app = crate::router::build_router(state);
    let response = app
        .oneshot(
            Request::get("/v1beta/models")
                .header("x-goog-api-key", "master-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["models"][0]["name"], "gpt-4o-mini");
    assert_eq!(body["models"][0]["displayName"], "gpt-4o-mini");
}

#[tokio::test]
async fn request_id_echoes_and_generates() {
    let (_dir, state) = test_state();
    let app = crate::router::build_router(state.clone());
    let response = app
        .oneshot(
            Request::get("/healthz")
                .header("X-Onr-Request-Id", "custom-id-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("X-Onr-Request-Id").unwrap().to_str().unwrap(),
        "custom-id-1"
    );

    let app = crate::router::build_router(state);
    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let generated = response.headers().get("X-Onr-Request-Id").unwrap().to_str().unwrap();
    assert_eq!(generated.len(), 28);
    assert!(generated.chars().all(|c| c.is_ascii_digit()));
}

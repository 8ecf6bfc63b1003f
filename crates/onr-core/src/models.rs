//! Model router: maps a client-facing model id to its provider pool.
//!
//! Loaded from `models.yaml`. Strategy is `round_robin`; unknown strategies
//! fall back to round-robin. Selection state is a per-model atomic counter,
//! sticky across requests within one router snapshot.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    models: HashMap<String, RawRoute>,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    #[serde(default)]
    providers: Vec<String>,
    #[serde(default)]
    strategy: String,
    #[serde(default)]
    owned_by: String,
}

/// Routing entry for one model id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Route {
    pub providers: Vec<String>,
    pub strategy: String,
    pub owned_by: String,
}

pub struct ModelRouter {
    routes: HashMap<String, Route>,
    counters: HashMap<String, AtomicUsize>,
}

impl ModelRouter {
    /// Load the models file. A missing file yields an empty router so
    /// `/v1/models` returns an empty list.
    pub fn load(path: &str) -> Result<Self, String> {
        let p = path.trim();
        if p.is_empty() || !std::path::Path::new(p).exists() {
            return Ok(Self::empty());
        }
        let bytes = std::fs::read_to_string(p).map_err(|e| format!("read models file: {e}"))?;
        let raw: RawFile =
            serde_yaml::from_str(&bytes).map_err(|e| format!("parse models file: {e}"))?;

        let mut routes = HashMap::with_capacity(raw.models.len());
        for (id, r) in raw.models {
            let id = id.trim().to_string();
            if id.is_empty() {
                continue;
            }
            let providers: Vec<String> = r
                .providers
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect();
            if providers.is_empty() {
                return Err(format!("model {id:?} has no providers"));
            }
            let strategy = match r.strategy.trim().to_lowercase().as_str() {
                "" | "round_robin" => "round_robin".to_string(),
                other => {
                    tracing::warn!(model = %id, strategy = %other, "unknown strategy, falling back to round_robin");
                    "round_robin".to_string()
                }
            };
            routes.insert(id, Route { providers, strategy, owned_by: r.owned_by.trim().to_string() });
        }
        let counters = routes.keys().map(|k| (k.clone(), AtomicUsize::new(0))).collect();
        Ok(Self { routes, counters })
    }

    pub fn empty() -> Self {
        Self { routes: HashMap::new(), counters: HashMap::new() }
    }

    pub fn route(&self, model: &str) -> Option<&Route> {
        self.routes.get(model.trim())
    }

    /// Sorted model ids.
    pub fn models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.routes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// True when the model's provider pool lists the given provider.
    pub fn model_has_provider(&self, model: &str, provider: &str) -> bool {
        self.route(model)
            .map(|r| r.providers.iter().any(|p| p == provider))
            .unwrap_or(false)
    }

    /// Next provider for a model, round-robin with sticky per-model state.
    pub fn next_provider(&self, model: &str) -> Option<String> {
        let route = self.route(model)?;
        let counter = self.counters.get(model.trim())?;
        let idx = counter.fetch_add(1, Ordering::AcqRel) % route.providers.len();
        Some(route.providers[idx].clone())
    }

    /// OpenAI-shaped model list; `created` is the process start time.
    pub fn to_openai_list_at(&self, created_unix: i64) -> serde_json::Value {
        let data: Vec<serde_json::Value> = self
            .models()
            .iter()
            .map(|id| {
                let owned_by = self
                    .route(id)
                    .map(|r| r.owned_by.clone())
                    .filter(|o| !o.is_empty())
                    .unwrap_or_else(|| "onr".to_string());
                json!({
                    "id": id,
                    "object": "model",
                    "created": created_unix,
                    "owned_by": owned_by,
                })
            })
            .collect();
        json!({ "object": "list", "data": data })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_router(content: &str) -> ModelRouter {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        ModelRouter::load(&path.to_string_lossy()).unwrap()
    }

    #[test]
    fn test_round_robin_cycles_providers() {
        let mr = load_router(
            r#"
models:
  gpt-4o:
    providers: [openai, azure]
    strategy: round_robin
    owned_by: openai
"#,
        );
        assert_eq!(mr.next_provider("gpt-4o").unwrap(), "openai");
        assert_eq!(mr.next_provider("gpt-4o").unwrap(), "azure");
        assert_eq!(mr.next_provider("gpt-4o").unwrap(), "openai");
        assert!(mr.next_provider("unknown").is_none());
    }

    #[test]
    fn test_unknown_strategy_falls_back() {
        let mr = load_router(
            r#"
models:
  m1:
    providers: [a]
    strategy: weighted
"#,
        );
        assert_eq!(mr.route("m1").unwrap().strategy, "round_robin");
    }

    #[test]
    fn test_missing_file_yields_empty_router() {
        let mr = ModelRouter::load("/nonexistent/models.yaml").unwrap();
        assert!(mr.models().is_empty());
        let list = mr.to_openai_list_at(0);
        assert_eq!(list["data"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_openai_list_shape() {
        let mr = load_router(
            r#"
models:
  gpt-4o:
    providers: [openai]
    owned_by: openai
"#,
        );
        let list = mr.to_openai_list_at(1700000000);
        assert_eq!(list["object"], "list");
        assert_eq!(list["data"][0]["id"], "gpt-4o");
        assert_eq!(list["data"][0]["created"], 1700000000);
        assert_eq!(list["data"][0]["owned_by"], "openai");
    }

    #[test]
    fn test_model_without_providers_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.yaml");
        std::fs::write(&path, "models:\n  m1:\n    providers: []\n").unwrap();
        assert!(ModelRouter::load(&path.to_string_lossy()).is_err());
    }
}

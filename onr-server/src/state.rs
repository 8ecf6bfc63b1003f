//! Shared application state.
//!
//! Hot-reloadable pieces (keystore, model router, pricing) are held as
//! `Arc` snapshots behind a lock: readers clone the `Arc`, the reload
//! supervisor swaps it in one store. The provider registry manages its own
//! snapshot the same way.

use onr_core::dsl::Registry;
use onr_core::keystore::Store;
use onr_core::logx::{AccessLogFormatter, AccessRotateWriter};
use onr_core::models::ModelRouter;
use onr_core::oauth::OAuthClient;
use onr_core::pricing::Resolver;
use onr_core::proxy::client::UpstreamClient;
use onr_types::Config;
use std::sync::{Arc, Mutex, RwLock};

/// Where access log lines go.
pub enum AccessLogSink {
    Stdout,
    File(Mutex<std::fs::File>),
    Rotating(AccessRotateWriter),
}

pub struct AccessLog {
    pub formatter: Option<AccessLogFormatter>,
    pub sink: AccessLogSink,
    /// Colorized status only on console sinks.
    pub color: bool,
}

impl AccessLog {
    pub fn write_line(&self, line: &str) {
        use std::io::Write;
        let data = format!("{line}\n");
        match &self.sink {
            AccessLogSink::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(data.as_bytes());
            }
            AccessLogSink::File(f) => {
                if let Ok(mut f) = f.lock() {
                    let _ = f.write_all(data.as_bytes());
                }
            }
            AccessLogSink::Rotating(w) => {
                if let Err(e) = w.write(data.as_bytes()) {
                    tracing::warn!(error = %e, "access log write failed");
                }
            }
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub registry: Arc<Registry>,
    keys: RwLock<Arc<Store>>,
    model_router: RwLock<Arc<ModelRouter>>,
    pricing: RwLock<Arc<Resolver>>,
    pub upstream: Arc<UpstreamClient>,
    pub oauth: Arc<OAuthClient>,
    pub access_log: Option<Arc<AccessLog>>,
    pub started_at_unix: i64,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        registry: Arc<Registry>,
        keys: Store,
        model_router: ModelRouter,
        pricing: Resolver,
        upstream: Arc<UpstreamClient>,
        oauth: Arc<OAuthClient>,
        access_log: Option<Arc<AccessLog>>,
        started_at_unix: i64,
    ) -> Self {
        Self {
            config,
            registry,
            keys: RwLock::new(Arc::new(keys)),
            model_router: RwLock::new(Arc::new(model_router)),
            pricing: RwLock::new(Arc::new(pricing)),
            upstream,
            oauth,
            access_log,
            started_at_unix,
        }
    }

    pub fn keys(&self) -> Arc<Store> {
        self.keys.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_keys(&self, keys: Store) {
        *self.keys.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(keys);
    }

    pub fn model_router(&self) -> Arc<ModelRouter> {
        self.model_router.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_model_router(&self, mr: ModelRouter) {
        *self.model_router.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(mr);
    }

    pub fn pricing(&self) -> Arc<Resolver> {
        self.pricing.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_pricing(&self, resolver: Resolver) {
        *self.pricing.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(resolver);
    }

    pub fn dump_config(&self) -> onr_core::trafficdump::DumpConfig {
        onr_core::trafficdump::DumpConfig {
            enabled: self.config.traffic_dump.enabled,
            dir: self.config.traffic_dump.dir.clone(),
            file_path: self.config.traffic_dump.file_path.clone(),
            max_bytes: self.config.traffic_dump.max_bytes.max(0) as usize,
            mask_secrets: self.config.traffic_dump.mask_secrets.unwrap_or(true),
        }
    }
}

//! Open-Next-Router — a reverse-proxy gateway unifying heterogeneous LLM
//! back-ends behind one set of HTTP endpoints.
//!
//! Boot order: config, access log sink, PID file, provider registry
//! (strict), keystore/models/pricing, upstream + OAuth clients, reload
//! handlers, then serve until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod handlers;
mod middleware;
mod reload;
mod result_context;
mod router;
#[cfg(test)]
mod router_tests;
mod state;

use state::{AccessLog, AccessLogSink, AppState};

fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("onr: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cfg_path = config_path_from_args();
    let cfg = onr_core::config::load(&cfg_path)
        .with_context(|| format!("load config {cfg_path:?}"))?;

    init_logging(&cfg.logging.level);

    let runtime = tokio::runtime::Runtime::new().context("start runtime")?;
    runtime.block_on(serve(cfg))
}

fn config_path_from_args() -> String {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    return path;
                }
            }
            other => {
                if let Some(path) = other.strip_prefix("--config=") {
                    return path.to_string();
                }
            }
        }
    }
    "./config.yaml".to_string()
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.trim().to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

async fn serve(cfg: onr_types::Config) -> Result<()> {
    let started_at = chrono::Utc::now().timestamp();

    let access_log = open_access_log(&cfg)?;
    let _pid_guard = write_pid_file(&cfg.server.pid_file)?;

    let registry = Arc::new(onr_core::dsl::Registry::new());
    let load_res = registry
        .load_from_dir_strict(&cfg.providers.dir)
        .with_context(|| format!("load providers dir {:?}", cfg.providers.dir))?;
    info!(
        providers = %load_res.loaded.join(","),
        dir = %cfg.providers.dir,
        "providers loaded"
    );
    for w in &load_res.warnings {
        tracing::warn!("{w}");
    }

    let keys = onr_core::keystore::Store::load(&cfg.keys.file)
        .with_context(|| format!("load keys file {:?}", cfg.keys.file))?;
    let model_router = onr_core::models::ModelRouter::load(&cfg.models.file)
        .map_err(|e| anyhow::anyhow!("load models file {:?}: {e}", cfg.models.file))?;
    let pricing =
        onr_core::pricing::Resolver::load(&cfg.pricing.file, &cfg.pricing.overrides_file)
            .map_err(|e| anyhow::anyhow!("load pricing files: {e}"))?;

    let write_timeout = std::time::Duration::from_millis(cfg.server.write_timeout_ms);
    let upstream = Arc::new(
        onr_core::proxy::client::UpstreamClient::new(write_timeout)
            .map_err(|e| anyhow::anyhow!("build upstream client: {e}"))?,
    );
    upstream.set_proxies(&cfg.upstream_proxies.by_provider);

    let oauth = Arc::new(onr_core::oauth::OAuthClient::new(
        cfg.oauth.token_persist.enabled,
        &cfg.oauth.token_persist.dir,
    ));

    let listen = normalize_listen(&cfg.server.listen);
    let state: state::SharedState = Arc::new(AppState::new(
        cfg,
        registry,
        keys,
        model_router,
        pricing,
        upstream,
        oauth,
        access_log,
        started_at,
    ));

    let reload_mu: reload::ReloadMutex = Arc::new(tokio::sync::Mutex::new(()));
    reload::install_reload_signal_handler(state.clone(), reload_mu.clone());
    let _watcher = reload::install_providers_auto_reload(state.clone(), reload_mu)
        .context("init providers auto reload")?;

    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("bind {listen:?}"))?;
    info!(listen = %listen, "open-next-router listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    info!("shutdown complete");
    Ok(())
}

/// `:3300` means all interfaces; anything with a host passes through.
fn normalize_listen(listen: &str) -> String {
    let l = listen.trim();
    if let Some(port) = l.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        l.to_string()
    }
}

fn open_access_log(cfg: &onr_types::Config) -> Result<Option<Arc<AccessLog>>> {
    if cfg.logging.access_log != Some(true) {
        return Ok(None);
    }
    let format = onr_core::logx::resolve_access_log_format(
        &cfg.logging.access_log_format,
        &cfg.logging.access_log_format_preset,
    )
    .map_err(|e| anyhow::anyhow!("resolve access log format: {e}"))?;
    let formatter = onr_core::logx::AccessLogFormatter::compile(&format)
        .map_err(|e| anyhow::anyhow!("compile access_log_format: {e}"))?;

    let path = cfg.logging.access_log_path.trim();
    if path.is_empty() {
        return Ok(Some(Arc::new(AccessLog {
            formatter,
            sink: AccessLogSink::Stdout,
            color: true,
        })));
    }

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create access log dir {parent:?}"))?;
        }
    }

    let rotate = &cfg.logging.access_log_rotate;
    let sink = if rotate.enabled {
        AccessLogSink::Rotating(
            onr_core::logx::AccessRotateWriter::new(onr_core::logx::AccessLogRotateOptions {
                path: path.to_string(),
                max_size_mb: rotate.max_size_mb.unwrap_or(100),
                max_backups: rotate.max_backups.unwrap_or(14),
                max_age_days: rotate.max_age_days.unwrap_or(14),
                compress: rotate.compress,
                now: None,
            })
            .context("init rotating access log")?,
        )
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open access log {path:?}"))?;
        AccessLogSink::File(std::sync::Mutex::new(file))
    };

    Ok(Some(Arc::new(AccessLog { formatter, sink, color: false })))
}

/// PID file via write-temp + rename; removed when the guard drops.
struct PidGuard(Option<std::path::PathBuf>);

impl Drop for PidGuard {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn write_pid_file(path: &str) -> Result<PidGuard> {
    let path = path.trim();
    if path.is_empty() {
        return Ok(PidGuard(None));
    }
    let path_buf = std::path::PathBuf::from(path);
    if let Some(parent) = path_buf.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create pid dir {parent:?}"))?;
        }
    }
    let tmp = path_buf.with_extension("tmp");
    let content = format!("{}\n", std::process::id());
    std::fs::write(&tmp, content).with_context(|| format!("write pid file {tmp:?}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600));
    }
    std::fs::rename(&tmp, &path_buf).with_context(|| format!("rename pid file to {path_buf:?}"))?;
    Ok(PidGuard(Some(path_buf)))
}

/// SIGINT/SIGTERM trigger graceful shutdown: stop accepting, drain
/// in-flight requests, then exit.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, initiating graceful shutdown"),
        () = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }
}

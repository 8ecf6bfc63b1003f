//! Hot-reload supervisor: SIGHUP reloads providers, keystore, models,
//! pricing and the upstream proxy map; the filesystem watcher reloads
//! providers only. Both paths serialize on one mutex and swap snapshots
//! atomically; a failed load keeps the previous snapshot in force.

use crate::state::SharedState;
use notify::{RecursiveMode, Watcher};
use onr_core::dsl::diff_changed_providers;
use onr_core::keystore::Store;
use onr_core::models::ModelRouter;
use onr_core::pricing::Resolver;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub type ReloadMutex = Arc<tokio::sync::Mutex<()>>;

/// Reload providers only (watcher path). Returns the changed provider
/// names.
fn reload_providers(state: &SharedState) -> Result<Vec<String>, String> {
    let dir = &state.config.providers.dir;
    let before = state.registry.fingerprints();
    let res = state
        .registry
        .reload_from_dir(dir)
        .map_err(|e| format!("reload providers dir {dir:?}: {e}"))?;
    if !res.skipped.is_empty() {
        tracing::warn!(
            dir = %dir,
            skipped = %res.skipped.join(", "),
            "skipped invalid provider files at reload"
        );
    }
    for w in &res.warnings {
        tracing::warn!("{w}");
    }
    let after = state.registry.fingerprints();
    Ok(diff_changed_providers(&before, &after))
}

/// Full reload (SIGHUP path): providers plus keystore, models, pricing and
/// the per-provider proxy map. Env overrides re-evaluate on each load.
fn reload_runtime(state: &SharedState) -> Result<Vec<String>, String> {
    let changed = reload_providers(state)?;

    let keys = Store::load(&state.config.keys.file)
        .map_err(|e| format!("reload keys file {:?}: {e}", state.config.keys.file))?;
    let models = ModelRouter::load(&state.config.models.file)
        .map_err(|e| format!("reload models file {:?}: {e}", state.config.models.file))?;
    let pricing = Resolver::load(&state.config.pricing.file, &state.config.pricing.overrides_file)
        .map_err(|e| format!("reload pricing files: {e}"))?;

    state.set_keys(keys);
    state.set_model_router(models);
    state.set_pricing(pricing);

    let mut proxies = onr_types::Config {
        upstream_proxies: state.config.upstream_proxies.clone(),
        ..onr_types::Config::default()
    };
    onr_core::config::apply_env_overrides(&mut proxies);
    state.upstream.set_proxies(&proxies.upstream_proxies.by_provider);

    Ok(changed)
}

/// Install the SIGHUP handler.
pub fn install_reload_signal_handler(state: SharedState, mu: ReloadMutex) {
    tokio::spawn(async move {
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGHUP handler");
                return;
            }
        };
        while sighup.recv().await.is_some() {
            let _guard = mu.lock().await;
            match reload_runtime(&state) {
                Ok(changed) => tracing::info!(
                    providers_dir = %state.config.providers.dir,
                    changed_providers = %names_for_log(&changed),
                    keys_file = %state.config.keys.file,
                    models_file = %state.config.models.file,
                    pricing_file = %state.config.pricing.file,
                    "reload ok (signal)"
                ),
                Err(e) => tracing::error!(error = %e, "reload failed (signal)"),
            }
        }
    });
}

/// Install the providers-directory watcher when auto-reload is enabled.
/// Returns the watcher so it stays alive for the process lifetime.
pub fn install_providers_auto_reload(
    state: SharedState,
    mu: ReloadMutex,
) -> anyhow::Result<Option<notify::RecommendedWatcher>> {
    if !state.config.providers.auto_reload.enabled {
        return Ok(None);
    }
    let dir = state.config.providers.dir.trim().to_string();
    if dir.is_empty() {
        return Ok(None);
    }
    let debounce = Duration::from_millis(state.config.providers.auto_reload.debounce_ms);

    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if should_trigger_reload(&event) {
                    let _ = tx.try_send(());
                }
            }
            Err(e) => tracing::warn!(error = %e, "providers auto-reload watcher error"),
        }
    })?;
    watcher.watch(Path::new(&dir), RecursiveMode::Recursive)?;

    let debounce_ms = state.config.providers.auto_reload.debounce_ms;
    tokio::spawn(async move {
        loop {
            if rx.recv().await.is_none() {
                return;
            }
            // debounce: keep absorbing triggers until the window is quiet
            loop {
                match tokio::time::timeout(debounce, rx.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }
            let _guard = mu.lock().await;
            match reload_providers(&state) {
                Ok(changed) => tracing::info!(
                    providers_dir = %state.config.providers.dir,
                    changed_providers = %names_for_log(&changed),
                    "reload ok (providers auto)"
                ),
                Err(e) => tracing::error!(error = %e, "reload failed (providers auto)"),
            }
        }
    });

    tracing::info!(dir = %dir, debounce_ms, "providers auto-reload enabled");
    Ok(Some(watcher))
}

/// Dotfile events never trigger a reload.
fn should_trigger_reload(event: &notify::Event) -> bool {
    use notify::EventKind;
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .map(|n| !n.starts_with('.'))
            .unwrap_or(false)
    })
}

fn names_for_log(names: &[String]) -> String {
    if names.is_empty() {
        "<none>".to_string()
    } else {
        names.join(",")
    }
}

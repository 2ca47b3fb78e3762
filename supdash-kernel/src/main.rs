/**
 * SUPDASH KERNEL - Point d'entrée du tableau de bord supervisord
 *
 * RÔLE : Bootstrap : config, registre, client XML-RPC, agrégateur, dispatcher, HTTP.
 * Config absente ou invalide = arrêt immédiat (jamais de registre vide silencieux).
 *
 * SIGNAUX : SIGHUP recharge la config dans le registre (upsert), Ctrl-C arrête proprement.
 */

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use supdash_kernel::config::{config_path, load_config};
use supdash_kernel::health::HealthTracker;
use supdash_kernel::http::{self, AppState};
use supdash_kernel::registry::{JsonFileStore, Registry};
use supdash_kernel::rpc::SupervisorConnector;
use supdash_kernel::{ControlDispatcher, StatusAggregator};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("supdash_kernel=info")),
        )
        .init();

    let path = config_path();
    let cfg = load_config(&path)
        .await
        .with_context(|| format!("failed to load config {}", path.display()))?;

    let registry = match &cfg.registry.data_file {
        Some(file) => {
            let store = JsonFileStore::open(file.clone())
                .with_context(|| format!("failed to open registry file {}", file.display()))?;
            Registry::with_store(store).context("failed to read registry file")?
        }
        None => Registry::in_memory(),
    };
    let summary = registry
        .load(cfg.daemon_list()?)
        .context("failed to load daemons into registry")?;
    info!(created = summary.created, updated = summary.updated, total = registry.len(), "registry loaded");
    let registry = Arc::new(registry);

    let timeout = cfg.rpc_timeout();
    let connector = Arc::new(SupervisorConnector::new(timeout).context("failed to build HTTP client")?);
    let aggregator = StatusAggregator::new(registry.clone(), connector.clone(), timeout).with_fan_out(!cfg.rpc.sequential);
    let dispatcher = ControlDispatcher::new(registry.clone(), connector, timeout);

    #[cfg(unix)]
    spawn_reload_on_sighup(path.clone(), registry.clone());

    let app_state = AppState {
        registry,
        aggregator: Arc::new(aggregator),
        dispatcher: Arc::new(dispatcher),
        clock: Arc::new(cfg.clock()?),
        health_tracker: HealthTracker::new(),
    };
    let app = http::build_router(app_state);

    let addr: SocketAddr = match std::env::var("SUPDASH_LISTEN") {
        Ok(listen) => listen.parse().with_context(|| format!("invalid SUPDASH_LISTEN {listen:?}"))?,
        Err(_) => cfg.listen_addr()?,
    };
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn reload(path: &Path, registry: &Registry) -> Result<()> {
    let cfg = load_config(path).await?;
    let summary = registry.load(cfg.daemon_list()?)?;
    info!(created = summary.created, updated = summary.updated, total = registry.len(), "registry reloaded");
    Ok(())
}

#[cfg(unix)]
fn spawn_reload_on_sighup(path: PathBuf, registry: Arc<Registry>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "cannot install SIGHUP handler");
                return;
            }
        };
        while hangups.recv().await.is_some() {
            // échec de rechargement : le registre courant reste en place
            if let Err(e) = reload(&path, &registry).await {
                error!(error = %e, path = %path.display(), "config reload failed");
            }
        }
    });
}

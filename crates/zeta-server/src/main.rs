mod args;
mod builder;
mod environment;
mod handlers;
mod heartbeat;
mod locks;
mod pns;
mod reaper;
mod service;
mod state;
#[cfg(test)]
mod testutil;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use clap::Parser;

use zeta_engine::{ContainerEngine, DockerEngine};
use zeta_store::MetaStore;

use crate::args::Args;
use crate::pns::PortNameSystem;
use crate::service::{ZetaConfig, ZetaService};
use crate::state::AppState;

pub fn router(st: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/zeta/meta", get(handlers::get_all_zeta_metadata))
        .route("/zeta/meta/:name", get(handlers::get_zeta_metadata))
        .route("/zeta/create/:name", post(handlers::create_zeta))
        .route("/zeta/run/:name", post(handlers::run_zeta))
        .route("/zeta/:name", delete(handlers::delete_zeta))
        .route("/container/:id", get(handlers::get_container))
        .route("/container/manage/:id", post(handlers::manage_container))
        .with_state(st)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    zeta_common::telemetry::init_tracing("zeta-server");
    tracing::info!(listen_addr = %args.listen_addr, "zeta-server starting");

    let engine: Arc<dyn ContainerEngine> = Arc::new(DockerEngine::connect(&args.docker_socket)?);
    engine
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("container engine is not reachable: {e}"))?;

    let store = Arc::new(MetaStore::open(Path::new(&args.db_path))?);
    let pns = Arc::new(PortNameSystem::new());

    environment::setup_environment(engine.as_ref(), &args.network).await?;

    let socket_path = heartbeat::socket_path(Path::new(&args.work_dir));
    let heartbeat_listener = heartbeat::bind_socket(&socket_path)?;
    // runners need the absolute host path for the bind mount
    let heartbeat_socket = socket_path.canonicalize().unwrap_or_else(|_| socket_path.clone());
    tokio::spawn(heartbeat::run_listener(heartbeat_listener, store.clone()));
    tracing::info!(socket = %heartbeat_socket.display(), "heartbeat listener started");

    tokio::spawn(reaper::reaper_loop(
        engine.clone(),
        store.clone(),
        pns.clone(),
        Duration::from_secs(args.idle_timeout_secs),
        Duration::from_secs(args.reap_interval_secs),
    ));

    let mut cfg = ZetaConfig::new(
        args.network.clone(),
        args.base_runner_image.clone(),
        heartbeat_socket,
    );
    cfg.start_timeout = Duration::from_secs(args.start_timeout_secs);
    let service = Arc::new(ZetaService::new(
        engine.clone(),
        store.clone(),
        pns.clone(),
        cfg,
    ));

    let st = AppState {
        service,
        engine: engine.clone(),
    };
    let app = router(st);

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    tracing::info!(listen_addr = %args.listen_addr, "control plane listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, cleaning the zeta environment");
    environment::clean_environment(engine.as_ref(), &args.network).await;
    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::warn!(error = %e, "failed to remove the heartbeat socket file");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for the shutdown signal");
    }
}

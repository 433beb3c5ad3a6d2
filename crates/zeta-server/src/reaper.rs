use std::sync::Arc;
use std::time::Duration;

use zeta_common::util::now_secs;
use zeta_engine::ContainerEngine;
use zeta_store::MetaStore;

use crate::pns::PortNameSystem;

/// Stop and remove runner containers that have gone silent.
///
/// A container with `last_heartbeat == 0` has not served its first
/// invocation yet and is left alone; one whose heartbeat is older than
/// `idle_timeout` is torn down and its metadata and port reclaimed.
pub async fn reaper_loop(
    engine: Arc<dyn ContainerEngine>,
    store: Arc<MetaStore>,
    pns: Arc<PortNameSystem>,
    idle_timeout: Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let reaped = sweep(engine.as_ref(), &store, &pns, idle_timeout).await;
        if reaped > 0 {
            tracing::info!(reaped, "reaped idle runner containers");
        }
    }
}

/// One pass over all functions with a live container row. Engine failures
/// for a single container are logged and the pass continues.
pub async fn sweep(
    engine: &dyn ContainerEngine,
    store: &MetaStore,
    pns: &PortNameSystem,
    idle_timeout: Duration,
) -> usize {
    let functions = match store.fetch_all() {
        Ok(functions) => functions,
        Err(e) => {
            tracing::warn!(error = %e, "reaper could not snapshot functions");
            return 0;
        }
    };

    let now = now_secs();
    let mut reaped = 0;
    for meta in functions {
        let Some(container) = meta.runner_container else {
            continue;
        };
        if container.last_heartbeat == 0 {
            // still initializing
            continue;
        }
        let idle_secs = now - container.last_heartbeat;
        if idle_secs <= idle_timeout.as_secs() as i64 {
            continue;
        }

        tracing::info!(
            zeta = %meta.zeta_name,
            container = %container.container_name,
            idle_secs,
            "reaping idle runner container"
        );

        match engine.exists(&container.container_name).await {
            Ok(true) => {
                if let Err(e) = engine.stop(&container.container_name).await {
                    tracing::warn!(container = %container.container_name, error = %e, "failed to stop idle container");
                }
                if let Err(e) = engine.remove(&container.container_name).await {
                    tracing::warn!(container = %container.container_name, error = %e, "failed to remove idle container");
                    continue;
                }
            }
            Ok(false) => {
                tracing::warn!(container = %container.container_name, "idle container already gone from the engine");
            }
            Err(e) => {
                tracing::warn!(container = %container.container_name, error = %e, "engine lookup failed, skipping");
                continue;
            }
        }

        match store.delete_container_of_function(&meta.zeta_name) {
            Ok(_) => {
                pns.release(container.host_port);
                reaped += 1;
            }
            Err(e) => {
                tracing::warn!(zeta = %meta.zeta_name, error = %e, "failed to drop container row");
            }
        }
    }
    reaped
}

use zeta_common::ZetaError;
use zeta_engine::ContainerEngine;

/// Ensure the shared bridge network all runner containers join exists.
/// Setup failures are fatal to startup.
pub async fn setup_environment(
    engine: &dyn ContainerEngine,
    network: &str,
) -> Result<(), ZetaError> {
    if engine.network_exists(network).await? {
        tracing::info!(%network, "reusing existing runner network");
        return Ok(());
    }
    engine.create_network(network).await?;
    tracing::info!(%network, "created runner network");
    Ok(())
}

/// Remove the shared network at shutdown. Teardown failures are logged only.
pub async fn clean_environment(engine: &dyn ContainerEngine, network: &str) {
    match engine.remove_network(network).await {
        Ok(()) => tracing::info!(%network, "removed runner network"),
        Err(e) => tracing::error!(%network, error = %e, "unable to delete the runner network"),
    }
}

use thiserror::Error;

/// Failure kinds shared across the control plane and the runner agent.
///
/// Adapters translate third-party failures into one of these kinds at the
/// boundary; the orchestrator decides which ones it can recover from.
#[derive(Debug, Error)]
pub enum ZetaError {
    /// The caller sent something we refuse to act on (bad name, bad upload).
    #[error("{0}")]
    InvalidInput(String),

    /// The named function, container or image does not exist.
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// A cold or warm start did not become ready before its deadline.
    #[error("{0}")]
    StartTimeout(String),

    /// The engine could not build a runner image.
    #[error("{0}")]
    BuildFailed(String),

    /// The container engine rejected or never answered a request.
    #[error("{0}")]
    EngineUnavailable(String),

    /// The metadata store failed.
    #[error("{0}")]
    Store(String),

    /// The user handler raised, or the runner could not load it.
    #[error("{0}")]
    Handler(String),

    /// We could not talk to a runner container at all.
    #[error("{0}")]
    Transport(String),
}

impl ZetaError {
    /// Canonical HTTP status for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ZetaError::InvalidInput(_) => 400,
            ZetaError::NotFound(_) => 404,
            ZetaError::Conflict(_) => 409,
            ZetaError::StartTimeout(_) => 500,
            ZetaError::BuildFailed(_) => 500,
            ZetaError::EngineUnavailable(_) => 503,
            ZetaError::Store(_) => 500,
            ZetaError::Handler(_) => 500,
            ZetaError::Transport(_) => 502,
        }
    }
}

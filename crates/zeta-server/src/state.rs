use std::sync::Arc;

use zeta_engine::ContainerEngine;

use crate::service::ZetaService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ZetaService>,
    pub engine: Arc<dyn ContainerEngine>,
}

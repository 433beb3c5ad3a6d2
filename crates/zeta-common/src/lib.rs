pub mod error;
pub mod telemetry;
pub mod types;
pub mod util;

pub use error::ZetaError;
pub use types::{
    HeartbeatRecord, RunnerContainerInfo, RunnerImageInfo, ZetaMetadata, RUNNER_PORT,
    RUNNER_SOCKET_PATH,
};

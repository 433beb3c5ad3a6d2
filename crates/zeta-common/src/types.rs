use serde::{Deserialize, Deserializer, Serialize};

/// Port every runner agent listens on inside its container.
pub const RUNNER_PORT: u16 = 8000;

/// Where the control-plane heartbeat socket is bind-mounted inside a runner.
pub const RUNNER_SOCKET_PATH: &str = "/zeta/tmp/docker_proxy.sock";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunnerImageInfo {
    pub image_id: String,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunnerContainerInfo {
    pub container_id: String,
    pub container_name: String,
    pub container_port: u16,
    pub host_port: u16,
    pub host_ip: String,
    /// Epoch seconds of the last heartbeat; 0 until the first one arrives.
    pub last_heartbeat: i64,
}

/// Registered state of one zeta function: exactly one runner image, at most
/// one runner container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ZetaMetadata {
    pub zeta_name: String,
    pub created_at: i64,
    pub runner_image: RunnerImageInfo,
    pub runner_container: Option<RunnerContainerInfo>,
}

/// Liveness signal a runner emits over the bind-mounted UNIX socket after
/// each successful invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRecord {
    #[serde(rename = "containerId")]
    pub container_id: String,
    /// Seconds since the epoch. Senders may put integer or float seconds on
    /// the wire; it is normalized to whole seconds here.
    #[serde(deserialize_with = "de_epoch_seconds")]
    pub timestamp: i64,
}

fn de_epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = serde_json::Number::deserialize(deserializer)?;
    n.as_i64()
        .or_else(|| n.as_f64().map(|f| f as i64))
        .ok_or_else(|| serde::de::Error::custom("timestamp is not a number of seconds"))
}

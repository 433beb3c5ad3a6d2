use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "ZETA_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Path of the container engine's UNIX socket.
    #[arg(long, env = "ZETA_DOCKER_SOCKET", default_value = "/var/run/docker.sock")]
    pub docker_socket: String,

    /// Location of the metadata database file.
    #[arg(long, env = "ZETA_DB_PATH", default_value = "zeta.db")]
    pub db_path: String,

    /// Control-plane working directory; the heartbeat socket lives at
    /// `<work_dir>/tmp/docker_proxy.sock`.
    #[arg(long, env = "ZETA_WORK_DIR", default_value = ".")]
    pub work_dir: String,

    /// Name of the shared bridge network all runner containers join.
    #[arg(long, env = "ZETA_NETWORK", default_value = "zeta_network")]
    pub network: String,

    /// Base image runner images are built from.
    #[arg(long, env = "ZETA_BASE_RUNNER_IMAGE", default_value = "python-base-runner:latest")]
    pub base_runner_image: String,

    /// Seconds a cold or warm start may take before it is rolled back.
    #[arg(long, default_value_t = 60)]
    pub start_timeout_secs: u64,

    /// Seconds after the last heartbeat before a runner container is
    /// considered idle.
    #[arg(long, default_value_t = 30)]
    pub idle_timeout_secs: u64,

    /// How often the reaper scans for idle runner containers.
    #[arg(long, default_value_t = 15)]
    pub reap_interval_secs: u64,
}

use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "ZETA_RUNNER_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    /// The user handler baked into this runner image.
    #[arg(long, env = "ZETA_HANDLER_PATH", default_value = "/zeta/handler/handler.py")]
    pub handler_path: String,

    /// Control-plane heartbeat socket, bind-mounted into the container.
    #[arg(long, env = "ZETA_HEARTBEAT_SOCKET", default_value = "/zeta/tmp/docker_proxy.sock")]
    pub heartbeat_socket: String,

    #[arg(long, env = "ZETA_PYTHON_BIN", default_value = "python3")]
    pub python_bin: String,
}

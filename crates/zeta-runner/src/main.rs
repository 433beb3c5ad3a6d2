mod args;
mod handler;
mod heartbeat;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};

use zeta_common::util::now_secs;

use crate::args::Args;

#[derive(Clone)]
struct RunnerState {
    python_bin: String,
    handler_path: String,
    heartbeat_socket: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    zeta_common::telemetry::init_tracing("zeta-runner");

    let st = RunnerState {
        python_bin: args.python_bin,
        handler_path: args.handler_path,
        heartbeat_socket: args.heartbeat_socket,
    };

    let app = Router::new()
        .route("/is-running", get(is_running))
        .route("/run", post(run))
        .with_state(st);

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    tracing::info!(listen_addr = %args.listen_addr, "runner agent listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Readiness signal the control plane probes during a start.
async fn is_running() -> Json<Value> {
    Json(json!({
        "status": "UP",
        "timestamp": now_secs(),
    }))
}

async fn run(
    State(st): State<RunnerState>,
    params: Option<Json<Value>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Json(params) = params.unwrap_or_else(|| Json(json!({})));
    match handler::run_handler(&st.python_bin, &st.handler_path, &params).await {
        Ok(result) => {
            let socket = st.heartbeat_socket.clone();
            tokio::spawn(async move {
                heartbeat::send_heartbeat(&socket).await;
            });
            Ok(Json(result))
        }
        Err(e) => {
            tracing::error!(error = %e, "handler invocation failed");
            let status = StatusCode::from_u16(e.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Err((
                status,
                Json(json!({
                    "status": "error",
                    "message": e.to_string(),
                })),
            ))
        }
    }
}

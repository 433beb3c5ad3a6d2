use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};

use zeta_common::{HeartbeatRecord, ZetaError};
use zeta_store::MetaStore;

const READ_CHUNK: usize = 1024;

pub fn socket_path(work_dir: &Path) -> PathBuf {
    work_dir.join("tmp").join("docker_proxy.sock")
}

/// Bind the heartbeat socket, replacing any stale file from a previous run.
pub fn bind_socket(path: &Path) -> std::io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

/// Accept heartbeat connections, one at a time, for the process lifetime.
/// Runners connect, write a single JSON record and close; malformed
/// payloads are logged and skipped.
pub async fn run_listener(listener: UnixListener, store: Arc<MetaStore>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _addr)) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                continue;
            }
        };
        if let Err(e) = handle_connection(stream, &store).await {
            tracing::warn!(error = %e, "dropping heartbeat");
        }
    }
}

async fn handle_connection(mut stream: UnixStream, store: &MetaStore) -> Result<(), ZetaError> {
    let mut payload = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ZetaError::Transport(format!("heartbeat read failed: {e}")))?;
        if n == 0 {
            break;
        }
        payload.extend_from_slice(&chunk[..n]);
    }
    if payload.is_empty() {
        return Ok(());
    }

    // normally one record per connection; extra records are last-write-wins
    let mut records = serde_json::Deserializer::from_slice(&payload).into_iter::<HeartbeatRecord>();
    let mut seen = false;
    while let Some(next) = records.next() {
        let record =
            next.map_err(|e| ZetaError::Transport(format!("malformed heartbeat record: {e}")))?;
        tracing::debug!(container = %record.container_id, timestamp = record.timestamp, "heartbeat received");
        let matched = store.update_heartbeat(&record.container_id, record.timestamp)?;
        if !matched {
            // the container may have been reaped a moment ago
            tracing::debug!(container = %record.container_id, "heartbeat for unknown container");
        }
        seen = true;
    }
    if !seen {
        return Err(ZetaError::Transport("empty heartbeat record".to_string()));
    }
    Ok(())
}

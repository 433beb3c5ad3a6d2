use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use zeta_common::util::now_secs;
use zeta_common::HeartbeatRecord;

/// Tell the control plane this container just served an invocation.
/// Heartbeat trouble never fails the invocation itself.
pub async fn send_heartbeat(socket_path: &str) {
    let container_id = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let record = HeartbeatRecord {
        container_id,
        timestamp: now_secs(),
    };
    match try_send(socket_path, &record).await {
        Ok(()) => tracing::debug!(container = %record.container_id, "heartbeat sent"),
        Err(e) => tracing::warn!(error = %e, "failed to send heartbeat"),
    }
}

async fn try_send(socket_path: &str, record: &HeartbeatRecord) -> std::io::Result<()> {
    let mut stream = UnixStream::connect(socket_path).await?;
    let payload = serde_json::to_vec(record)?;
    stream.write_all(&payload).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_record_arrives_on_the_socket() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("docker_proxy.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let record = HeartbeatRecord {
            container_id: "cafebabe".to_string(),
            timestamp: 1_700_000_000,
        };
        try_send(path.to_str().unwrap(), &record).await.unwrap();

        let (mut stream, _addr) = listener.accept().await.unwrap();
        let mut payload = Vec::new();
        stream.read_to_end(&mut payload).await.unwrap();

        let received: HeartbeatRecord = serde_json::from_slice(&payload).unwrap();
        assert_eq!(received, record);

        // the wire shape other heartbeat senders rely on
        let raw: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(raw["containerId"], "cafebabe");
        assert!(raw["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn test_send_without_listener_does_not_panic() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.sock");
        send_heartbeat(path.to_str().unwrap()).await;
    }
}

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;

use zeta_common::ZetaError;

pub const PORT_RANGE_START: u16 = 1024;
pub const PORT_RANGE_END: u16 = 49151;

/// A connect that neither succeeds nor gets refused within this window is
/// treated as a bound port.
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Port Name System: the in-process table of host ports handed to runner
/// containers. An entry exists exactly while the control plane believes a
/// container is (or is being) started on that port. Never persisted.
#[derive(Debug, Default)]
pub struct PortNameSystem {
    table: Mutex<HashMap<u16, String>>,
}

impl PortNameSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, String>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pick a free host port and record it for `name` in one step.
    ///
    /// Candidates start at a uniform random point of the dynamic range and
    /// advance past ports that are already in the table or already bound by
    /// another process on the host. The engine would otherwise fail the
    /// container start after the image build already happened.
    pub async fn allocate(&self, name: &str) -> Result<u16, ZetaError> {
        let mut port: u16 = rand::rng().random_range(PORT_RANGE_START..=PORT_RANGE_END);
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            if attempts > u32::from(PORT_RANGE_END - PORT_RANGE_START) {
                return Err(ZetaError::EngineUnavailable(
                    "no free host port in the dynamic range".to_string(),
                ));
            }

            if self.contains(port) || port_in_use(port).await {
                port = advance(port);
                continue;
            }

            let claimed = {
                let mut table = self.lock();
                if table.contains_key(&port) {
                    false
                } else {
                    table.insert(port, name.to_string());
                    true
                }
            };
            if claimed {
                tracing::info!(%name, port, "assigned host port");
                return Ok(port);
            }
            port = advance(port);
        }
    }

    pub fn assign(&self, port: u16, name: &str) {
        self.lock().insert(port, name.to_string());
    }

    pub fn release(&self, port: u16) -> Option<String> {
        let released = self.lock().remove(&port);
        if let Some(name) = &released {
            tracing::info!(%name, port, "released host port");
        }
        released
    }

    pub fn contains(&self, port: u16) -> bool {
        self.lock().contains_key(&port)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

fn advance(port: u16) -> u16 {
    ((u32::from(port) + 1) % u32::from(PORT_RANGE_END) + 1025) as u16
}

async fn port_in_use(port: u16) -> bool {
    match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await {
        // something accepted the connection
        Ok(Ok(_)) => true,
        // refused: nothing is listening
        Ok(Err(_)) => false,
        // handshake hung mid-way, assume bound
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_wraps_within_u16() {
        let mut port = PORT_RANGE_END;
        for _ in 0..10_000 {
            port = advance(port);
            assert!(port >= 1025);
        }
    }

    #[test]
    fn test_assign_release_round_trip() {
        let pns = PortNameSystem::new();
        pns.assign(30000, "echo");
        assert!(pns.contains(30000));
        assert_eq!(pns.release(30000).as_deref(), Some("echo"));
        assert!(!pns.contains(30000));
        assert_eq!(pns.release(30000), None);
    }

    #[test]
    fn test_clear_empties_the_table() {
        let pns = PortNameSystem::new();
        pns.assign(30000, "echo");
        pns.assign(30001, "greet");
        pns.clear();
        assert!(!pns.contains(30000));
        assert!(!pns.contains(30001));
    }

    #[tokio::test]
    async fn test_bound_port_is_detected_in_use() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_in_use(port).await);
    }

    #[tokio::test]
    async fn test_free_port_is_detected_free() {
        // bind then drop to find a port nothing is listening on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!port_in_use(port).await);
    }

    #[tokio::test]
    async fn test_allocate_records_the_port() {
        let pns = PortNameSystem::new();
        let port = pns.allocate("echo").await.unwrap();
        assert!(pns.contains(port));
        assert_eq!(pns.release(port).as_deref(), Some("echo"));
    }
}

//! Byte-level TCP relay with a switchable backend

use std::sync::Arc;
use std::time::Duration;

use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::errors::RevlayError;

/// Time allowed to connect to the backend
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend address for a local port
pub fn backend_address(port: u16) -> String {
    format!("localhost:{}", port)
}

/// Forwards every accepted connection to the current target
#[derive(Debug)]
pub struct TcpProxy {
    target: RwLock<String>,
}

impl TcpProxy {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: RwLock::new(target.into()),
        }
    }

    /// Snapshot of the current target
    pub async fn target(&self) -> String {
        self.target.read().await.clone()
    }

    /// Replace the target, returns false if it was already set
    pub async fn switch_target(&self, target: String) -> bool {
        let mut current = self.target.write().await;
        if *current == target {
            return false;
        }
        info!("Switching proxy target {} -> {}", current, target);
        *current = target;
        true
    }

    /// Accept until shutdown, one task per connection
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let proxy = Arc::clone(&self);
                        tokio::spawn(async move {
                            let target = proxy.target().await;
                            if let Err(e) = relay(stream, &target).await {
                                warn!("Connection from {} to {} failed: {}", peer_addr, target, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Proxy accept loop shutting down");
                    return;
                }
            }
        }
    }
}

/// Dial `target` and copy bytes both ways until either side closes
pub async fn relay(mut inbound: TcpStream, target: &str) -> Result<(u64, u64), RevlayError> {
    let mut outbound = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(target))
        .await
        .map_err(|_| RevlayError::ProxyError(format!("timed out dialing {}", target)))?
        .map_err(|e| RevlayError::ProxyError(format!("failed to dial {}: {}", target, e)))?;

    let (sent, received) = copy_bidirectional(&mut inbound, &mut outbound).await?;
    debug!(target = %target, sent, received, "Connection closed");
    Ok((sent, received))
}

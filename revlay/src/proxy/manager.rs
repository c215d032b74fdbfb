//! Long-running proxy that follows the active port state file

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::errors::RevlayError;
use crate::filesys::file::File;
use crate::proxy::relay::{backend_address, TcpProxy};
use crate::storage::state::ActivePortState;

/// Quiet period after a watcher event before the state file is re-read
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// Proxy bound to its listen address, ready to run
pub struct ProxyManager {
    proxy: Arc<TcpProxy>,
    listener: TcpListener,
    state: ActivePortState,
}

impl ProxyManager {
    /// Read the state file, falling back to `fallback_port` (and persisting
    /// it) when missing or unparsable, then bind the listener
    pub async fn start(
        listen_addr: &str,
        state_file: PathBuf,
        fallback_port: u16,
    ) -> Result<Self, RevlayError> {
        let state = ActivePortState::new(File::new(state_file));

        let port = match state.read().await {
            Ok(Some(port)) => port,
            Ok(None) => {
                info!("No active port recorded, using fallback {}", fallback_port);
                state.write(fallback_port).await?;
                fallback_port
            }
            Err(e) => {
                warn!("Could not read active port ({}), using fallback {}", e, fallback_port);
                state.write(fallback_port).await?;
                fallback_port
            }
        };

        let listener = TcpListener::bind(listen_addr).await.map_err(|e| {
            RevlayError::ProxyError(format!("failed to bind {}: {}", listen_addr, e))
        })?;

        let proxy = Arc::new(TcpProxy::new(backend_address(port)));
        info!(
            "Proxy listening on {} -> {}",
            listener.local_addr()?,
            proxy.target().await
        );

        Ok(Self {
            proxy,
            listener,
            state,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RevlayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn proxy(&self) -> Arc<TcpProxy> {
        Arc::clone(&self.proxy)
    }

    /// Serve connections and follow the state file until `shutdown_signal`
    pub async fn run(
        self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), RevlayError> {
        let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);

        let state_path = self.state.file().path().to_path_buf();
        let Some(watch_dir) = state_path.parent().map(|p| p.to_path_buf()) else {
            return Err(RevlayError::ProxyError(format!(
                "state file {} has no parent directory",
                state_path.display()
            )));
        };
        let Some(file_name) = state_path.file_name().map(|n| n.to_os_string()) else {
            return Err(RevlayError::ProxyError(format!(
                "state file {} has no file name",
                state_path.display()
            )));
        };

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if relevant {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => error!("State file watcher error: {}", e),
            }
        })
        .map_err(|e| RevlayError::ProxyError(format!("failed to create watcher: {}", e)))?;
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                RevlayError::ProxyError(format!("failed to watch {}: {}", watch_dir.display(), e))
            })?;
        debug!("Watching {}", watch_dir.display());

        let accept_handle = tokio::spawn(
            Arc::clone(&self.proxy).serve(self.listener, shutdown_tx.subscribe()),
        );

        let proxy = Arc::clone(&self.proxy);
        let state = self.state.clone();
        let mut watch_shutdown = shutdown_tx.subscribe();
        let watch_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = event_rx.recv() => {
                        if received.is_none() {
                            return;
                        }
                        tokio::time::sleep(DEBOUNCE).await;
                        while event_rx.try_recv().is_ok() {}
                        reload_target(&proxy, &state).await;
                    }
                    _ = watch_shutdown.recv() => return,
                }
            }
        });

        shutdown_signal.await;
        info!("Shutdown signal received, stopping proxy...");

        let _ = shutdown_tx.send(());
        drop(watcher);
        if let Err(e) = accept_handle.await {
            error!("Proxy accept loop ended abnormally: {}", e);
        }
        if let Err(e) = watch_handle.await {
            error!("State watcher ended abnormally: {}", e);
        }
        Ok(())
    }
}

async fn reload_target(proxy: &TcpProxy, state: &ActivePortState) {
    match state.read().await {
        Ok(Some(port)) => {
            proxy.switch_target(backend_address(port)).await;
        }
        Ok(None) => warn!(
            "Active port file {} is missing or unparsable, keeping current target",
            state.file().path().display()
        ),
        Err(e) => warn!("Failed to read active port: {}", e),
    }
}

// TCP listener
//
// One accept loop; each accepted connection runs on its own spawned task,
// so connections execute in parallel rather than multiplexed on a single
// task. Shutdown is signalled over a watch channel and observed between
// accepts; in-flight connections finish on their own tasks.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::TransportConfig;
use crate::connection::serve_connection;
use crate::error::Result;
use crate::router::Router;
use crate::transfer::TransferServer;

/// Run the accept loop on a pre-bound listener until shutdown.
pub async fn run(
    listener: TcpListener,
    router: Arc<Router>,
    transfers: Arc<TransferServer>,
    config: Arc<TransportConfig>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(addr = %local, "listener started");

    loop {
        // A shutdown signalled before this loop subscribed still counts.
        if *shutdown_rx.borrow() {
            info!("listener received shutdown signal");
            break;
        }
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        if config.log_connections {
                            info!(%addr, "accepted connection");
                        }
                        let router = router.clone();
                        let transfers = transfers.clone();
                        let config = config.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                serve_connection(socket, router, transfers, config).await
                            {
                                warn!(%addr, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("listener received shutdown signal");
                    break;
                }
            }
        }
    }

    Ok(())
}

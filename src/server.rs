// Server assembly
//
// Owns the route table, the transfer server and the configuration as one
// explicit registry object — there is no process-wide static state. Handler
// and stream registration go through the instance; `serve` binds and runs
// the accept loop until the shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::TransportConfig;
use crate::error::Result;
use crate::listener;
use crate::router::Router;
use crate::transfer::{BlobStore, SessionHandler, TransferServer};

/// One transport endpoint: router + transfer server + config
pub struct Server {
    router: Arc<Router>,
    transfers: Arc<TransferServer>,
    config: Arc<TransportConfig>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            router: Arc::new(Router::new()),
            transfers: Arc::new(TransferServer::new()),
            config: Arc::new(config),
            shutdown_tx,
        })
    }

    /// Construct with a persistence collaborator for finished transfers.
    pub fn with_blob_store(config: TransportConfig, store: Arc<dyn BlobStore>) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            router: Arc::new(Router::new()),
            transfers: Arc::new(TransferServer::with_blob_store(store)),
            config: Arc::new(config),
            shutdown_tx,
        })
    }

    /// Route table for handler registration; safe to use while serving.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Register a streaming transfer handler for a path.
    pub fn register_transfer(&self, path: &str, handler: Arc<dyn SessionHandler>) {
        self.transfers.register(path, handler);
    }

    pub fn transfers(&self) -> &Arc<TransferServer> {
        &self.transfers
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Bind the configured address and return the actual local address,
    /// along with the listener for [`Self::serve_on`]. Binding separately
    /// lets callers use an OS-assigned port.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        Ok((listener, addr))
    }

    /// Run the accept loop on a bound listener until shutdown.
    pub async fn serve_on(&self, bound: TcpListener) -> Result<()> {
        listener::run(
            bound,
            self.router.clone(),
            self.transfers.clone(),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        )
        .await
    }

    /// Bind and serve in one step.
    pub async fn serve(&self) -> Result<()> {
        let (bound, addr) = self.bind().await?;
        info!(%addr, "serving");
        self.serve_on(bound).await
    }

    /// Signal the accept loop to stop and cancel stream workers.
    pub fn shutdown(&self) {
        self.transfers.shutdown();
        let _ = self.shutdown_tx.send(true);
    }
}

// Shared helpers for portwire integration tests
//
// Starts a real server on an OS-assigned port with a small set of routes
// and a counting transfer handler, so tests exercise the full listener →
// framer → dispatcher path over actual sockets.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use portwire::router::params::{ParamSchema, ParamValue};
use portwire::transfer::{BlobStore, SessionHandler, TransferBatch};
use portwire::{
    DataDocument, Result, Server, TransferSession, TransportConfig, Verb,
};

/// Transfer handler that counts applied batches and accumulated pairs in
/// the session state document.
pub struct CountingHandler;

impl SessionHandler for CountingHandler {
    fn apply(
        &self,
        session: &mut TransferSession,
        _batch: &TransferBatch,
        pairs: &[(Vec<f64>, Vec<f64>)],
    ) -> Result<()> {
        let seen: u64 = session
            .state
            .property("pairs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        session
            .state
            .set_property("pairs", Some(&(seen + pairs.len() as u64).to_string()))?;
        session
            .state
            .set_property("batches", Some(&session.batches_applied().to_string()))?;
        Ok(())
    }

    fn finish(&self, session: &mut TransferSession) -> Result<DataDocument> {
        let mut out = session.state.clone();
        out.set_property("transfer", Some(session.id()))?;
        Ok(out)
    }
}

/// Blob store over an in-memory map, recording every stored document.
#[derive(Default)]
pub struct MemoryBlobStore {
    pub entries: Mutex<Vec<(String, DataDocument)>>,
}

impl BlobStore for MemoryBlobStore {
    fn store(&self, key: &str, document: &DataDocument) -> Result<()> {
        self.entries.lock().push((key.to_string(), document.clone()));
        Ok(())
    }

    fn restore(&self, key: &str, _shell: DataDocument) -> Result<DataDocument> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| {
                portwire::TransportError::SessionState(format!("no blob for '{}'", key))
            })
    }
}

/// Running test server and the address it listens on.
pub struct TestServer {
    pub server: Arc<Server>,
    pub addr: std::net::SocketAddr,
    task: tokio::task::JoinHandle<Result<()>>,
}

impl TestServer {
    /// Start a server with the standard test routes and transfer handler.
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    pub async fn start_with(store: Option<Arc<MemoryBlobStore>>) -> Self {
        let config = TransportConfig {
            port: 0,
            ..Default::default()
        };
        let server = match store {
            Some(store) => Server::with_blob_store(config, store).unwrap(),
            None => Server::new(config).unwrap(),
        };

        server
            .router()
            .bind("/status", Verb::Get)
            .unwrap()
            .to(ParamSchema::Empty, |_| {
                Box::pin(async { Ok(ParamValue::Str("up".into())) })
            });

        server
            .router()
            .bind("/test/{x}/hhh", Verb::Get)
            .unwrap()
            .to(
                ParamSchema::record()
                    .field("x", ParamValue::Str(String::new()))
                    .build(),
                |input| {
                    Box::pin(async move { Ok(input.field("x").cloned().unwrap()) })
                },
            );

        server.register_transfer("/train", Arc::new(CountingHandler));

        let server = Arc::new(server);
        let (bound, addr) = server.bind().await.unwrap();
        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.serve_on(bound).await })
        };

        Self { server, addr, task }
    }

    /// Stop the server and wait for the accept loop to exit.
    pub async fn stop(self) {
        self.server.shutdown();
        let _ = self.task.await;
    }
}

/// Send raw bytes and collect the full reply until the peer closes.
pub async fn raw_roundtrip(addr: std::net::SocketAddr, request: &[u8]) -> Vec<u8> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    reply
}

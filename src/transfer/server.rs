// Server side of the transfer protocol
//
// A registered per-path SessionHandler owns what accumulation means; this
// module owns everything around it: the id-keyed session registry, batch
// validation, layout splitting, persistence of finished output, and the
// single response frame per stream.
//
// Receipt is decoupled from processing through the batch pipeline: each
// streaming connection gets a worker holding a bounded channel into a
// pipeline whose sink applies batches to sessions. The connection can keep
// reading from the socket while the previous batch is still being applied,
// and the bounded channel pushes back on the reader if application falls
// behind.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::session::TransferRegistry;
use super::{BlobStore, SessionHandler, TransferBatch, VectorLayout};
use crate::constants::{CONTENT_TYPE_DOCUMENT, HEADER_TRANSFER_ID};
use crate::error::{Result, TransportError};
use crate::pipeline::{Batch, BatchPipeline, BatchSink, ChannelSource};
use crate::protocol::{RequestHeader, Response};

/// Batches a worker will buffer before pushing back on the socket reader.
const WORKER_QUEUE_DEPTH: usize = 8;

/// Registry of per-path stream handlers plus the shared session map
pub struct TransferServer {
    handlers: RwLock<HashMap<String, Arc<dyn SessionHandler>>>,
    registry: Arc<TransferRegistry>,
    blob_store: Option<Arc<dyn BlobStore>>,
    shutdown: CancellationToken,
}

impl Default for TransferServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferServer {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            registry: Arc::new(TransferRegistry::new()),
            blob_store: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Construct with a persistence collaborator for finished sessions.
    pub fn with_blob_store(store: Arc<dyn BlobStore>) -> Self {
        Self {
            blob_store: Some(store),
            ..Self::new()
        }
    }

    /// Install the stream handler for a path.
    pub fn register(&self, path: &str, handler: Arc<dyn SessionHandler>) {
        debug!(path, "transfer handler registered");
        self.handlers
            .write()
            .insert(path.to_ascii_lowercase(), handler);
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// Whether a request belongs to this server: it carries a transfer id
    /// and its path has a registered stream handler.
    pub fn accepts(&self, header: &RequestHeader) -> bool {
        header.header(HEADER_TRANSFER_ID).is_some()
            && self
                .handlers
                .read()
                .contains_key(&header.path.to_ascii_lowercase())
    }

    /// Cancel every running stream worker.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Spawn the pipeline worker for one streaming connection.
    pub(crate) fn spawn_worker(&self, path: &str) -> Result<StreamWorker> {
        let handler = self
            .handlers
            .read()
            .get(&path.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| TransportError::RouteNotFound {
                verb: "STREAM".to_string(),
                path: path.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
        let (response_tx, response_rx) = oneshot::channel();

        let mut pipeline = BatchPipeline::new(ChannelSource::new(rx));
        pipeline.register_sink(Box::new(SessionApplySink {
            handler,
            registry: self.registry.clone(),
            blob_store: self.blob_store.clone(),
            response_tx: Some(response_tx),
        }));

        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run(&cancel).await {
                warn!(error = %e, "transfer stream worker ended with error");
            }
        });

        Ok(StreamWorker {
            tx: Some(tx),
            response_rx,
        })
    }
}

/// Connection-side handle to one stream's pipeline worker
pub(crate) struct StreamWorker {
    tx: Option<mpsc::Sender<Batch<TransferBatch>>>,
    response_rx: oneshot::Receiver<Response>,
}

impl StreamWorker {
    /// Queue one batch for application.
    ///
    /// A send failure means the worker already died on an earlier batch;
    /// [`Self::into_response`] then yields the error response it left.
    pub(crate) async fn submit(&mut self, batch: TransferBatch) -> Result<()> {
        let envelope = Batch::new(batch.ordinal, !batch.keep_alive, vec![batch]);
        let tx = self.tx.as_ref().ok_or_else(|| {
            TransportError::SessionState("stream already finished".to_string())
        })?;
        tx.send(envelope).await.map_err(|_| {
            TransportError::TransferProtocol("stream worker terminated".to_string())
        })
    }

    /// Stop feeding the worker and await the stream's single response —
    /// the final document on success, or the error response the sink left
    /// behind on failure.
    pub(crate) async fn into_response(mut self) -> Result<Response> {
        // Closing the channel lets the pipeline drain and finish.
        self.tx.take();
        self.response_rx.await.map_err(|_| {
            TransportError::TransferProtocol(
                "stream worker terminated without a response".to_string(),
            )
        })
    }
}

/// Pipeline sink folding transfer batches into sessions
struct SessionApplySink {
    handler: Arc<dyn SessionHandler>,
    registry: Arc<TransferRegistry>,
    blob_store: Option<Arc<dyn BlobStore>>,
    response_tx: Option<oneshot::Sender<Response>>,
}

impl SessionApplySink {
    /// Apply one batch under its session's lock. Returns the response
    /// document's frame when this was the final batch.
    async fn apply_one(&self, batch: &TransferBatch) -> Result<Option<Response>> {
        let session = self.registry.get_or_create(&batch.transfer_id);
        let mut guard = session.lock().await;

        guard.note_batch(batch.ordinal)?;
        if guard.batches_applied() == 1 {
            guard.set_layout(VectorLayout::from_document(&batch.document)?);
        }

        let pairs = match guard.layout() {
            Some(layout) => layout.split(&batch.document)?,
            None => Vec::new(),
        };
        self.handler.apply(&mut guard, batch, &pairs)?;

        if batch.keep_alive {
            return Ok(None);
        }

        let output = self.handler.finish(&mut guard)?;
        if let Some(store) = &self.blob_store {
            // Persistence failure fails the transfer; there is no
            // partial-session resume.
            store.store(guard.id(), &output)?;
        }
        guard.close();
        debug!(
            transfer_id = guard.id(),
            batches = guard.batches_applied(),
            "transfer session closed"
        );
        Ok(Some(Response::ok(output.to_bytes(), CONTENT_TYPE_DOCUMENT)))
    }
}

impl BatchSink<TransferBatch> for SessionApplySink {
    fn can_receive(&self) -> bool {
        // The response slot doubles as the open/closed flag: once the
        // stream is answered nothing more may be applied.
        self.response_tx.is_some()
    }

    fn receive<'a>(
        &'a mut self,
        batch: &'a Batch<TransferBatch>,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for item in &batch.items {
                match self.apply_one(item).await {
                    Ok(None) => {}
                    Ok(Some(response)) => {
                        if let Some(tx) = self.response_tx.take() {
                            let _ = tx.send(response);
                        }
                    }
                    Err(err) => {
                        warn!(
                            transfer_id = %item.transfer_id,
                            ordinal = item.ordinal,
                            error = %err,
                            "transfer batch failed"
                        );
                        if let Some(tx) = self.response_tx.take() {
                            let _ = tx.send(Response::from_error(&err));
                        }
                        return Err(err);
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DataDocument;
    use crate::transfer::session::TransferSession;
    use crate::transfer::{LAYOUT_INPUTS_KEY, LAYOUT_OUTPUTS_KEY};

    /// Counts split pairs into the session state and reports the total.
    struct CountingHandler;

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
            Ok(())
        }

        fn finish(&self, session: &mut TransferSession) -> Result<DataDocument> {
            Ok(session.state.clone())
        }
    }

    fn training_batch(id: &str, ordinal: u64, keep_alive: bool, first: bool) -> TransferBatch {
        let mut doc = DataDocument::with_version(1);
        if first {
            doc.set_property(LAYOUT_INPUTS_KEY, Some("2")).unwrap();
            doc.set_property(LAYOUT_OUTPUTS_KEY, Some("1")).unwrap();
        }
        doc.push_vector(vec![0.1, 0.2, 1.0]);
        doc.push_vector(vec![0.3, 0.4, 0.0]);
        TransferBatch {
            transfer_id: id.to_string(),
            ordinal,
            keep_alive,
            document: doc,
        }
    }

    #[tokio::test]
    async fn test_worker_applies_batches_and_responds_once() {
        let server = TransferServer::new();
        server.register("/train", Arc::new(CountingHandler));

        let mut worker = server.spawn_worker("/train").unwrap();
        worker.submit(training_batch("t-1", 0, true, true)).await.unwrap();
        worker.submit(training_batch("t-1", 1, true, false)).await.unwrap();
        worker.submit(training_batch("t-1", 2, false, false)).await.unwrap();

        let response = worker.into_response().await.unwrap();
        assert!(response.is_success());
        let doc = DataDocument::from_bytes(&response.body).unwrap();
        assert_eq!(doc.property("pairs"), Some("6"));
        assert_eq!(server.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_path_is_not_found() {
        let server = TransferServer::new();
        assert!(server.spawn_worker("/nope").is_err());
    }

    #[tokio::test]
    async fn test_closed_session_yields_conflict_response() {
        let server = TransferServer::new();
        server.register("/train", Arc::new(CountingHandler));

        let mut worker = server.spawn_worker("/train").unwrap();
        worker.submit(training_batch("t-2", 0, false, true)).await.unwrap();
        assert!(worker.into_response().await.unwrap().is_success());

        // Same id again: the tombstoned session must refuse the stream.
        let mut worker = server.spawn_worker("/train").unwrap();
        worker.submit(training_batch("t-2", 0, false, true)).await.unwrap();
        let response = worker.into_response().await.unwrap();
        assert_eq!(response.status, crate::constants::STATUS_CONFLICT);
    }

    #[tokio::test]
    async fn test_malformed_layout_fails_stream() {
        let server = TransferServer::new();
        server.register("/train", Arc::new(CountingHandler));

        let mut doc = DataDocument::new();
        doc.set_property(LAYOUT_INPUTS_KEY, Some("not-a-size")).unwrap();
        doc.set_property(LAYOUT_OUTPUTS_KEY, Some("1")).unwrap();
        let batch = TransferBatch {
            transfer_id: "t-3".to_string(),
            ordinal: 0,
            keep_alive: false,
            document: doc,
        };

        let mut worker = server.spawn_worker("/train").unwrap();
        worker.submit(batch).await.unwrap();
        let response = worker.into_response().await.unwrap();
        assert_eq!(response.status, crate::constants::STATUS_BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_transfer() {
        struct FailingStore;
        impl BlobStore for FailingStore {
            fn store(&self, _key: &str, _document: &DataDocument) -> Result<()> {
                Err(TransportError::Io(std::io::Error::other("disk full")))
            }
            fn restore(&self, _key: &str, shell: DataDocument) -> Result<DataDocument> {
                Ok(shell)
            }
        }

        let server = TransferServer::with_blob_store(Arc::new(FailingStore));
        server.register("/train", Arc::new(CountingHandler));

        let mut worker = server.spawn_worker("/train").unwrap();
        worker.submit(training_batch("t-4", 0, false, true)).await.unwrap();
        let response = worker.into_response().await.unwrap();
        assert!(!response.is_success());
    }
}

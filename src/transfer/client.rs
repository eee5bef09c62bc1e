// Client side of the transfer protocol
//
// A TransferHandle owns one persistent connection and one transfer id for
// the lifetime of a stream: `send` ships keep-alive batches (each under the
// configured per-send timeout), `end` ships the final batch and awaits the
// server's single response document. A timed-out or failed send poisons
// the handle — the stream cannot be resumed, the caller starts a new
// transfer.

use bytes::BytesMut;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::TransferBatch;
use crate::config::TransportConfig;
use crate::constants::RECV_BUFFER_BYTES;
use crate::document::DataDocument;
use crate::error::{Result, TransportError};
use crate::protocol::{binary, parse_response, Verb};

/// Factory for transfer streams against one endpoint
pub struct TransferClient {
    addr: String,
    config: TransportConfig,
}

impl TransferClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            config: TransportConfig::default(),
        }
    }

    pub fn with_config(addr: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
        }
    }

    /// Open a persistent connection and assign a fresh transfer id.
    pub async fn begin(&self, path: &str) -> Result<TransferHandle> {
        let stream = TcpStream::connect(&self.addr).await?;
        let transfer_id = generate_transfer_id();
        debug!(addr = %self.addr, path, transfer_id = %transfer_id, "transfer started");
        Ok(TransferHandle {
            stream,
            path: path.to_string(),
            transfer_id,
            next_ordinal: 0,
            send_timeout_ms: self.config.send_timeout_ms,
            poisoned: false,
        })
    }
}

/// One open stream: a connection plus its transfer id
pub struct TransferHandle {
    stream: TcpStream,
    path: String,
    transfer_id: String,
    next_ordinal: u64,
    send_timeout_ms: u64,
    poisoned: bool,
}

impl TransferHandle {
    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    pub fn batches_sent(&self) -> u64 {
        self.next_ordinal
    }

    /// Transmit one keep-alive batch. The session stays open.
    pub async fn send(&mut self, document: &DataDocument) -> Result<()> {
        self.send_batch(document, true).await
    }

    /// Transmit the final batch and await the server's response document.
    ///
    /// Consumes the handle: after the final batch the session is closed on
    /// the server whatever the outcome.
    pub async fn end(mut self) -> Result<DataDocument> {
        self.send_batch(&DataDocument::new(), false).await?;

        // The response is the only frame the server ever sends on this
        // connection; read until it parses.
        let mut buf = BytesMut::with_capacity(RECV_BUFFER_BYTES);
        loop {
            if let Some((response, _consumed)) = parse_response(&buf)? {
                if !response.is_success() {
                    let message = String::from_utf8_lossy(&response.body).to_string();
                    warn!(
                        transfer_id = %self.transfer_id,
                        status = response.status,
                        "transfer rejected"
                    );
                    return Err(TransportError::TransferProtocol(format!(
                        "server answered {}: {}",
                        response.status, message
                    )));
                }
                let document = DataDocument::from_bytes(&response.body)?;
                debug!(
                    transfer_id = %self.transfer_id,
                    batches = self.next_ordinal,
                    "transfer complete"
                );
                return Ok(document);
            }
            let read = self.stream.read_buf(&mut buf).await?;
            if read == 0 {
                return Err(TransportError::TransferProtocol(
                    "connection closed before the transfer response".to_string(),
                ));
            }
        }
    }

    async fn send_batch(&mut self, document: &DataDocument, keep_alive: bool) -> Result<()> {
        if self.poisoned {
            return Err(TransportError::SessionState(
                "transfer aborted by an earlier send failure".to_string(),
            ));
        }

        let batch = TransferBatch {
            transfer_id: self.transfer_id.clone(),
            ordinal: self.next_ordinal,
            keep_alive,
            document: document.clone(),
        };
        let body = document.to_bytes();
        let mut frame = binary::encode_request(
            Verb::Stream,
            &self.path,
            &batch.to_headers(),
            body.len() as u64,
        );
        frame.extend_from_slice(&body);

        let timeout = std::time::Duration::from_millis(self.send_timeout_ms);
        let write = async {
            self.stream.write_all(&frame).await?;
            self.stream.flush().await?;
            Ok::<_, TransportError>(())
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => {
                self.next_ordinal += 1;
                Ok(())
            }
            Ok(Err(err)) => {
                self.poisoned = true;
                Err(err)
            }
            Err(_) => {
                // The connection is released with the handle; a partial
                // frame must never be followed by another batch.
                self.poisoned = true;
                warn!(
                    transfer_id = %self.transfer_id,
                    timeout_ms = self.send_timeout_ms,
                    "transfer send timed out"
                );
                Err(TransportError::SendTimeout(self.send_timeout_ms))
            }
        }
    }
}

fn generate_transfer_id() -> String {
    let token: u128 = rand::thread_rng().gen();
    format!("t-{:032x}", token)
}

//! Vector/document transfer protocol
//!
//! Session-oriented streaming RPC built on the framer, with the document
//! model as payload and the batch pipeline as the server's internal
//! receipt/processing decoupler. A client opens a persistent connection and
//! sends a sequence of batches tagged with its transfer id; the server
//! accumulates them into a session keyed by that id and answers with a
//! single response document when the final (non-keep-alive) batch arrives.
//!
//! Batch envelope on the wire: a `STREAM` request whose headers carry the
//! transfer id, keep-alive flag and ordinal, with the document's compact
//! binary form as the body. Keep-alive batches are not individually
//! acknowledged — the one response frame answers the whole stream.

pub mod client;
pub mod server;
pub mod session;

use crate::constants::{
    HEADER_TRANSFER_ID, HEADER_TRANSFER_KEEP_ALIVE, HEADER_TRANSFER_ORDINAL,
};
use crate::document::DataDocument;
use crate::error::{Result, TransportError};
use crate::protocol::RequestHeader;

pub use client::{TransferClient, TransferHandle};
pub use server::TransferServer;
pub use session::{TransferRegistry, TransferSession};

/// Property keys on the first batch declaring how vectors split
pub const LAYOUT_INPUTS_KEY: &str = "layout.inputs";
pub const LAYOUT_OUTPUTS_KEY: &str = "layout.outputs";

/// Vector split declared by the first batch of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorLayout {
    pub inputs: usize,
    pub outputs: usize,
}

impl VectorLayout {
    /// Read the layout properties from a batch document.
    ///
    /// Absent properties mean the stream carries no layout (vectors pass
    /// through whole); malformed values are a protocol error.
    pub fn from_document(doc: &DataDocument) -> Result<Option<Self>> {
        let inputs = doc.property(LAYOUT_INPUTS_KEY);
        let outputs = doc.property(LAYOUT_OUTPUTS_KEY);
        match (inputs, outputs) {
            (None, None) => Ok(None),
            (Some(i), Some(o)) => {
                let inputs = i.parse().map_err(|_| {
                    TransportError::TransferProtocol(format!(
                        "{} '{}' is not a size",
                        LAYOUT_INPUTS_KEY, i
                    ))
                })?;
                let outputs = o.parse().map_err(|_| {
                    TransportError::TransferProtocol(format!(
                        "{} '{}' is not a size",
                        LAYOUT_OUTPUTS_KEY, o
                    ))
                })?;
                Ok(Some(Self { inputs, outputs }))
            }
            _ => Err(TransportError::TransferProtocol(format!(
                "layout declares only one of {}/{}",
                LAYOUT_INPUTS_KEY, LAYOUT_OUTPUTS_KEY
            ))),
        }
    }

    /// Split a batch's vectors into (input, output) pairs.
    pub fn split(&self, doc: &DataDocument) -> Result<Vec<(Vec<f64>, Vec<f64>)>> {
        let expected = self.inputs + self.outputs;
        let mut pairs = Vec::with_capacity(doc.vectors().len());
        for (index, vector) in doc.vectors().iter().enumerate() {
            if vector.len() != expected {
                return Err(TransportError::TransferProtocol(format!(
                    "vector {} has {} elements, layout needs {}",
                    index,
                    vector.len(),
                    expected
                )));
            }
            pairs.push((
                vector[..self.inputs].to_vec(),
                vector[self.inputs..].to_vec(),
            ));
        }
        Ok(pairs)
    }
}

/// One decoded transfer batch
#[derive(Debug, Clone)]
pub struct TransferBatch {
    pub transfer_id: String,
    pub ordinal: u64,
    pub keep_alive: bool,
    pub document: DataDocument,
}

impl TransferBatch {
    /// Decode a batch from a framed request.
    pub fn from_request(header: &RequestHeader, body: &[u8]) -> Result<Self> {
        let transfer_id = header
            .header(HEADER_TRANSFER_ID)
            .ok_or_else(|| {
                TransportError::TransferProtocol(format!("missing {} header", HEADER_TRANSFER_ID))
            })?
            .to_string();
        if transfer_id.is_empty() {
            return Err(TransportError::TransferProtocol(format!(
                "empty {} header",
                HEADER_TRANSFER_ID
            )));
        }

        let keep_alive = match header.header(HEADER_TRANSFER_KEEP_ALIVE) {
            Some("true") | None => true,
            Some("false") => false,
            Some(other) => {
                return Err(TransportError::TransferProtocol(format!(
                    "{} must be true or false, got '{}'",
                    HEADER_TRANSFER_KEEP_ALIVE, other
                )))
            }
        };

        let ordinal = match header.header(HEADER_TRANSFER_ORDINAL) {
            Some(raw) => raw.parse().map_err(|_| {
                TransportError::TransferProtocol(format!(
                    "{} '{}' is not an ordinal",
                    HEADER_TRANSFER_ORDINAL, raw
                ))
            })?,
            None => 0,
        };

        let document = DataDocument::from_bytes(body)
            .map_err(|e| TransportError::TransferProtocol(format!("batch document: {}", e)))?;

        Ok(Self {
            transfer_id,
            ordinal,
            keep_alive,
            document,
        })
    }

    /// Headers for the client-side request carrying this batch.
    pub fn to_headers(&self) -> Vec<(String, String)> {
        vec![
            (HEADER_TRANSFER_ID.to_string(), self.transfer_id.clone()),
            (
                HEADER_TRANSFER_KEEP_ALIVE.to_string(),
                self.keep_alive.to_string(),
            ),
            (
                HEADER_TRANSFER_ORDINAL.to_string(),
                self.ordinal.to_string(),
            ),
        ]
    }
}

/// Accumulation collaborator: owns what a session's state means
pub trait SessionHandler: Send + Sync {
    /// Fold one batch into the session. `pairs` holds the batch's vectors
    /// split per the stream's declared layout, or is empty when the stream
    /// declared none.
    fn apply(
        &self,
        session: &mut TransferSession,
        batch: &TransferBatch,
        pairs: &[(Vec<f64>, Vec<f64>)],
    ) -> Result<()>;

    /// Produce the stream's single response document from the accumulated
    /// session state. Called once, when the final batch arrives.
    fn finish(&self, session: &mut TransferSession) -> Result<DataDocument>;
}

/// Persistence collaborator for finished session output
pub trait BlobStore: Send + Sync {
    fn store(&self, key: &str, document: &DataDocument) -> Result<()>;

    /// Rehydrate a previously stored document into the supplied shell.
    fn restore(&self, key: &str, shell: DataDocument) -> Result<DataDocument>;
}

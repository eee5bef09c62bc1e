// Transfer sessions and their registry
//
// A session accumulates one stream's state under its client-supplied
// transfer id. The registry maps id → session with the locking split the
// concurrency model calls for: a narrow synchronous RwLock guards only the
// insert-if-absent step, and each session carries its own async mutex so
// batches for one id are serialized while unrelated ids proceed in
// parallel. Session creation is double-checked — a read probe first, then a
// write-lock re-check — so two racing first batches for a new id construct
// exactly one session.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::debug;

use super::VectorLayout;
use crate::document::DataDocument;
use crate::error::{Result, TransportError};

/// Server-side accumulation state for one transfer id
#[derive(Debug)]
pub struct TransferSession {
    id: String,
    /// Accumulated output; what `finish` renders into the response
    pub state: DataDocument,
    layout: Option<VectorLayout>,
    batches_applied: u64,
    last_ordinal: Option<u64>,
    closed: bool,
}

impl TransferSession {
    fn new(id: String) -> Self {
        Self {
            id,
            state: DataDocument::new(),
            layout: None,
            batches_applied: 0,
            last_ordinal: None,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn layout(&self) -> Option<VectorLayout> {
        self.layout
    }

    /// Record the layout declared by the stream's first batch.
    pub fn set_layout(&mut self, layout: Option<VectorLayout>) {
        if self.layout.is_none() {
            self.layout = layout;
        }
    }

    pub fn batches_applied(&self) -> u64 {
        self.batches_applied
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Validate and record one batch arrival: closed sessions reject, and
    /// ordinals must strictly increase within the session.
    pub fn note_batch(&mut self, ordinal: u64) -> Result<()> {
        if self.closed {
            return Err(TransportError::SessionState(format!(
                "transfer '{}' is already closed",
                self.id
            )));
        }
        if let Some(prev) = self.last_ordinal {
            if ordinal <= prev {
                return Err(TransportError::TransferProtocol(format!(
                    "transfer '{}' batch ordinal {} after {}",
                    self.id, ordinal, prev
                )));
            }
        }
        self.last_ordinal = Some(ordinal);
        self.batches_applied += 1;
        Ok(())
    }

    /// Close the session. The accumulated state is dropped; the id stays
    /// in the registry as a tombstone so late batches get a session-state
    /// error instead of silently rebuilding the session.
    pub fn close(&mut self) {
        self.closed = true;
        self.state = DataDocument::new();
    }
}

/// Shared id → session map
#[derive(Default)]
pub struct TransferRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<TransferSession>>>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for an id, creating it on first contact.
    pub fn get_or_create(&self, id: &str) -> Arc<Mutex<TransferSession>> {
        // Fast path: the id already has a session.
        if let Some(session) = self.sessions.read().get(id) {
            return session.clone();
        }
        // Slow path: re-check under the write lock, then insert.
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get(id) {
            return session.clone();
        }
        debug!(transfer_id = id, "creating transfer session");
        let session = Arc::new(Mutex::new(TransferSession::new(id.to_string())));
        sessions.insert(id.to_string(), session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mutex<TransferSession>>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

// Per-connection state machine
//
// Each accepted socket is driven by exactly one task through the cycle
//
//   Idle → ReceivingHeader → HeaderParsed → ReceivingBody → Dispatching
//        → ResponseWritten → (Reset → Idle | Closed)
//
// Within a connection everything is strictly sequential: parse, dispatch,
// write, reset. The receive buffer is reused across pipelined requests on a
// keep-alive connection; bytes that arrive beyond the current request stay
// buffered for the next one.
//
// Requests carrying a transfer id for a registered stream path are handed
// to the transfer server instead of the dispatcher: keep-alive batches
// produce no response frame, the final batch produces the stream's single
// response. Everything else is dispatched through the router, which always
// produces exactly one response per completed request.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::constants::RECV_BUFFER_BYTES;
use crate::error::{Result, TransportError};
use crate::protocol::{self, RequestHeader, Response};
use crate::router::Router;
use crate::transfer::server::StreamWorker;
use crate::transfer::{TransferBatch, TransferServer};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    ReceivingHeader,
    HeaderParsed,
    ReceivingBody,
    Dispatching,
    ResponseWritten,
    Closed,
}

/// Per-socket state: the exclusively owned socket, a reusable receive
/// buffer, the accumulating body, and the current request's parsed header.
pub struct ConnectionContext<S> {
    socket: S,
    recv_buf: BytesMut,
    body: BytesMut,
    header: Option<RequestHeader>,
    content_length: Option<u64>,
    state: ConnectionState,
}

impl<S> ConnectionContext<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            recv_buf: BytesMut::with_capacity(RECV_BUFFER_BYTES),
            body: BytesMut::new(),
            header: None,
            content_length: None,
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Clear per-request state for the next pipelined request. The receive
    /// buffer keeps whatever bytes already arrived beyond this request.
    pub fn reset(&mut self) {
        self.header = None;
        self.content_length = None;
        self.body.clear();
        self.state = ConnectionState::Idle;
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> ConnectionContext<S> {
    /// Read more bytes into the receive buffer. Ok(false) = peer closed.
    async fn fill(&mut self) -> Result<bool> {
        let read = self.socket.read_buf(&mut self.recv_buf).await?;
        Ok(read > 0)
    }

    /// Accumulate bytes until a full header block parses.
    ///
    /// Ok(None) = the peer closed cleanly between requests.
    async fn receive_header(&mut self) -> Result<Option<RequestHeader>> {
        self.state = ConnectionState::ReceivingHeader;
        loop {
            if let Some(header) = protocol::parse_request_header(&self.recv_buf)? {
                self.recv_buf.advance(header.header_len);
                self.state = ConnectionState::HeaderParsed;
                return Ok(Some(header));
            }
            if !self.fill().await? {
                if self.recv_buf.is_empty() {
                    return Ok(None);
                }
                // Disconnect mid-header: abort, no response attempted.
                return Err(TransportError::Framing(
                    "peer disconnected mid-header".to_string(),
                ));
            }
        }
    }

    /// Accumulate exactly the declared body length.
    async fn receive_body(&mut self, body_len: usize) -> Result<()> {
        self.state = ConnectionState::ReceivingBody;
        while self.body.len() < body_len {
            if !self.recv_buf.is_empty() {
                let take = (body_len - self.body.len()).min(self.recv_buf.len());
                self.body.extend_from_slice(&self.recv_buf.split_to(take));
                continue;
            }
            if !self.fill().await? {
                return Err(TransportError::Framing(
                    "peer disconnected mid-body".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn write_response(
        &mut self,
        kind: protocol::TransportKind,
        response: &Response,
    ) -> Result<()> {
        let bytes = protocol::encode_response(kind, response);
        self.socket.write_all(&bytes).await?;
        self.socket.flush().await?;
        self.state = ConnectionState::ResponseWritten;
        Ok(())
    }
}

/// Drive one connection to completion.
///
/// Framing errors write an error response (when the peer is still there to
/// read it) and close; peer disconnects mid-receive abort silently; every
/// dispatched request gets exactly one response.
pub async fn serve_connection<S: AsyncRead + AsyncWrite + Unpin + Send>(
    socket: S,
    router: Arc<Router>,
    transfers: Arc<TransferServer>,
    config: Arc<TransportConfig>,
) -> Result<()> {
    let mut ctx = ConnectionContext::new(socket);
    let mut stream_worker: Option<StreamWorker> = None;

    loop {
        let header = match ctx.receive_header().await {
            Ok(Some(header)) => header,
            Ok(None) => {
                debug!("peer closed between requests");
                ctx.state = ConnectionState::Closed;
                return Ok(());
            }
            Err(err) => {
                // A malformed header still gets an error status if the
                // socket is writable; a dead peer just gets dropped.
                warn!(error = %err, "header receive failed");
                if !matches!(err, TransportError::Io(_)) {
                    let kind = sniff_kind(&ctx.recv_buf);
                    let _ = ctx.write_response(kind, &Response::from_error(&err)).await;
                }
                ctx.state = ConnectionState::Closed;
                return Err(err);
            }
        };

        ctx.content_length = header.content_length;
        ctx.header = Some(header.clone());

        let body_len = header.body_len();
        if body_len > config.max_body_bytes {
            let err = TransportError::BodyTooLarge {
                max: config.max_body_bytes,
                actual: body_len,
            };
            warn!(error = %err, "request aborted");
            let _ = ctx
                .write_response(header.kind, &Response::from_error(&err))
                .await;
            ctx.state = ConnectionState::Closed;
            return Err(err);
        }

        if let Err(err) = ctx.receive_body(body_len).await {
            debug!(error = %err, "body receive aborted");
            ctx.state = ConnectionState::Closed;
            return Err(err);
        }

        ctx.state = ConnectionState::Dispatching;
        let body = ctx.body.split().freeze();

        if transfers.accepts(&header) {
            match handle_transfer_batch(&mut ctx, &mut stream_worker, &transfers, &header, &body)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    ctx.state = ConnectionState::Closed;
                    return Ok(());
                }
                Err(err) => {
                    ctx.state = ConnectionState::Closed;
                    return Err(err);
                }
            }
        } else {
            let response = router.dispatch(&header, &body).await;
            ctx.write_response(header.kind, &response).await?;
        }

        if !(config.keep_alive && header.keep_alive()) {
            debug!("closing connection after response");
            ctx.state = ConnectionState::Closed;
            return Ok(());
        }
        ctx.reset();
    }
}

/// Apply one transfer batch through the connection's stream worker.
///
/// Ok(true) = keep serving this connection; Ok(false) = stream failed and
/// the connection must reset.
async fn handle_transfer_batch<S: AsyncRead + AsyncWrite + Unpin + Send>(
    ctx: &mut ConnectionContext<S>,
    stream_worker: &mut Option<StreamWorker>,
    transfers: &Arc<TransferServer>,
    header: &RequestHeader,
    body: &[u8],
) -> Result<bool> {
    let batch = match TransferBatch::from_request(header, body) {
        Ok(batch) => batch,
        Err(err) => {
            warn!(error = %err, "malformed transfer batch, resetting connection");
            let _ = ctx
                .write_response(header.kind, &Response::from_error(&err))
                .await;
            return Ok(false);
        }
    };

    if stream_worker.is_none() {
        match transfers.spawn_worker(&header.path) {
            Ok(worker) => *stream_worker = Some(worker),
            Err(err) => {
                ctx.write_response(header.kind, &Response::from_error(&err))
                    .await?;
                return Ok(false);
            }
        }
    }
    let Some(worker) = stream_worker.as_mut() else {
        return Err(TransportError::TransferProtocol(
            "stream worker unavailable".to_string(),
        ));
    };

    let keep_alive = batch.keep_alive;
    if let Err(err) = worker.submit(batch).await {
        // The worker died on an earlier batch; surface the response it
        // left behind, then reset the connection.
        warn!(error = %err, "stream worker rejected batch");
        if let Some(worker) = stream_worker.take() {
            if let Ok(response) = worker.into_response().await {
                let _ = ctx.write_response(header.kind, &response).await;
            }
        }
        return Ok(false);
    }

    if keep_alive {
        // Keep-alive batches are not individually acknowledged.
        ctx.state = ConnectionState::ResponseWritten;
        return Ok(true);
    }

    let Some(worker) = stream_worker.take() else {
        return Err(TransportError::TransferProtocol(
            "stream worker missing for final batch".to_string(),
        ));
    };
    let response = worker.into_response().await?;
    let success = response.is_success();
    ctx.write_response(header.kind, &response).await?;
    // A failed stream resets the connection; a finished one may carry more
    // requests.
    Ok(success)
}

/// Best-effort framing guess for error responses before a header parsed.
fn sniff_kind(buf: &[u8]) -> protocol::TransportKind {
    match buf.first() {
        Some(&crate::constants::BINARY_MAGIC) => protocol::TransportKind::Binary,
        _ => protocol::TransportKind::Http,
    }
}

// portwire: framework-free socket transport
//
// Exposes and consumes services over raw TCP without a web framework.
// Clients and a server exchange requests on either a text HTTP-style
// framing or a compact binary framing, with a versioned, checksummed
// document as the universal payload. On top of the request/response layer
// sits a streaming transfer protocol: a client pushes a sequence of
// document batches under a transfer id, the server accumulates them into a
// session, and one response document answers the whole stream.
//
// Architecture overview:
// ======================
//
//   bytes → listener → connection state machine → protocol framer
//         → router (snapshot dispatch) → handler → framer → bytes
//
// Streaming requests detour after the framer: the transfer server feeds
// them through the batch pipeline into id-keyed sessions, and only the
// final batch produces a response frame.
//
// Concurrency model: one accept loop, one task per connection, strictly
// sequential parse/dispatch/write within a connection. The route table is
// read as an immutable snapshot; transfer sessions use a narrow map lock
// plus a per-id async mutex. The batch pipeline keeps a single batch in
// flight as its flow-control mechanism.

pub mod config;
pub mod connection;
pub mod constants;
pub mod document;
pub mod error;
pub mod listener;
pub mod pipeline;
pub mod protocol;
pub mod router;
pub mod server;
pub mod transfer;

// Re-export the types most callers touch.
pub use config::TransportConfig;
pub use document::DataDocument;
pub use error::{Result, TransportError};
pub use pipeline::{Batch, BatchPipeline, BatchSink, BatchSource, ChannelSource, VecSource};
pub use protocol::{RequestHeader, Response, TransportKind, Verb};
pub use router::params::{ParamKind, ParamSchema, ParamValue};
pub use router::Router;
pub use server::Server;
pub use transfer::{
    BlobStore, SessionHandler, TransferBatch, TransferClient, TransferHandle, TransferRegistry,
    TransferServer, TransferSession, VectorLayout,
};

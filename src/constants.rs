// Protocol and configuration constants for portwire
//
// Wire-level byte values, status codes, well-known header names, and the
// min/max bounds that config validation enforces. Everything the framer,
// router and transfer protocol agree on lives here so the contract is
// visible in one place.

// ===== Framing =====

/// First byte of every compact-binary frame. Chosen outside the ASCII
/// range so it can never collide with the first byte of a text verb.
pub const BINARY_MAGIC: u8 = 0xB7;

/// Protocol version token expected on the text request line.
pub const TEXT_VERSION: &str = "HTTP/1.1";

/// Terminator between the text header block and the body.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Verb codes on the binary framing.
pub const VERB_CODE_GET: u8 = 1;
pub const VERB_CODE_POST: u8 = 2;
pub const VERB_CODE_PUT: u8 = 3;
pub const VERB_CODE_DELETE: u8 = 4;
pub const VERB_CODE_STREAM: u8 = 5;

// ===== Status codes =====
//
// Shared by both framings: the text framing writes them on the status line,
// the binary framing carries them as a u16.

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_PAYLOAD_TOO_LARGE: u16 = 413;
pub const STATUS_UNPROCESSABLE: u16 = 422;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

// ===== Well-known headers =====

pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_ACCEPT: &str = "Accept";
pub const HEADER_CONNECTION: &str = "Connection";
pub const HEADER_TRANSFER_ID: &str = "Transfer-Id";
pub const HEADER_TRANSFER_KEEP_ALIVE: &str = "Transfer-Keep-Alive";
pub const HEADER_TRANSFER_ORDINAL: &str = "Transfer-Ordinal";

// ===== Content types =====

pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_DOCUMENT: &str = "application/x-portwire-document";
pub const CONTENT_TYPE_DOCUMENT_XML: &str = "application/xml";

// ===== Document model =====

/// Seed for the murmur2-64a content checksum. Arbitrary but fixed: changing
/// it changes every checksum, which is a wire-compatibility break.
pub const CHECKSUM_SEED: u64 = 0x7077_6972_6500_0001;

/// Upper bound on nesting depth accepted when decoding documents, so a
/// malicious payload cannot recurse the stack away.
pub const MAX_DOCUMENT_DEPTH: usize = 64;

// ===== Limits and defaults =====

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9161;

/// Largest request body the server will buffer.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
pub const MIN_MAX_BODY_BYTES: usize = 1024;
pub const MAX_MAX_BODY_BYTES: usize = 1024 * 1024 * 1024;

/// Largest header block either framing will accept.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Client-side per-send timeout for transfer batches.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 30_000;
pub const MIN_SEND_TIMEOUT_MS: u64 = 100;
pub const MAX_SEND_TIMEOUT_MS: u64 = 600_000;

pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Read buffer granularity for connection receive loops.
pub const RECV_BUFFER_BYTES: usize = 16 * 1024;

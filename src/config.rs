// Configuration for the portwire transport
//
// A plain settings struct with validated bounds. The transport is
// constructed with one of these; nothing reads ambient/global state.

use crate::constants::{
    DEFAULT_HOST, DEFAULT_MAX_BODY_BYTES, DEFAULT_PORT, DEFAULT_SEND_TIMEOUT_MS,
    DEFAULT_SHUTDOWN_TIMEOUT_MS, MAX_MAX_BODY_BYTES, MAX_SEND_TIMEOUT_MS, MIN_MAX_BODY_BYTES,
    MIN_SEND_TIMEOUT_MS,
};
use crate::error::{Result, TransportError};

/// Transport settings shared by the listener, connections and clients
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Interface the listener binds to
    pub host: String,
    /// Port the listener binds to
    pub port: u16,
    /// Largest request body the server will buffer before aborting
    pub max_body_bytes: usize,
    /// Client-side timeout applied to each transfer batch send (milliseconds)
    pub send_timeout_ms: u64,
    /// Whether connections stay open for pipelined requests after a response
    pub keep_alive: bool,
    /// Log each accepted connection at info level
    pub log_connections: bool,
    /// Grace period for in-flight connections on shutdown (milliseconds)
    pub shutdown_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            keep_alive: true,
            log_connections: false,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl TransportConfig {
    /// Check every setting against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(TransportError::InvalidConfig(
                "host must not be empty".into(),
            ));
        }
        if self.max_body_bytes < MIN_MAX_BODY_BYTES || self.max_body_bytes > MAX_MAX_BODY_BYTES {
            return Err(TransportError::InvalidConfig(format!(
                "max_body_bytes {} outside [{}, {}]",
                self.max_body_bytes, MIN_MAX_BODY_BYTES, MAX_MAX_BODY_BYTES
            )));
        }
        if self.send_timeout_ms < MIN_SEND_TIMEOUT_MS || self.send_timeout_ms > MAX_SEND_TIMEOUT_MS
        {
            return Err(TransportError::InvalidConfig(format!(
                "send_timeout_ms {} outside [{}, {}]",
                self.send_timeout_ms, MIN_SEND_TIMEOUT_MS, MAX_SEND_TIMEOUT_MS
            )));
        }
        Ok(())
    }

    /// `host:port` form used for binding and connecting.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

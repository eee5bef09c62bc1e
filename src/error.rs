//! Transport error types
//!
//! One error enum covers the whole transport: framing, routing, parameter
//! binding, handler execution, transfer sessions and serialization. Each
//! variant maps to a wire status code so error responses can be produced
//! uniformly at the dispatch boundary.

use thiserror::Error;

use crate::constants::{
    STATUS_BAD_REQUEST, STATUS_CONFLICT, STATUS_INTERNAL_ERROR, STATUS_NOT_FOUND,
    STATUS_PAYLOAD_TOO_LARGE, STATUS_UNPROCESSABLE,
};

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    /// Bytes on the wire did not form a valid request header
    #[error("Framing error: {0}")]
    Framing(String),

    /// No registered route matched the request
    #[error("No route for {verb} {path}")]
    RouteNotFound { verb: String, path: String },

    /// A declared parameter could not be bound or coerced
    #[error("Parameter binding error: {0}")]
    ParameterBinding(String),

    /// A handler returned an error or panicked
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),

    /// A transfer batch arrived for a session in the wrong state
    #[error("Session state error: {0}")]
    SessionState(String),

    /// Document encode/decode or round-trip violation
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed or out-of-order transfer batch
    #[error("Transfer protocol error: {0}")]
    TransferProtocol(String),

    /// Request body exceeded the configured maximum
    #[error("Body of {actual} bytes exceeds limit of {max}")]
    BodyTooLarge { max: usize, actual: usize },

    /// Client-side send did not complete within the configured timeout
    #[error("Send timed out after {0} ms")]
    SendTimeout(u64),

    /// IO error during network or stream operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// Map this error to the status code written on the wire.
    ///
    /// Lets every failure path produce a proper error response instead of a
    /// generic server error.
    pub fn status_code(&self) -> u16 {
        match self {
            TransportError::Framing(_) | TransportError::TransferProtocol(_) => STATUS_BAD_REQUEST,
            TransportError::RouteNotFound { .. } => STATUS_NOT_FOUND,
            TransportError::ParameterBinding(_) => STATUS_UNPROCESSABLE,
            TransportError::SessionState(_) => STATUS_CONFLICT,
            TransportError::BodyTooLarge { .. } => STATUS_PAYLOAD_TOO_LARGE,
            TransportError::HandlerExecution(_)
            | TransportError::Serialization(_)
            | TransportError::SendTimeout(_)
            | TransportError::Io(_)
            | TransportError::InvalidConfig(_) => STATUS_INTERNAL_ERROR,
        }
    }

    /// Message carried in the error response body.
    ///
    /// Handler detail is suppressed outside debug builds so internal state
    /// never leaks to clients.
    pub fn public_message(&self) -> String {
        match self {
            TransportError::HandlerExecution(_) if !cfg!(debug_assertions) => {
                "handler execution failed".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Framing("bad request line".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("Framing error"));
        assert!(msg.contains("bad request line"));
    }

    #[test]
    fn test_route_not_found_display() {
        let err = TransportError::RouteNotFound {
            verb: "GET".to_string(),
            path: "/missing".to_string(),
        };
        assert_eq!(format!("{}", err), "No route for GET /missing");
    }

    #[test]
    fn test_body_too_large() {
        let err = TransportError::BodyTooLarge {
            max: 1024,
            actual: 4096,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("4096"));
        assert!(msg.contains("1024"));
        assert_eq!(err.status_code(), STATUS_PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed");
        let err: TransportError = io_err.into();
        let msg = format!("{}", err);
        assert!(msg.contains("IO error"));
        assert!(msg.contains("connection closed"));
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            TransportError::Framing("x".into()).status_code(),
            STATUS_BAD_REQUEST
        );
        assert_eq!(
            TransportError::RouteNotFound {
                verb: "GET".into(),
                path: "/".into()
            }
            .status_code(),
            STATUS_NOT_FOUND
        );
        assert_eq!(
            TransportError::ParameterBinding("x".into()).status_code(),
            STATUS_UNPROCESSABLE
        );
        assert_eq!(
            TransportError::SessionState("x".into()).status_code(),
            STATUS_CONFLICT
        );
        assert_eq!(
            TransportError::HandlerExecution("x".into()).status_code(),
            STATUS_INTERNAL_ERROR
        );
    }
}

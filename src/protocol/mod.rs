//! Wire protocol framing
//!
//! Turns raw bytes into a structured [`RequestHeader`] plus body, and a
//! [`Response`] back into bytes. Two framings share one header model:
//!
//! - a text framing (`VERB SP PATH SP VERSION CRLF`, `Name: value` lines,
//!   blank-line terminator, then `Content-Length` body bytes), and
//! - a compact binary framing (magic byte, verb code, length-prefixed path
//!   and header pairs, 8-byte content length) used for non-HTTP endpoints.
//!
//! The framing is selected by sniffing the first byte of a request: the
//! binary magic sits outside ASCII, so it can never be the first byte of a
//! text verb. Parsers are incremental — they return `Ok(None)` until the
//! full header block has arrived — and report the exact byte length of the
//! header block so the connection layer knows where the body begins.

pub mod binary;
pub mod text;

use bytes::{Bytes, BytesMut};

use crate::constants::{
    BINARY_MAGIC, CONTENT_TYPE_TEXT, HEADER_CONNECTION, HEADER_CONTENT_TYPE, STATUS_OK,
    VERB_CODE_DELETE, VERB_CODE_GET, VERB_CODE_POST, VERB_CODE_PUT, VERB_CODE_STREAM,
};
use crate::error::{Result, TransportError};

/// Which framing a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Text, HTTP-style framing
    Http,
    /// Compact binary framing (private contract)
    Binary,
}

/// Request verb, shared by both framings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
    /// Streaming transfer batch
    Stream,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
            Verb::Stream => "STREAM",
        }
    }

    /// Parse a text-framing verb token (case-insensitive).
    pub fn parse(token: &str) -> Result<Self> {
        match token.to_ascii_uppercase().as_str() {
            "GET" => Ok(Verb::Get),
            "POST" => Ok(Verb::Post),
            "PUT" => Ok(Verb::Put),
            "DELETE" => Ok(Verb::Delete),
            "STREAM" => Ok(Verb::Stream),
            other => Err(TransportError::Framing(format!("unknown verb '{}'", other))),
        }
    }

    /// Binary framing verb code.
    pub fn code(&self) -> u8 {
        match self {
            Verb::Get => VERB_CODE_GET,
            Verb::Post => VERB_CODE_POST,
            Verb::Put => VERB_CODE_PUT,
            Verb::Delete => VERB_CODE_DELETE,
            Verb::Stream => VERB_CODE_STREAM,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            VERB_CODE_GET => Ok(Verb::Get),
            VERB_CODE_POST => Ok(Verb::Post),
            VERB_CODE_PUT => Ok(Verb::Put),
            VERB_CODE_DELETE => Ok(Verb::Delete),
            VERB_CODE_STREAM => Ok(Verb::Stream),
            other => Err(TransportError::Framing(format!(
                "unknown verb code {:#04x}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed request header, immutable once produced by a framer
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHeader {
    pub kind: TransportKind,
    pub verb: Verb,
    /// Path with the query string already split off
    pub path: String,
    /// Query parameters in request order; repeated names keep every value
    pub query: Vec<(String, String)>,
    /// Headers in request order; repeated names keep every value
    pub headers: Vec<(String, String)>,
    /// Exact byte length of the header block, so the body offset is known
    pub header_len: usize,
    /// Declared body length; absent means a zero-length body
    pub content_length: Option<u64>,
}

impl RequestHeader {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a repeated header, in request order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Body length to read after the header block.
    pub fn body_len(&self) -> usize {
        self.content_length.unwrap_or(0) as usize
    }

    /// Whether the connection should stay open after the response.
    ///
    /// Defaults to keep-alive; only an explicit `Connection: close` turns a
    /// connection into one-shot.
    pub fn keep_alive(&self) -> bool {
        !matches!(self.header(HEADER_CONNECTION), Some(v) if v.eq_ignore_ascii_case("close"))
    }
}

/// Response written back through the framer
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    /// Successful response with a body and content type.
    pub fn ok(body: Bytes, content_type: &str) -> Self {
        Self {
            status: STATUS_OK,
            headers: vec![(HEADER_CONTENT_TYPE.to_string(), content_type.to_string())],
            body,
        }
    }

    /// Error response carrying the public message as plain text.
    pub fn from_error(err: &TransportError) -> Self {
        Self {
            status: err.status_code(),
            headers: vec![(HEADER_CONTENT_TYPE.to_string(), CONTENT_TYPE_TEXT.to_string())],
            body: Bytes::from(err.public_message()),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Reason phrase for the text framing status line.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Parse a request header from accumulated bytes, sniffing the framing from
/// the first byte. Returns `Ok(None)` while the header block is incomplete.
pub fn parse_request_header(buf: &[u8]) -> Result<Option<RequestHeader>> {
    match buf.first() {
        None => Ok(None),
        Some(&BINARY_MAGIC) => binary::parse_request_header(buf),
        Some(_) => text::parse_request_header(buf),
    }
}

/// Encode a response on the framing the request arrived on.
pub fn encode_response(kind: TransportKind, response: &Response) -> BytesMut {
    match kind {
        TransportKind::Http => text::encode_response(response),
        TransportKind::Binary => binary::encode_response(response),
    }
}

/// Parse a response header + body from accumulated bytes (client side).
/// Returns the response and the total frame length once complete.
pub fn parse_response(buf: &[u8]) -> Result<Option<(Response, usize)>> {
    match buf.first() {
        None => Ok(None),
        Some(&BINARY_MAGIC) => binary::parse_response(buf),
        Some(_) => text::parse_response(buf),
    }
}

/// Split a request target into path and ordered query pairs.
///
/// Used by both framings so `/funk?x=3` means the same thing on each.
pub(crate) fn split_target(target: &str) -> Result<(String, Vec<(String, String)>)> {
    match target.split_once('?') {
        None => Ok((percent_decode(target)?, Vec::new())),
        Some((path, query)) => {
            let mut pairs = Vec::new();
            for piece in query.split('&').filter(|p| !p.is_empty()) {
                let (name, value) = piece.split_once('=').unwrap_or((piece, ""));
                pairs.push((percent_decode(name)?, percent_decode(value)?));
            }
            Ok((percent_decode(path)?, pairs))
        }
    }
}

/// Minimal percent-decoding: `%XX` escapes and `+` as space.
pub(crate) fn percent_decode(raw: &str) -> Result<String> {
    if !raw.contains('%') && !raw.contains('+') {
        return Ok(raw.to_string());
    }
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 2 >= bytes.len() {
                    return Err(TransportError::Framing("truncated percent escape".into()));
                }
                let hi = hex_digit(bytes[i + 1])?;
                let lo = hex_digit(bytes[i + 2])?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8(out)
        .map_err(|_| TransportError::Framing("percent escape produced invalid UTF-8".into()))
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(TransportError::Framing("invalid percent escape digit".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_roundtrip_through_codes() {
        for verb in [Verb::Get, Verb::Post, Verb::Put, Verb::Delete, Verb::Stream] {
            assert_eq!(Verb::from_code(verb.code()).unwrap(), verb);
        }
        assert!(Verb::from_code(0).is_err());
        assert!(Verb::from_code(0xff).is_err());
    }

    #[test]
    fn test_split_target_without_query() {
        let (path, query) = split_target("/status").unwrap();
        assert_eq!(path, "/status");
        assert!(query.is_empty());
    }

    #[test]
    fn test_split_target_with_repeated_names() {
        let (path, query) = split_target("/q?a=1&a=2&b=x").unwrap();
        assert_eq!(path, "/q");
        assert_eq!(
            query,
            vec![
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn test_percent_decoding() {
        assert_eq!(percent_decode("a%20b+c").unwrap(), "a b c");
        assert_eq!(percent_decode("plain").unwrap(), "plain");
        assert!(percent_decode("bad%2").is_err());
        assert!(percent_decode("bad%zz").is_err());
    }

    #[test]
    fn test_keep_alive_defaults_on() {
        let header = RequestHeader {
            kind: TransportKind::Http,
            verb: Verb::Get,
            path: "/".into(),
            query: vec![],
            headers: vec![],
            header_len: 0,
            content_length: None,
        };
        assert!(header.keep_alive());
    }
}

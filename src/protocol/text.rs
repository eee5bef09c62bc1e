// Text framing codec
//
// HTTP-style framing: `VERB SP PATH SP VERSION CRLF`, then `Name: value`
// lines, a blank-line terminator, then exactly Content-Length body bytes.
// Parsing is incremental over the connection's receive buffer; nothing is
// consumed here, the caller advances by the reported header length.

use bytes::{BufMut, BytesMut};
use tracing::warn;

use super::{reason_phrase, split_target, RequestHeader, Response, TransportKind, Verb};
use crate::constants::{
    HEADER_CONTENT_LENGTH, HEADER_TERMINATOR, MAX_HEADER_BYTES, TEXT_VERSION,
};
use crate::error::{Result, TransportError};

/// Locate the blank-line terminator; `None` means the block is incomplete.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Parse a text request header from accumulated bytes.
///
/// Returns `Ok(None)` until the blank-line terminator has arrived. The
/// reported `header_len` is the exact byte count preceding the body,
/// terminator included.
pub fn parse_request_header(buf: &[u8]) -> Result<Option<RequestHeader>> {
    let Some(end) = find_terminator(buf) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(TransportError::Framing(format!(
                "header block exceeds {} bytes without terminator",
                MAX_HEADER_BYTES
            )));
        }
        return Ok(None);
    };
    let header_len = end + HEADER_TERMINATOR.len();

    let block = std::str::from_utf8(&buf[..end])
        .map_err(|_| TransportError::Framing("header block is not valid UTF-8".into()))?;
    let mut lines = block.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| TransportError::Framing("empty header block".into()))?;
    let mut parts = request_line.splitn(3, ' ');
    let verb_token = parts
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| TransportError::Framing("missing verb on request line".into()))?;
    let target = parts
        .next()
        .ok_or_else(|| TransportError::Framing("missing path on request line".into()))?;
    let version = parts
        .next()
        .ok_or_else(|| TransportError::Framing("missing version on request line".into()))?;
    if version != TEXT_VERSION {
        warn!(version, "unsupported protocol version on request line");
        return Err(TransportError::Framing(format!(
            "unsupported version '{}'",
            version
        )));
    }

    let verb = Verb::parse(verb_token)?;
    let (path, query) = split_target(target)?;

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TransportError::Framing(format!("malformed header line '{}'", line)))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let content_length = match headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(HEADER_CONTENT_LENGTH))
    {
        Some((_, v)) => Some(v.parse::<u64>().map_err(|_| {
            TransportError::Framing(format!("invalid {} '{}'", HEADER_CONTENT_LENGTH, v))
        })?),
        None => None,
    };

    Ok(Some(RequestHeader {
        kind: TransportKind::Http,
        verb,
        path,
        query,
        headers,
        header_len,
        content_length,
    }))
}

/// Encode a response for the text framing.
///
/// Content-Length is always written from the actual body size; a stale
/// caller-provided value is dropped rather than trusted.
pub fn encode_response(response: &Response) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_slice(
        format!(
            "{} {} {}\r\n",
            TEXT_VERSION,
            response.status,
            reason_phrase(response.status)
        )
        .as_bytes(),
    );
    buf.put_slice(format!("{}: {}\r\n", HEADER_CONTENT_LENGTH, response.body.len()).as_bytes());
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case(HEADER_CONTENT_LENGTH) {
            continue;
        }
        buf.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    buf.put_slice(b"\r\n");
    buf.put_slice(&response.body);
    buf
}

/// Encode a client request for the text framing.
pub fn encode_request(
    verb: Verb,
    target: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_slice(format!("{} {} {}\r\n", verb, target, TEXT_VERSION).as_bytes());
    for (name, value) in headers {
        buf.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    buf.put_slice(format!("{}: {}\r\n", HEADER_CONTENT_LENGTH, body.len()).as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(body);
    buf
}

/// Parse a complete response (header + body) from accumulated bytes.
///
/// Client side of the framing. Returns the response and the total frame
/// length once every body byte is present.
pub fn parse_response(buf: &[u8]) -> Result<Option<(Response, usize)>> {
    let Some(end) = find_terminator(buf) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(TransportError::Framing("response header too large".into()));
        }
        return Ok(None);
    };
    let header_len = end + HEADER_TERMINATOR.len();

    let block = std::str::from_utf8(&buf[..end])
        .map_err(|_| TransportError::Framing("response header is not valid UTF-8".into()))?;
    let mut lines = block.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| TransportError::Framing("empty response header".into()))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| TransportError::Framing("missing version on status line".into()))?;
    if version != TEXT_VERSION {
        return Err(TransportError::Framing(format!(
            "unsupported version '{}'",
            version
        )));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TransportError::Framing("missing status code".into()))?;

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TransportError::Framing(format!("malformed header line '{}'", line)))?;
        let name = name.trim().to_string();
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case(HEADER_CONTENT_LENGTH) {
            content_length = value.parse().map_err(|_| {
                TransportError::Framing(format!("invalid {} '{}'", HEADER_CONTENT_LENGTH, value))
            })?;
        }
        headers.push((name, value));
    }

    let total = header_len + content_length;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((
        Response {
            status,
            headers,
            body: bytes::Bytes::copy_from_slice(&buf[header_len..total]),
        },
        total,
    )))
}

// Compact binary framing codec
//
// Private contract between this crate's own client and server, used for
// non-HTTP endpoints. Big-endian throughout:
//
//   request:  magic:u8 · verb code:u8 · path u16 len + UTF-8 · header
//             count:u16 · per header (key u16 len + bytes, value u16 len +
//             bytes) · content length:u64
//   response: magic:u8 · status:u16 · header count:u16 · header pairs as
//             above · content length:u64 · body
//
// Parsing is incremental: until every declared byte of the header block has
// arrived the parser reports "not yet" and the connection keeps reading.
// Declared lengths are capped so a hostile peer cannot park a connection on
// an absurd header block.

use bytes::{BufMut, BytesMut};
use tracing::warn;

use super::{split_target, RequestHeader, Response, TransportKind, Verb};
use crate::constants::{BINARY_MAGIC, MAX_HEADER_BYTES};
use crate::error::{Result, TransportError};

/// Incremental big-endian reader over a possibly-incomplete buffer.
///
/// `None` from any method means the bytes have not arrived yet.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|s| s[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|s| u16::from_be_bytes([s[0], s[1]]))
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8)
            .map(|s| u64::from_be_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]]))
    }

    /// Length-prefixed UTF-8 string. Outer `None` = incomplete.
    fn string(&mut self, what: &str) -> Option<Result<String>> {
        let len = self.u16()? as usize;
        if self.pos + len > MAX_HEADER_BYTES {
            return Some(Err(TransportError::Framing(format!(
                "binary header block exceeds {} bytes",
                MAX_HEADER_BYTES
            ))));
        }
        let raw = self.take(len)?;
        Some(
            std::str::from_utf8(raw)
                .map(str::to_string)
                .map_err(|_| TransportError::Framing(format!("{} is not valid UTF-8", what))),
        )
    }
}

/// Parse a binary request header from accumulated bytes.
///
/// Returns `Ok(None)` until the full header block is present; the reported
/// `header_len` is the exact byte count preceding the body.
pub fn parse_request_header(buf: &[u8]) -> Result<Option<RequestHeader>> {
    let mut cur = Cursor::new(buf);

    let Some(magic) = cur.u8() else { return Ok(None) };
    if magic != BINARY_MAGIC {
        // Caller sniffed the first byte already, so this is a logic error
        // on the wire rather than a truncation.
        return Err(TransportError::Framing(format!(
            "bad magic byte {:#04x}",
            magic
        )));
    }

    let Some(code) = cur.u8() else { return Ok(None) };
    let verb = Verb::from_code(code)?;

    let Some(target) = cur.string("path") else { return Ok(None) };
    let (path, query) = split_target(&target?)?;

    let Some(header_count) = cur.u16() else { return Ok(None) };
    let mut headers = Vec::with_capacity(header_count as usize);
    for _ in 0..header_count {
        let Some(key) = cur.string("header key") else { return Ok(None) };
        let Some(value) = cur.string("header value") else { return Ok(None) };
        headers.push((key?, value?));
    }

    let Some(content_length) = cur.u64() else { return Ok(None) };

    Ok(Some(RequestHeader {
        kind: TransportKind::Binary,
        verb,
        path,
        query,
        headers,
        header_len: cur.pos,
        content_length: Some(content_length),
    }))
}

/// Encode a client request header block (body bytes follow separately).
pub fn encode_request(
    verb: Verb,
    target: &str,
    headers: &[(String, String)],
    content_length: u64,
) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(BINARY_MAGIC);
    buf.put_u8(verb.code());
    put_str(&mut buf, target);
    buf.put_u16(headers.len() as u16);
    for (key, value) in headers {
        put_str(&mut buf, key);
        put_str(&mut buf, value);
    }
    buf.put_u64(content_length);
    buf
}

/// Encode a response frame, body included.
pub fn encode_response(response: &Response) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(BINARY_MAGIC);
    buf.put_u16(response.status);
    buf.put_u16(response.headers.len() as u16);
    for (key, value) in &response.headers {
        put_str(&mut buf, key);
        put_str(&mut buf, value);
    }
    buf.put_u64(response.body.len() as u64);
    buf.put_slice(&response.body);
    buf
}

/// Parse a complete response frame. Returns the response and total frame
/// length once every body byte is present.
pub fn parse_response(buf: &[u8]) -> Result<Option<(Response, usize)>> {
    let mut cur = Cursor::new(buf);

    let Some(magic) = cur.u8() else { return Ok(None) };
    if magic != BINARY_MAGIC {
        return Err(TransportError::Framing(format!(
            "bad magic byte {:#04x}",
            magic
        )));
    }

    let Some(status) = cur.u16() else { return Ok(None) };
    let Some(header_count) = cur.u16() else { return Ok(None) };
    let mut headers = Vec::with_capacity(header_count as usize);
    for _ in 0..header_count {
        let Some(key) = cur.string("header key") else { return Ok(None) };
        let Some(value) = cur.string("header value") else { return Ok(None) };
        headers.push((key?, value?));
    }

    let Some(content_length) = cur.u64() else { return Ok(None) };
    let content_length = usize::try_from(content_length).map_err(|_| {
        warn!(content_length, "binary response body length overflows usize");
        TransportError::Framing("response body length overflows".into())
    })?;
    let Some(body) = cur.take(content_length) else { return Ok(None) };

    Ok(Some((
        Response {
            status,
            headers,
            body: bytes::Bytes::copy_from_slice(body),
        },
        cur.pos,
    )))
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

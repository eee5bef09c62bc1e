// Compact binary codec for DataDocument
//
// Private wire contract, big-endian throughout:
//   version:i32 · property count:u32 · (key,value) UTF-8 pairs, u32
//   length-prefixed · vector count:u32 · per vector u32 element count + f64
//   bits · blob count:u32 · (name u32+bytes, data u32+bytes) · child
//   count:u32 · children recursively in the same layout.
//
// Decoding checks remaining length before every read and bounds nesting
// depth, so truncated or hostile payloads fail with a typed error instead
// of panicking.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use super::DataDocument;
use crate::constants::MAX_DOCUMENT_DEPTH;
use crate::error::{Result, TransportError};

/// Encode a document into its canonical binary form.
pub fn encode(doc: &DataDocument) -> Bytes {
    let mut buf = BytesMut::new();
    encode_into(doc, &mut buf);
    buf.freeze()
}

fn encode_into(doc: &DataDocument, buf: &mut BytesMut) {
    buf.put_i32(doc.version);

    buf.put_u32(doc.properties.len() as u32);
    for (key, value) in &doc.properties {
        put_str(buf, key);
        put_str(buf, value);
    }

    buf.put_u32(doc.vectors.len() as u32);
    for vector in &doc.vectors {
        buf.put_u32(vector.len() as u32);
        for value in vector {
            buf.put_f64(*value);
        }
    }

    buf.put_u32(doc.blobs.len() as u32);
    for (name, data) in &doc.blobs {
        put_str(buf, name);
        buf.put_u32(data.len() as u32);
        buf.put_slice(data);
    }

    buf.put_u32(doc.children.len() as u32);
    for child in &doc.children {
        encode_into(child, buf);
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Decode a document from its canonical binary form.
///
/// The input must contain exactly one document; trailing bytes are an error
/// so a corrupted frame cannot silently pass as valid.
pub fn decode(data: &[u8]) -> Result<DataDocument> {
    let mut buf = data;
    let doc = decode_from(&mut buf, 0)?;
    if buf.has_remaining() {
        warn!(trailing = buf.remaining(), "document decode left trailing bytes");
        return Err(TransportError::Serialization(format!(
            "{} trailing bytes after document",
            buf.remaining()
        )));
    }
    Ok(doc)
}

fn decode_from(buf: &mut &[u8], depth: usize) -> Result<DataDocument> {
    if depth > MAX_DOCUMENT_DEPTH {
        return Err(TransportError::Serialization(format!(
            "document nesting exceeds {} levels",
            MAX_DOCUMENT_DEPTH
        )));
    }

    ensure(buf, 4, "version")?;
    let version = buf.get_i32();

    let property_count = get_count(buf, "property count")?;
    let mut properties = Vec::with_capacity(property_count.min(1024));
    for _ in 0..property_count {
        let key = get_str(buf, "property key")?;
        let value = get_str(buf, "property value")?;
        properties.push((key, value));
    }

    let vector_count = get_count(buf, "vector count")?;
    let mut vectors = Vec::with_capacity(vector_count.min(1024));
    for _ in 0..vector_count {
        let len = get_count(buf, "vector length")?;
        ensure(buf, len * 8, "vector elements")?;
        let mut vector = Vec::with_capacity(len);
        for _ in 0..len {
            vector.push(buf.get_f64());
        }
        vectors.push(vector);
    }

    let blob_count = get_count(buf, "blob count")?;
    let mut blobs = Vec::with_capacity(blob_count.min(1024));
    for _ in 0..blob_count {
        let name = get_str(buf, "blob name")?;
        let len = get_count(buf, "blob length")?;
        ensure(buf, len, "blob data")?;
        blobs.push((name, buf.copy_to_bytes(len).to_vec()));
    }

    let child_count = get_count(buf, "child count")?;
    let mut children = Vec::with_capacity(child_count.min(1024));
    for _ in 0..child_count {
        children.push(decode_from(buf, depth + 1)?);
    }

    Ok(DataDocument {
        version,
        properties,
        vectors,
        blobs,
        children,
    })
}

fn ensure(buf: &[u8], needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        warn!(
            needed,
            remaining = buf.remaining(),
            field = what,
            "document truncated"
        );
        return Err(TransportError::Serialization(format!(
            "truncated document: {} needs {} bytes, {} remain",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_count(buf: &mut &[u8], what: &str) -> Result<usize> {
    ensure(buf, 4, what)?;
    Ok(buf.get_u32() as usize)
}

fn get_str(buf: &mut &[u8], what: &str) -> Result<String> {
    let len = get_count(buf, what)?;
    ensure(buf, len, what)?;
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|e| {
        TransportError::Serialization(format!("{} is not valid UTF-8: {}", what, e))
    })
}

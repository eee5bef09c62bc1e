//! Versioned, checksummed document payload
//!
//! `DataDocument` is the wire payload for every service in the transport:
//! an integer version, an ordered property map, a list of numeric vectors,
//! named binary blobs, and recursively nested child documents. Each child is
//! exclusively owned by its parent, so a document is always a tree.
//!
//! The checksum is a pure function of current content: it is recomputed from
//! the canonical binary encoding on every call rather than cached, so a
//! partially mutated document can never report a stale value. Two documents
//! with identical content always produce identical checksums, whatever the
//! mutation history that built them.

mod codec;
mod xml;

use std::io::{Read, Write};

use bytes::Bytes;

use crate::constants::CHECKSUM_SEED;
use crate::error::{Result, TransportError};

/// Self-describing data container used as the universal wire payload
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataDocument {
    version: i32,
    /// Ordered key/value properties. Updates keep the key's position.
    properties: Vec<(String, String)>,
    vectors: Vec<Vec<f64>>,
    /// Ordered named blobs.
    blobs: Vec<(String, Vec<u8>)>,
    children: Vec<DataDocument>,
}

impl DataDocument {
    /// Create an empty document at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty document at a given version.
    pub fn with_version(version: i32) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn set_version(&mut self, version: i32) {
        self.version = version;
    }

    // ===== Properties =====

    /// Look up a property value by key.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a property, keeping the key's original position on update.
    ///
    /// An absent (`None`) value is rejected and leaves the document
    /// unchanged: a property either exists with a concrete value or does not
    /// exist at all, which keeps the checksum and both serializations
    /// unambiguous.
    pub fn set_property(&mut self, key: &str, value: Option<&str>) -> Result<()> {
        let value = value.ok_or_else(|| {
            TransportError::Serialization(format!("property '{}' assigned an absent value", key))
        })?;
        match self.properties.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.properties.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Iterate properties in insertion order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    // ===== Vectors =====

    /// Append a numeric vector.
    pub fn push_vector(&mut self, vector: Vec<f64>) {
        self.vectors.push(vector);
    }

    pub fn vectors(&self) -> &[Vec<f64>] {
        &self.vectors
    }

    pub fn clear_vectors(&mut self) {
        self.vectors.clear();
    }

    // ===== Blobs =====

    /// Store a named blob, keeping the name's original position on update.
    pub fn put_blob(&mut self, name: &str, data: Vec<u8>) {
        match self.blobs.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = data,
            None => self.blobs.push((name.to_string(), data)),
        }
    }

    pub fn blob(&self, name: &str) -> Option<&[u8]> {
        self.blobs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
    }

    pub fn blobs(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.blobs.iter().map(|(n, d)| (n.as_str(), d.as_slice()))
    }

    // ===== Children =====

    /// Append a child document. The child is moved in: children are
    /// exclusively owned, never shared, so the tree cannot contain cycles.
    pub fn add_child(&mut self, child: DataDocument) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[DataDocument] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [DataDocument] {
        &mut self.children
    }

    // ===== Serialization =====

    /// Canonical compact binary form.
    pub fn to_bytes(&self) -> Bytes {
        codec::encode(self)
    }

    /// Decode from the compact binary form. Trailing bytes are an error.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        codec::decode(data)
    }

    /// Write the compact binary form to a stream.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read the compact binary form from a stream (reads to end).
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Lossless XML form.
    pub fn to_xml(&self) -> String {
        xml::export(self)
    }

    /// Parse the XML form produced by [`to_xml`](Self::to_xml).
    pub fn from_xml(text: &str) -> Result<Self> {
        xml::import(text)
    }

    /// Content checksum: murmur2-64a over the canonical binary encoding.
    ///
    /// Changes whenever the version, any property, any vector, any blob or
    /// any (recursively) child changes.
    pub fn checksum(&self) -> u64 {
        murmur2::murmur64a(&self.to_bytes(), CHECKSUM_SEED)
    }
}

// Response serialization
//
// Handler results are serialized through a mime-negotiated registry: the
// request's Accept header picks a serializer by content type, falling back
// to plain text. The standard registry covers plain text, the document
// binary form and the document XML form; a custom registry can be supplied
// when constructing the router.

use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;

use super::params::ParamValue;
use crate::constants::{CONTENT_TYPE_DOCUMENT, CONTENT_TYPE_DOCUMENT_XML, CONTENT_TYPE_TEXT};
use crate::error::{Result, TransportError};

/// Converts a handler result into response body bytes
pub trait Serializer: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn serialize(&self, value: &ParamValue) -> Result<Bytes>;
}

/// Plain-text rendering of any value; the default
pub struct PlainSerializer;

impl Serializer for PlainSerializer {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_TEXT
    }

    fn serialize(&self, value: &ParamValue) -> Result<Bytes> {
        Ok(Bytes::from(value.to_string()))
    }
}

/// Compact binary document form; only document values qualify
pub struct BinaryDocumentSerializer;

impl Serializer for BinaryDocumentSerializer {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_DOCUMENT
    }

    fn serialize(&self, value: &ParamValue) -> Result<Bytes> {
        match value {
            ParamValue::Document(doc) => Ok(doc.to_bytes()),
            other => Err(TransportError::Serialization(format!(
                "{} cannot carry a non-document value ({:?})",
                CONTENT_TYPE_DOCUMENT,
                other.kind()
            ))),
        }
    }
}

/// XML document form; only document values qualify
pub struct XmlDocumentSerializer;

impl Serializer for XmlDocumentSerializer {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_DOCUMENT_XML
    }

    fn serialize(&self, value: &ParamValue) -> Result<Bytes> {
        match value {
            ParamValue::Document(doc) => Ok(Bytes::from(doc.to_xml())),
            other => Err(TransportError::Serialization(format!(
                "{} cannot carry a non-document value ({:?})",
                CONTENT_TYPE_DOCUMENT_XML,
                other.kind()
            ))),
        }
    }
}

/// Content-type keyed serializer set with a fallback default
pub struct SerializerRegistry {
    entries: Vec<Arc<dyn Serializer>>,
    default: Arc<dyn Serializer>,
}

static STANDARD: Lazy<Arc<SerializerRegistry>> = Lazy::new(|| {
    let plain: Arc<dyn Serializer> = Arc::new(PlainSerializer);
    Arc::new(SerializerRegistry {
        entries: vec![
            plain.clone(),
            Arc::new(BinaryDocumentSerializer),
            Arc::new(XmlDocumentSerializer),
        ],
        default: plain,
    })
});

impl SerializerRegistry {
    /// The built-in plain/binary/XML registry.
    pub fn standard() -> Arc<SerializerRegistry> {
        STANDARD.clone()
    }

    pub fn new(entries: Vec<Arc<dyn Serializer>>, default: Arc<dyn Serializer>) -> Self {
        Self { entries, default }
    }

    /// Pick a serializer for an Accept header value; unknown or absent
    /// types fall back to the default.
    pub fn negotiate(&self, accept: Option<&str>) -> Arc<dyn Serializer> {
        let Some(accept) = accept else {
            return self.default.clone();
        };
        for wanted in accept.split(',').map(str::trim) {
            // Strip any ;q= style parameters.
            let wanted = wanted.split(';').next().unwrap_or(wanted);
            if let Some(found) = self
                .entries
                .iter()
                .find(|s| s.content_type().eq_ignore_ascii_case(wanted))
            {
                return found.clone();
            }
        }
        self.default.clone()
    }
}

// Parameter values and binding schemas
//
// Handlers receive one ParamValue built from the request. The shape of that
// value is declared at bind time as an explicit schema: a list of
// (name, kind, default) descriptors for record-shaped inputs, or a marker
// that the whole body is a document. Binding is a pure function over the
// parameter bag and body; there is no reflection anywhere.
//
// Precedence per field: path capture → query parameter → body field →
// declared default. A field with no default and no bound value is a
// binding error, never a silent zero.

use bytes::Bytes;

use crate::constants::CONTENT_TYPE_DOCUMENT_XML;
use crate::document::DataDocument;
use crate::error::{Result, TransportError};

/// Primitive kind of a declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Float,
    Str,
}

/// Dynamic value passed into and out of handlers
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Named fields in declaration order
    Record(Vec<(String, ParamValue)>),
    Document(DataDocument),
}

impl ParamValue {
    pub fn kind(&self) -> Option<ParamKind> {
        match self {
            ParamValue::Bool(_) => Some(ParamKind::Bool),
            ParamValue::Int(_) => Some(ParamKind::Int),
            ParamValue::Float(_) => Some(ParamKind::Float),
            ParamValue::Str(_) => Some(ParamKind::Str),
            _ => None,
        }
    }

    /// Coerce a raw string (path/query/body field) to a declared kind.
    pub fn coerce(kind: ParamKind, name: &str, raw: &str) -> Result<ParamValue> {
        let err = |what: &str| {
            TransportError::ParameterBinding(format!(
                "parameter '{}': '{}' is not a valid {}",
                name, raw, what
            ))
        };
        match kind {
            ParamKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(ParamValue::Bool(true)),
                "false" | "0" => Ok(ParamValue::Bool(false)),
                _ => Err(err("bool")),
            },
            ParamKind::Int => raw.parse().map(ParamValue::Int).map_err(|_| err("integer")),
            ParamKind::Float => raw.parse().map(ParamValue::Float).map_err(|_| err("float")),
            ParamKind::Str => Ok(ParamValue::Str(raw.to_string())),
        }
    }

    /// Field of a record value, by name.
    pub fn field(&self, name: &str) -> Option<&ParamValue> {
        match self {
            ParamValue::Record(fields) => {
                fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&DataDocument> {
        match self {
            ParamValue::Document(doc) => Some(doc),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    /// Plain-text rendering used by the default serializer.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(v) => f.write_str(v),
            ParamValue::Record(fields) => {
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{}={}", name, value)?;
                }
                Ok(())
            }
            ParamValue::Document(doc) => f.write_str(&doc.to_xml()),
        }
    }
}

/// One declared field of a record schema
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ParamKind,
    /// Absent means the field is required
    pub default: Option<ParamValue>,
}

/// Input shape declared when a handler is bound
#[derive(Debug, Clone, Default)]
pub enum ParamSchema {
    /// Handler takes no input; it receives an empty record
    #[default]
    Empty,
    /// Record of named fields bound from path/query/body with defaults
    Record(Vec<FieldSpec>),
    /// The whole request body is a document
    Document,
}

impl ParamSchema {
    pub fn record() -> RecordSchemaBuilder {
        RecordSchemaBuilder { fields: Vec::new() }
    }

    /// Build the handler input from the bag and body.
    ///
    /// `bag` holds path captures under their bare names and request query
    /// values either bare (declared in the template) or under `query.<name>`.
    pub fn bind(
        &self,
        bag: &[(String, String)],
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<ParamValue> {
        match self {
            ParamSchema::Empty => Ok(ParamValue::Record(Vec::new())),
            ParamSchema::Document => {
                let doc = if matches!(content_type, Some(ct) if ct.starts_with(CONTENT_TYPE_DOCUMENT_XML))
                {
                    let text = std::str::from_utf8(body).map_err(|_| {
                        TransportError::ParameterBinding("document body is not UTF-8".into())
                    })?;
                    DataDocument::from_xml(text)
                } else {
                    DataDocument::from_bytes(body)
                }
                .map_err(|e| TransportError::ParameterBinding(format!("body document: {}", e)))?;
                Ok(ParamValue::Document(doc))
            }
            ParamSchema::Record(specs) => {
                let body_fields = parse_body_fields(body);
                let mut fields = Vec::with_capacity(specs.len());
                for spec in specs {
                    let bound = bag
                        .iter()
                        .find(|(n, _)| n == &spec.name)
                        .map(|(_, v)| v.as_str())
                        .or_else(|| {
                            body_fields
                                .iter()
                                .find(|(n, _)| n == &spec.name)
                                .map(|(_, v)| v.as_str())
                        });
                    let value = match bound {
                        Some(raw) => ParamValue::coerce(spec.kind, &spec.name, raw)?,
                        None => spec.default.clone().ok_or_else(|| {
                            TransportError::ParameterBinding(format!(
                                "required parameter '{}' was not supplied",
                                spec.name
                            ))
                        })?,
                    };
                    fields.push((spec.name.clone(), value));
                }
                Ok(ParamValue::Record(fields))
            }
        }
    }
}

/// Body fields for record binding: form-style `name=value` pairs joined
/// with `&` or newlines. Anything unparseable is simply not a field.
fn parse_body_fields(body: &[u8]) -> Vec<(String, String)> {
    let Ok(text) = std::str::from_utf8(body) else {
        return Vec::new();
    };
    text.split(['&', '\n'])
        .filter_map(|piece| piece.trim().split_once('='))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Builder assembling a record schema field by field
pub struct RecordSchemaBuilder {
    fields: Vec<FieldSpec>,
}

impl RecordSchemaBuilder {
    /// Declare a field with a default; the kind is taken from the default
    /// value, which doubles as the example shape.
    pub fn field(mut self, name: &str, default: ParamValue) -> Self {
        let kind = default.kind().unwrap_or(ParamKind::Str);
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            default: Some(default),
        });
        self
    }

    /// Declare a field with no default; binding fails if nothing supplies it.
    pub fn required(mut self, name: &str, kind: ParamKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            default: None,
        });
        self
    }

    pub fn build(self) -> ParamSchema {
        ParamSchema::Record(self.fields)
    }
}

/// Serialize a record value back to body-field form (client side).
pub fn encode_body_fields(value: &ParamValue) -> Bytes {
    match value {
        ParamValue::Record(fields) => {
            let text = fields
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect::<Vec<_>>()
                .join("&");
            Bytes::from(text)
        }
        other => Bytes::from(other.to_string()),
    }
}

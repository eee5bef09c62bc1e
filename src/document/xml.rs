// XML form of DataDocument
//
// A fixed, self-describing dialect private to this crate, mirroring the
// binary layout one-to-one so the two forms are interchangeable:
//
//   <document version="3">
//     <property name="k">v</property>
//     <vector>1 2.5 -3</vector>
//     <blob name="raw">00ff10</blob>
//     <document version="1">...</document>
//   </document>
//
// Emitted without inter-element whitespace so property text is exactly the
// stored value. Numbers use the shortest round-tripping decimal form, blobs
// are lowercase hex, and the five standard XML entities are escaped in both
// attribute values and text. The parser is a small cursor over the input in
// the same check-before-read style as the binary decoder.

use super::DataDocument;
use crate::constants::MAX_DOCUMENT_DEPTH;
use crate::error::{Result, TransportError};

// ===== Export =====

pub fn export(doc: &DataDocument) -> String {
    let mut out = String::new();
    write_document(doc, &mut out);
    out
}

fn write_document(doc: &DataDocument, out: &mut String) {
    out.push_str(&format!("<document version=\"{}\">", doc.version));
    for (key, value) in &doc.properties {
        out.push_str("<property name=\"");
        escape_into(key, out);
        out.push_str("\">");
        escape_into(value, out);
        out.push_str("</property>");
    }
    for vector in &doc.vectors {
        out.push_str("<vector>");
        for (i, value) in vector.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&value.to_string());
        }
        out.push_str("</vector>");
    }
    for (name, data) in &doc.blobs {
        out.push_str("<blob name=\"");
        escape_into(name, out);
        out.push_str("\">");
        for byte in data {
            out.push_str(&format!("{:02x}", byte));
        }
        out.push_str("</blob>");
    }
    for child in &doc.children {
        write_document(child, out);
    }
    out.push_str("</document>");
}

fn escape_into(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
}

// ===== Import =====

pub fn import(text: &str) -> Result<DataDocument> {
    let mut cursor = Cursor::new(text);
    cursor.skip_whitespace();
    let doc = parse_document(&mut cursor, 0)?;
    cursor.skip_whitespace();
    if !cursor.at_end() {
        return Err(cursor.error("trailing content after root document"));
    }
    Ok(doc)
}

fn parse_document(cur: &mut Cursor<'_>, depth: usize) -> Result<DataDocument> {
    if depth > MAX_DOCUMENT_DEPTH {
        return Err(TransportError::Serialization(format!(
            "document nesting exceeds {} levels",
            MAX_DOCUMENT_DEPTH
        )));
    }

    cur.expect("<document")?;
    let version_text = cur.attribute("version")?;
    cur.expect(">")?;
    let version: i32 = version_text
        .parse()
        .map_err(|_| cur.error("version attribute is not an integer"))?;

    let mut doc = DataDocument::with_version(version);

    loop {
        cur.skip_whitespace();
        if cur.try_consume("</document>") {
            return Ok(doc);
        }
        if cur.peek_is("<property") {
            cur.expect("<property")?;
            let name = cur.attribute("name")?;
            cur.expect(">")?;
            let value = unescape(cur.text_until('<')?)?;
            cur.expect("</property>")?;
            doc.properties.push((name, value));
        } else if cur.peek_is("<vector>") {
            cur.expect("<vector>")?;
            let body = cur.text_until('<')?;
            cur.expect("</vector>")?;
            let mut vector = Vec::new();
            for token in body.split_ascii_whitespace() {
                let value: f64 = token
                    .parse()
                    .map_err(|_| cur.error("vector element is not a number"))?;
                vector.push(value);
            }
            doc.vectors.push(vector);
        } else if cur.peek_is("<blob") {
            cur.expect("<blob")?;
            let name = cur.attribute("name")?;
            cur.expect(">")?;
            let body = cur.text_until('<')?;
            cur.expect("</blob>")?;
            doc.blobs.push((name, decode_hex(body.trim(), cur)?));
        } else if cur.peek_is("<document") {
            let child = parse_document(cur, depth + 1)?;
            doc.children.push(child);
        } else {
            return Err(cur.error("unexpected element in document body"));
        }
    }
}

fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let entity = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(e, _)| rest.starts_with(e));
        match entity {
            Some((e, ch)) => {
                out.push(*ch);
                rest = &rest[e.len()..];
            }
            None => {
                return Err(TransportError::Serialization(
                    "unknown entity in document text".into(),
                ))
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn decode_hex(text: &str, cur: &Cursor<'_>) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(cur.error("blob hex payload has odd length"));
    }
    let mut data = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    for pair in bytes.chunks(2) {
        let hi = hex_value(pair[0]).ok_or_else(|| cur.error("blob payload is not hex"))?;
        let lo = hex_value(pair[1]).ok_or_else(|| cur.error("blob payload is not hex"))?;
        data.push((hi << 4) | lo);
    }
    Ok(data)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Byte cursor over the XML text with position-carrying errors.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn error(&self, message: &str) -> TransportError {
        TransportError::Serialization(format!("{} at byte {}", message, self.pos))
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    fn peek_is(&self, token: &str) -> bool {
        self.rest().starts_with(token)
    }

    fn try_consume(&mut self, token: &str) -> bool {
        if self.peek_is(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.try_consume(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", token)))
        }
    }

    /// Parse ` name="value"` with entity unescaping of the value.
    fn attribute(&mut self, name: &str) -> Result<String> {
        self.skip_whitespace();
        self.expect(name)?;
        self.expect("=\"")?;
        let raw = self.text_until('"')?;
        self.expect("\"")?;
        unescape(raw)
    }

    /// Consume and return text up to (not including) `stop`.
    fn text_until(&mut self, stop: char) -> Result<&'a str> {
        match self.rest().find(stop) {
            Some(idx) => {
                let slice = &self.rest()[..idx];
                self.pos += idx;
                Ok(slice)
            }
            None => Err(self.error(&format!("unterminated text, expected '{}'", stop))),
        }
    }
}

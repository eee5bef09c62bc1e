// Property-based tests using proptest
//
// Random documents and headers exercise the round-trip and checksum laws
// well beyond the hand-written cases: arbitrary content must survive both
// document serializations, and arbitrary well-formed headers must survive
// both framings with exact header lengths.

use proptest::prelude::*;

use portwire::protocol::{binary, parse_request_header, text, Verb};
use portwire::DataDocument;

fn finite_f64() -> impl Strategy<Value = f64> {
    prop::num::f64::POSITIVE
        | prop::num::f64::NEGATIVE
        | prop::num::f64::NORMAL
        | prop::num::f64::SUBNORMAL
        | prop::num::f64::ZERO
}

fn arb_string(max: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<char>(), 0..max).prop_map(String::from_iter)
}

prop_compose! {
    fn arb_flat_document()(
        version in any::<i32>(),
        properties in prop::collection::vec((arb_string(8), arb_string(16)), 0..6),
        vectors in prop::collection::vec(prop::collection::vec(finite_f64(), 0..6), 0..4),
        blobs in prop::collection::vec((arb_string(8), prop::collection::vec(any::<u8>(), 0..32)), 0..3),
    ) -> DataDocument {
        let mut doc = DataDocument::with_version(version);
        for (key, value) in &properties {
            doc.set_property(key, Some(value)).unwrap();
        }
        for vector in vectors {
            doc.push_vector(vector);
        }
        for (name, data) in blobs {
            doc.put_blob(&name, data);
        }
        doc
    }
}

fn arb_document() -> impl Strategy<Value = DataDocument> {
    arb_flat_document().prop_recursive(3, 24, 3, |inner| {
        (arb_flat_document(), prop::collection::vec(inner, 0..3)).prop_map(
            |(mut doc, children)| {
                for child in children {
                    doc.add_child(child);
                }
                doc
            },
        )
    })
}

fn path_segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9._~-]{1,12}"
}

fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec(path_segment(), 1..4).prop_map(|segments| {
        format!("/{}", segments.join("/"))
    })
}

fn header_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9-]{0,11}".prop_filter("reserved header", |name| {
        !name.eq_ignore_ascii_case("Content-Length") && !name.eq_ignore_ascii_case("Connection")
    })
}

proptest! {
    #[test]
    fn document_binary_roundtrip(doc in arb_document()) {
        let decoded = DataDocument::from_bytes(&doc.to_bytes()).unwrap();
        prop_assert_eq!(decoded, doc);
    }

    #[test]
    fn document_xml_roundtrip(doc in arb_document()) {
        let decoded = DataDocument::from_xml(&doc.to_xml()).unwrap();
        prop_assert_eq!(decoded, doc);
    }

    #[test]
    fn both_serializations_agree(doc in arb_document()) {
        let via_bytes = DataDocument::from_bytes(&doc.to_bytes()).unwrap();
        let via_xml = DataDocument::from_xml(&doc.to_xml()).unwrap();
        prop_assert_eq!(&via_bytes, &via_xml);
        prop_assert_eq!(via_bytes.checksum(), via_xml.checksum());
    }

    #[test]
    fn checksum_is_content_determined(doc in arb_document()) {
        // A clone is identical content with a different history.
        let copy = doc.clone();
        prop_assert_eq!(copy.checksum(), doc.checksum());
    }

    #[test]
    fn checksum_changes_on_appended_vector(doc in arb_document(), value in finite_f64()) {
        let before = doc.checksum();
        let mut edited = doc;
        edited.push_vector(vec![value]);
        prop_assert_ne!(edited.checksum(), before);
    }

    #[test]
    fn checksum_changes_on_appended_child(doc in arb_document()) {
        let before = doc.checksum();
        let mut edited = doc;
        edited.add_child(DataDocument::with_version(1));
        prop_assert_ne!(edited.checksum(), before);
    }

    #[test]
    fn checksum_changes_on_version_bump(doc in arb_document()) {
        let before = doc.checksum();
        let mut edited = doc;
        edited.set_version(edited.version().wrapping_add(1));
        prop_assert_ne!(edited.checksum(), before);
    }

    #[test]
    fn text_header_roundtrip(
        path in arb_path(),
        headers in prop::collection::vec((header_name(), "[a-zA-Z0-9]{0,16}"), 0..5),
        body_len in 0usize..256,
    ) {
        let body = vec![b'x'; body_len];
        let encoded = text::encode_request(Verb::Post, &path, &headers, &body);
        let parsed = parse_request_header(&encoded).unwrap().unwrap();

        prop_assert_eq!(parsed.verb, Verb::Post);
        prop_assert_eq!(&parsed.path, &path);
        prop_assert_eq!(parsed.content_length, Some(body_len as u64));
        // Every generated header survives with its value.
        for (name, value) in &headers {
            prop_assert!(parsed.header_values(name).any(|v| v == value));
        }
        // Header length is exactly where the body begins.
        prop_assert_eq!(&encoded[parsed.header_len..], &body[..]);
    }

    #[test]
    fn binary_header_roundtrip(
        path in arb_path(),
        query in prop::collection::vec(("[a-z]{1,6}", "[a-zA-Z0-9]{0,8}"), 0..3),
        headers in prop::collection::vec(("[A-Za-z-]{1,10}", arb_string(20)), 0..5),
        content_length in any::<u64>(),
    ) {
        let target = if query.is_empty() {
            path.clone()
        } else {
            let pairs: Vec<String> = query.iter().map(|(n, v)| format!("{}={}", n, v)).collect();
            format!("{}?{}", path, pairs.join("&"))
        };
        let encoded = binary::encode_request(Verb::Stream, &target, &headers, content_length);
        let parsed = parse_request_header(&encoded).unwrap().unwrap();

        prop_assert_eq!(&parsed.path, &path);
        prop_assert_eq!(parsed.content_length, Some(content_length));
        prop_assert_eq!(parsed.header_len, encoded.len());
        for (name, value) in &query {
            prop_assert!(parsed.query.iter().any(|(n, v)| n == name && v == value));
        }
        for (name, value) in &headers {
            prop_assert!(parsed.header_values(name).any(|v| v == value));
        }
    }

    #[test]
    fn arbitrary_bytes_never_panic_the_parsers(data in prop::collection::vec(any::<u8>(), 0..512)) {
        // Any outcome is fine except a panic.
        let _ = parse_request_header(&data);
        let _ = DataDocument::from_bytes(&data);
    }
}

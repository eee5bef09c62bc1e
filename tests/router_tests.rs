// Route table and dispatcher tests
//
// Template matching, query-constraint metadata semantics, the
// path → query → body → default binding precedence, required-parameter
// failures, and mime-negotiated response serialization.

use std::sync::Arc;

use portwire::constants::{
    CONTENT_TYPE_DOCUMENT, CONTENT_TYPE_DOCUMENT_XML, HEADER_ACCEPT,
};
use portwire::router::params::{ParamKind, ParamSchema, ParamValue};
use portwire::{DataDocument, RequestHeader, Router, TransportKind, Verb};

fn request(verb: Verb, target: &str) -> RequestHeader {
    request_with_headers(verb, target, &[])
}

fn request_with_headers(verb: Verb, target: &str, headers: &[(&str, &str)]) -> RequestHeader {
    let (path, query) = match target.split_once('?') {
        None => (target.to_string(), Vec::new()),
        Some((p, q)) => (
            p.to_string(),
            q.split('&')
                .map(|piece| {
                    let (n, v) = piece.split_once('=').unwrap_or((piece, ""));
                    (n.to_string(), v.to_string())
                })
                .collect(),
        ),
    };
    RequestHeader {
        kind: TransportKind::Http,
        verb,
        path,
        query,
        headers: headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect(),
        header_len: 0,
        content_length: None,
    }
}

fn echo_field(name: &'static str) -> (ParamSchema, impl Fn(ParamValue) -> portwire::router::HandlerFuture + Send + Sync) {
    let schema = ParamSchema::record()
        .field(name, ParamValue::Str(String::new()))
        .build();
    let handler = move |input: ParamValue| -> portwire::router::HandlerFuture {
        Box::pin(async move { Ok(input.field(name).cloned().unwrap()) })
    };
    (schema, handler)
}

#[tokio::test]
async fn capture_segment_binds_exactly_one_component() {
    let router = Router::new();
    let (schema, handler) = echo_field("x");
    router.bind("/test/{x}/hhh", Verb::Get).unwrap().to(schema, handler);

    let response = router.dispatch(&request(Verb::Get, "/test/abc/hhh"), b"").await;
    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], b"abc");

    // Too many or too few components must not match.
    assert_eq!(
        router.dispatch(&request(Verb::Get, "/test/a/b/hhh"), b"").await.status,
        404
    );
    assert_eq!(
        router.dispatch(&request(Verb::Get, "/test/hhh"), b"").await.status,
        404
    );
}

#[tokio::test]
async fn literal_segments_match_case_insensitively() {
    let router = Router::new();
    let (schema, handler) = echo_field("x");
    router.bind("/Test/{x}/HHH", Verb::Get).unwrap().to(schema, handler);

    let response = router.dispatch(&request(Verb::Get, "/test/v/hhh"), b"").await;
    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], b"v");
}

#[tokio::test]
async fn template_query_is_metadata_not_filter() {
    let router = Router::new();
    let schema = ParamSchema::record().field("x", ParamValue::Int(4)).build();
    router.bind("/funk?x=4", Verb::Get).unwrap().to(schema, |input| {
        Box::pin(async move { Ok(input.field("x").cloned().unwrap()) })
    });

    // The request's x=3 wins over the template's literal x=4.
    let response = router.dispatch(&request(Verb::Get, "/funk?x=3"), b"").await;
    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], b"3");

    // With no request value at all, the declared default applies.
    let response = router.dispatch(&request(Verb::Get, "/funk"), b"").await;
    assert_eq!(&response.body[..], b"4");
}

#[tokio::test]
async fn undeclared_query_values_surface_with_prefix() {
    let router = Router::new();
    let schema = ParamSchema::record()
        .field("query.extra", ParamValue::Str(String::new()))
        .build();
    router.bind("/plain", Verb::Get).unwrap().to(schema, |input| {
        Box::pin(async move { Ok(input.field("query.extra").cloned().unwrap()) })
    });

    let response = router
        .dispatch(&request(Verb::Get, "/plain?extra=surprise"), b"")
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], b"surprise");
}

#[tokio::test]
async fn path_capture_outranks_query_value() {
    let router = Router::new();
    let (schema, handler) = echo_field("x");
    router.bind("/pick/{x}?x=9", Verb::Get).unwrap().to(schema, handler);

    let response = router
        .dispatch(&request(Verb::Get, "/pick/from-path?x=from-query"), b"")
        .await;
    assert_eq!(&response.body[..], b"from-path");
}

#[tokio::test]
async fn missing_required_parameter_is_unprocessable() {
    let router = Router::new();
    let schema = ParamSchema::record().required("n", ParamKind::Int).build();
    router.bind("/need", Verb::Get).unwrap().to(schema, |input| {
        Box::pin(async move { Ok(input.field("n").cloned().unwrap()) })
    });

    let response = router.dispatch(&request(Verb::Get, "/need"), b"").await;
    assert_eq!(response.status, 422);

    let response = router.dispatch(&request(Verb::Get, "/need?n=12"), b"").await;
    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], b"12");
}

#[tokio::test]
async fn coercion_failure_is_unprocessable() {
    let router = Router::new();
    let schema = ParamSchema::record().field("n", ParamValue::Int(0)).build();
    router.bind("/coerce", Verb::Get).unwrap().to(schema, |input| {
        Box::pin(async move { Ok(input.field("n").cloned().unwrap()) })
    });

    let response = router
        .dispatch(&request(Verb::Get, "/coerce?n=not-a-number"), b"")
        .await;
    assert_eq!(response.status, 422);
}

#[tokio::test]
async fn body_fields_bind_when_bag_is_silent() {
    let router = Router::new();
    let schema = ParamSchema::record()
        .field("a", ParamValue::Int(0))
        .field("b", ParamValue::Str("default".into()))
        .build();
    router.bind("/form", Verb::Post).unwrap().to(schema, |input| {
        Box::pin(async move {
            Ok(ParamValue::Str(format!(
                "{}/{}",
                input.field("a").unwrap(),
                input.field("b").unwrap()
            )))
        })
    });

    let response = router
        .dispatch(&request(Verb::Post, "/form"), b"a=5&b=text")
        .await;
    assert_eq!(&response.body[..], b"5/text");
}

#[tokio::test]
async fn document_body_binds_and_serializes_back() {
    let router = Router::new();
    router
        .bind("/docs", Verb::Post)
        .unwrap()
        .to(ParamSchema::Document, |input| {
            Box::pin(async move {
                let mut doc = input.as_document().unwrap().clone();
                doc.set_property("seen", Some("yes"))?;
                Ok(ParamValue::Document(doc))
            })
        });

    let mut doc = DataDocument::with_version(1);
    doc.set_property("k", Some("v")).unwrap();

    // Binary in, binary out when the client accepts the document type.
    let header = request_with_headers(
        Verb::Post,
        "/docs",
        &[(HEADER_ACCEPT, CONTENT_TYPE_DOCUMENT)],
    );
    let response = router.dispatch(&header, &doc.to_bytes()).await;
    assert_eq!(response.status, 200);
    let returned = DataDocument::from_bytes(&response.body).unwrap();
    assert_eq!(returned.property("seen"), Some("yes"));

    // XML negotiation.
    let header = request_with_headers(
        Verb::Post,
        "/docs",
        &[(HEADER_ACCEPT, CONTENT_TYPE_DOCUMENT_XML)],
    );
    let response = router.dispatch(&header, &doc.to_bytes()).await;
    let text = std::str::from_utf8(&response.body).unwrap();
    let returned = DataDocument::from_xml(text).unwrap();
    assert_eq!(returned.property("k"), Some("v"));
}

#[tokio::test]
async fn remove_routes_matches_substring() {
    let router = Router::new();
    for path in ["/ml/train/{id}", "/ml/score/{id}"] {
        let (schema, handler) = echo_field("id");
        router.bind(path, Verb::Get).unwrap().to(schema, handler);
    }
    router.bind("/health", Verb::Get).unwrap().to(ParamSchema::Empty, |_| {
        Box::pin(async { Ok(ParamValue::Str("ok".into())) })
    });

    assert_eq!(router.remove_routes("/ml/"), 2);
    assert_eq!(router.route_count(), 1);
    assert_eq!(
        router.dispatch(&request(Verb::Get, "/health"), b"").await.status,
        200
    );
}

#[tokio::test]
async fn concurrent_bind_and_dispatch_never_block_each_other() {
    let router = Arc::new(Router::new());
    let (schema, handler) = echo_field("x");
    router.bind("/stable/{x}", Verb::Get).unwrap().to(schema, handler);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let router = router.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..100 {
                let response = router
                    .dispatch(&request(Verb::Get, "/stable/ok"), b"")
                    .await;
                assert_eq!(response.status, 200);
            }
        }));
    }
    for i in 0..100 {
        let (schema, handler) = echo_field("x");
        router
            .bind(&format!("/burst/{}/{{x}}", i), Verb::Get)
            .unwrap()
            .to(schema, handler);
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(router.route_count(), 101);
}

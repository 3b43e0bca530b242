use std::io::{Cursor, Read};

use wirebatch::{
    BatchError, HttpMethod, MediaType, PartsExtractor, decode_body, decode_request,
    extract_descriptors,
};

fn collect(body: &[u8], content_type: &str) -> Vec<Vec<u8>> {
    decode_body(content_type, body.to_vec())
        .expect("content type should parse")
        .map(|part| part.expect("part should extract").into_inner())
        .collect()
}

// =========================================================================
// Boundary extraction
// =========================================================================

#[test]
fn single_get_part() {
    let body = b"--b\r\nGET /items/1 HTTP/1.1\r\nAccept: application/json\r\n\r\n\r\n--b--\r\n";
    let descriptors =
        extract_descriptors("multipart/mixed; boundary=b", body).expect("should extract");
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].method, HttpMethod::GET);
    assert_eq!(descriptors[0].path_info, "/items/1");
    assert_eq!(descriptors[0].header("Accept"), Some("application/json"));
}

#[test]
fn parts_keep_their_bodies() {
    let body = concat!(
        "--batch_1\r\n",
        "POST /items HTTP/1.1\r\n",
        "Content-Type: application/json\r\n",
        "Content-ID: 1\r\n",
        "\r\n",
        "{\"name\":\"a\"}\r\n",
        "--batch_1\r\n",
        "GET /items/$1 HTTP/1.1\r\n",
        "\r\n",
        "\r\n",
        "--batch_1--\r\n",
    );
    let descriptors = extract_descriptors("multipart/mixed; boundary=\"batch_1\"", body.as_bytes())
        .expect("should extract");
    assert_eq!(descriptors.len(), 2);
    assert_eq!(descriptors[0].body_as_str(), Some("{\"name\":\"a\"}"));
    assert_eq!(descriptors[0].content_id(), Some("1"));
    assert_eq!(descriptors[1].uri, "/items/$1");
}

#[test]
fn preamble_and_epilogue_are_ignored() {
    let body = b"This is a multi-part message.\r\n--b\r\nfirst\r\n--b--\r\ntrailing words\r\n";
    let parts = collect(body, "multipart/mixed; boundary=b");
    assert_eq!(parts, vec![b"first".to_vec()]);
}

#[test]
fn boundary_text_inside_a_line_is_content() {
    let body = b"--b\r\nsee --b here\r\n--bb\r\n--b--\r\n";
    let parts = collect(body, "multipart/mixed; boundary=b");
    assert_eq!(parts, vec![b"see --b here\r\n--bb".to_vec()]);
}

#[test]
fn transport_padding_after_marker() {
    let body = b"--b   \r\nx\r\n--b-- \t\r\n";
    assert_eq!(collect(body, "multipart/mixed; boundary=b"), vec![b"x".to_vec()]);
}

#[test]
fn body_without_boundary_is_one_part() {
    let body = b"GET /items HTTP/1.1\r\n\r\n";
    let parts = collect(body, "multipart/mixed");
    assert_eq!(parts, vec![body.to_vec()]);
    let req = decode_request(&parts[0]).expect("should decode");
    assert_eq!(req.uri, "/items");
}

#[test]
fn unterminated_body_fails() {
    let body = b"--b\r\nGET / HTTP/1.1\r\n".to_vec();
    let mut parts = decode_body("multipart/mixed; boundary=b", body).unwrap();
    assert!(matches!(parts.next(), Some(Err(BatchError::MalformedRequest(_)))));
    assert!(parts.next().is_none());
}

#[test]
fn each_part_is_an_independent_stream() {
    let body = b"--b\r\nabc\r\n--b\r\ndef\r\n--b--\r\n".to_vec();
    let media_type = MediaType::parse("multipart/mixed; boundary=b").unwrap();
    let mut extractor = PartsExtractor::from_media_type(Cursor::new(body), &media_type);

    let mut first = extractor.next().unwrap().unwrap();
    let mut second = extractor.next().unwrap().unwrap();
    assert!(extractor.next().is_none());

    let mut s = String::new();
    second.read_to_string(&mut s).unwrap();
    first.read_to_string(&mut s).unwrap();
    assert_eq!(s, "defabc");
}

// =========================================================================
// Content-Type handling at the decode boundary
// =========================================================================

#[test]
fn malformed_parameters_are_unprocessable() {
    let err = decode_body("multipart/mixed; boundary", Vec::new()).err().unwrap();
    assert!(matches!(err, BatchError::Unprocessable(_)));
    assert_eq!(err.status_code(), 422);
}

#[test]
fn invalid_part_fails_decomposition() {
    let body = b"--b\r\nnot a request line\r\n--b--\r\n";
    let err = extract_descriptors("multipart/mixed; boundary=b", body).unwrap_err();
    assert!(matches!(err, BatchError::MalformedRequest(_)));
}

#[test]
fn unsupported_outer_type() {
    let err = extract_descriptors("text/plain", b"GET / HTTP/1.1\r\n\r\n").unwrap_err();
    assert!(matches!(err, BatchError::UnsupportedMediaType(_)));
    assert_eq!(err.status_code(), 415);
}

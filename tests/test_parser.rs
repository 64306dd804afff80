//! Tests for HTTP message framing

use switchboard::http::parser::{parse_request, parse_response, ParseError};
use switchboard::http::request::Method;

#[test]
fn test_parse_request_with_body() {
    let raw = b"POST /document HTTP/1.1\r\nHost: x\r\nContent-Length: 9\r\n\r\n{\"a\": 1}\n";

    let (request, consumed) = parse_request(raw).unwrap();

    assert_eq!(request.method, Method::POST);
    assert_eq!(request.path, "/document");
    assert_eq!(request.body, b"{\"a\": 1}\n");
    assert_eq!(consumed, raw.len());
}

#[test]
fn test_parse_request_splits_query() {
    let raw = b"GET /search?q=rust&page=2 HTTP/1.1\r\n\r\n";

    let (request, _) = parse_request(raw).unwrap();

    assert_eq!(request.path, "/search");
    assert_eq!(request.query, "q=rust&page=2");
}

#[test]
fn test_parse_request_incomplete_headers() {
    let raw = b"GET /ping HTTP/1.1\r\nHost: x\r\n";

    assert_eq!(parse_request(raw).unwrap_err(), ParseError::Incomplete);
}

#[test]
fn test_parse_request_incomplete_body() {
    let raw = b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";

    assert_eq!(parse_request(raw).unwrap_err(), ParseError::Incomplete);
}

#[test]
fn test_parse_request_rejects_bad_method() {
    let raw = b"BREW /pot HTTP/1.1\r\n\r\n";

    assert_eq!(parse_request(raw).unwrap_err(), ParseError::InvalidMethod);
}

#[test]
fn test_parse_pipelined_requests_consume_exactly_one() {
    let first = b"GET /a HTTP/1.1\r\n\r\n".to_vec();
    let mut raw = first.clone();
    raw.extend_from_slice(b"GET /b HTTP/1.1\r\n\r\n");

    let (request, consumed) = parse_request(&raw).unwrap();

    assert_eq!(request.path, "/a");
    assert_eq!(consumed, first.len());

    // the remainder frames the second request on its own
    let (second, _) = parse_request(&raw[consumed..]).unwrap();
    assert_eq!(second.path, "/b");
}

#[test]
fn test_parse_response_with_content_length() {
    let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nokay";

    let (response, consumed) = parse_response(raw, false).unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.reason, "OK");
    assert_eq!(response.body, b"okay");
    assert_eq!(consumed, raw.len());
}

#[test]
fn test_parse_response_chunked() {
    let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n5\r\npedia\r\n0\r\n\r\n";

    let (response, consumed) = parse_response(raw, false).unwrap();

    assert_eq!(response.body, b"wikipedia");
    assert_eq!(consumed, raw.len());
}

#[test]
fn test_parse_response_read_until_close() {
    let raw = b"HTTP/1.1 200 OK\r\n\r\npartial bytes";

    // without EOF the body length is unknown
    let (response, _) = parse_response(raw, false).unwrap();
    assert!(response.body.is_empty());

    // EOF completes the body with whatever arrived
    let (response, _) = parse_response(raw, true).unwrap();
    assert_eq!(response.body, b"partial bytes");
}

#[test]
fn test_parse_response_framing_headers_case_insensitive() {
    let raw = b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nhi";

    let (response, _) = parse_response(raw, false).unwrap();

    assert_eq!(response.body, b"hi");
}

use std::collections::HashMap;

use thiserror::Error;

use crate::http::request::Method;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed message")]
    InvalidMessage,
    #[error("invalid method")]
    InvalidMethod,
    #[error("invalid header")]
    InvalidHeader,
    #[error("invalid content length")]
    InvalidContentLength,
    #[error("invalid chunk")]
    InvalidChunk,
    #[error("incomplete")]
    Incomplete,
}

/// A framed inbound request: request line, headers, complete body.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub method: Method,
    /// Path with the query string stripped.
    pub path: String,
    pub query: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// A framed response, as read by a client-role connection.
#[derive(Debug, Clone)]
pub struct ResponseParts {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// How the message body is delimited.
enum BodyFraming {
    Length(usize),
    Chunked,
    None,
}

/// Try to frame one request from the front of `buf`.
///
/// Returns the parsed request and the number of bytes consumed, so a
/// pipelined follow-up request stays in the buffer. `Incomplete` means
/// read more bytes and try again.
pub fn parse_request(buf: &[u8]) -> Result<(RequestParts, usize), ParseError> {
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let header_bytes = &buf[..headers_end];

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidMessage)?;
    let mut lines = headers_str.split("\r\n");

    let request_line = lines.next().ok_or(ParseError::InvalidMessage)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidMessage)?;
    let target = parts.next().ok_or(ParseError::InvalidMessage)?;
    let version = parts.next().ok_or(ParseError::InvalidMessage)?;

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target.to_string(), String::new()),
    };

    let headers = parse_headers(lines)?;

    let body_start = headers_end + 4;
    let (body, body_len) = parse_body(&buf[body_start..], body_framing(&headers)?, false)?;

    let request = RequestParts {
        method,
        path,
        query,
        version: version.to_string(),
        headers,
        body,
    };

    Ok((request, body_start + body_len))
}

/// Try to frame one response from the front of `buf`.
///
/// `eof` signals that the peer closed the connection; a response with no
/// declared body length is then complete with whatever bytes arrived.
pub fn parse_response(buf: &[u8], eof: bool) -> Result<(ResponseParts, usize), ParseError> {
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let header_bytes = &buf[..headers_end];

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidMessage)?;
    let mut lines = headers_str.split("\r\n");

    let status_line = lines.next().ok_or(ParseError::InvalidMessage)?;
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next().ok_or(ParseError::InvalidMessage)?;
    let status: u16 = parts
        .next()
        .ok_or(ParseError::InvalidMessage)?
        .parse()
        .map_err(|_| ParseError::InvalidMessage)?;
    let reason = parts.next().unwrap_or("").to_string();

    let headers = parse_headers(lines)?;

    let body_start = headers_end + 4;
    let (body, body_len) = parse_body(&buf[body_start..], body_framing(&headers)?, eof)?;

    let response = ResponseParts {
        status,
        reason,
        headers,
        body,
    };

    Ok((response, body_start + body_len))
}

fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, String>, ParseError> {
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        headers.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

/// Case-insensitive header lookup, for framing headers only.
fn header_get<'a>(headers: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn body_framing(headers: &HashMap<String, String>) -> Result<BodyFraming, ParseError> {
    if let Some(te) = header_get(headers, "Transfer-Encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return Ok(BodyFraming::Chunked);
        }
    }
    match header_get(headers, "Content-Length") {
        Some(v) => {
            let n = v.parse().map_err(|_| ParseError::InvalidContentLength)?;
            Ok(BodyFraming::Length(n))
        }
        None => Ok(BodyFraming::None),
    }
}

/// Extract the body from `buf` (positioned just past the header block).
/// Returns the body bytes and how many buffer bytes they consumed.
fn parse_body(buf: &[u8], framing: BodyFraming, eof: bool) -> Result<(Vec<u8>, usize), ParseError> {
    match framing {
        BodyFraming::Length(n) => {
            if buf.len() < n {
                return Err(ParseError::Incomplete);
            }
            Ok((buf[..n].to_vec(), n))
        }
        BodyFraming::Chunked => parse_chunked(buf),
        BodyFraming::None => {
            if eof {
                // read-until-close body
                Ok((buf.to_vec(), buf.len()))
            } else {
                Ok((Vec::new(), 0))
            }
        }
    }
}

/// Decode a chunked body: size-line, data, CRLF, repeated; a zero-size
/// chunk terminates, optionally followed by trailer lines.
fn parse_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let mut body = Vec::new();
    let mut pos = 0;
    loop {
        let line_end = find_crlf(&buf[pos..]).ok_or(ParseError::Incomplete)?;
        let size_line = std::str::from_utf8(&buf[pos..pos + line_end])
            .map_err(|_| ParseError::InvalidChunk)?;
        // chunk extensions after ';' are ignored
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunk)?;
        pos += line_end + 2;

        if size == 0 {
            loop {
                let trailer_end = find_crlf(&buf[pos..]).ok_or(ParseError::Incomplete)?;
                pos += trailer_end + 2;
                if trailer_end == 0 {
                    return Ok((body, pos));
                }
            }
        }

        if buf.len() < pos + size + 2 {
            return Err(ParseError::Incomplete);
        }
        body.extend_from_slice(&buf[pos..pos + size]);
        if &buf[pos + size..pos + size + 2] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }
        pos += size + 2;
    }
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET /ping?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_request(req).unwrap();

        assert_eq!(parsed.path, "/ping");
        assert_eq!(parsed.query, "x=1");
        assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn parse_chunked_body() {
        let req = b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";

        let (parsed, consumed) = parse_request(req).unwrap();

        assert_eq!(parsed.body, b"hello");
        assert_eq!(consumed, req.len());
    }
}

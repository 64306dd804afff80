use std::collections::HashMap;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::http::request::Method;
use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::new();

    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(&resp.body);

    buf
}

/// Serialize an outbound request. Host, Content-Length and
/// Connection: close are set here; `target` carries path plus any query.
pub fn serialize_request(
    method: Method,
    target: &str,
    host: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::new();

    let target = if target.is_empty() { "/" } else { target };
    buf.extend_from_slice(format!("{} {} {}\r\n", method.as_str(), target, HTTP_VERSION).as_bytes());

    let mut headers = headers.clone();
    headers.insert("Host".to_string(), host.to_string());
    headers.insert("Connection".to_string(), "close".to_string());
    headers.insert("Content-Length".to_string(), body.len().to_string());

    for (key, value) in &headers {
        buf.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
    }

    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(body);

    buf
}

/// Buffered writer that survives partial writes; the unsent tail stays
/// buffered for the next writable moment.
pub struct MessageWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl MessageWriter {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer, written: 0 }
    }

    pub fn response(response: &Response) -> Self {
        Self::new(serialize_response(response))
    }

    pub async fn write_to_stream(&mut self, stream: &mut TcpStream) -> anyhow::Result<()> {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            self.written += n;
        }

        Ok(())
    }
}

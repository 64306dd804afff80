//! Client-role connection: drives one outbound HTTP exchange and
//! resolves the caller's continuation with the evaluated result.

use std::time::Duration;

use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::call::{Callback, Outcome};
use crate::http::connection::next_connection_id;
use crate::http::parser::{self, ParseError};
use crate::http::request::Method;
use crate::http::writer::{serialize_request, MessageWriter};

const READ_CHUNK: usize = 8 * 1024;

/// A fully assembled outbound request, ready to send. Built by
/// [`ResourceCall::build_request`](crate::outbound::ResourceCall::build_request)
/// with no I/O, so argument handling is testable in isolation.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// `host:port` to connect to.
    pub addr: String,
    /// Host header value.
    pub host: String,
    /// Path plus any query string.
    pub target: String,
    pub headers: std::collections::HashMap<String, String>,
    pub body: Vec<u8>,
    pub is_json: bool,
    pub trace: bool,
    pub timeout: Duration,
}

enum ClientState {
    Connecting,
    Sending(TcpStream),
    Receiving(TcpStream),
    Closing(Option<TcpStream>, Result<Value, String>),
    Closed(Result<Value, String>),
}

/// Start the exchange. Returns immediately; `callback` resolves exactly
/// once, with `Error("timeout")` if the whole exchange outlives the
/// request deadline. Must run on a reactor thread.
pub fn start(request: OutboundRequest, callback: Callback) {
    let deadline = request.timeout;
    tokio::task::spawn_local(async move {
        let connection = ClientConnection::new(request);
        let outcome = match tokio::time::timeout(deadline, connection.run()).await {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(message)) => Outcome::Error(message),
            Err(_) => Outcome::Error("timeout".to_string()),
        };
        callback(outcome);
    });
}

struct ClientConnection {
    cid: u64,
    request: OutboundRequest,
    buffer: BytesMut,
}

impl ClientConnection {
    fn new(request: OutboundRequest) -> Self {
        Self {
            cid: next_connection_id(),
            request,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    async fn run(mut self) -> Result<Value, String> {
        let mut state = ClientState::Connecting;
        loop {
            state = match state {
                ClientState::Connecting => match TcpStream::connect(&self.request.addr).await {
                    Ok(stream) => {
                        if self.request.trace {
                            debug!(cid = self.cid, addr = %self.request.addr, "connected");
                        }
                        ClientState::Sending(stream)
                    }
                    Err(e) => ClientState::Closing(
                        None,
                        Err(format!("failed to connect to {}: {}", self.request.addr, e)),
                    ),
                },
                ClientState::Sending(mut stream) => {
                    if self.request.trace {
                        debug!(
                            cid = self.cid,
                            method = %self.request.method.as_str(),
                            target = %self.request.target,
                            "outbound request"
                        );
                    }
                    let bytes = serialize_request(
                        self.request.method,
                        &self.request.target,
                        &self.request.host,
                        &self.request.headers,
                        &self.request.body,
                    );
                    let mut writer = MessageWriter::new(bytes);
                    match writer.write_to_stream(&mut stream).await {
                        Ok(()) => ClientState::Receiving(stream),
                        Err(e) => {
                            ClientState::Closing(Some(stream), Err(format!("send failed: {}", e)))
                        }
                    }
                }
                ClientState::Receiving(mut stream) => {
                    let result = self.read_response(&mut stream).await;
                    ClientState::Closing(Some(stream), result)
                }
                ClientState::Closing(stream, result) => {
                    if let Some(mut stream) = stream {
                        let _ = stream.shutdown().await;
                    }
                    if self.request.trace {
                        debug!(cid = self.cid, ok = result.is_ok(), "closed");
                    }
                    ClientState::Closed(result)
                }
                ClientState::Closed(result) => return result,
            };
        }
    }

    async fn read_response(&mut self, stream: &mut TcpStream) -> Result<Value, String> {
        let mut eof = false;
        loop {
            match parser::parse_response(&self.buffer, eof) {
                Ok((response, _consumed)) => return self.evaluate(response),
                Err(ParseError::Incomplete) if !eof => {
                    let n = stream
                        .read_buf(&mut self.buffer)
                        .await
                        .map_err(|e| format!("read failed: {}", e))?;
                    if n == 0 {
                        eof = true;
                    }
                }
                Err(ParseError::Incomplete) => {
                    return Err("peer closed mid-response".to_string());
                }
                Err(e) => return Err(format!("malformed response: {}", e)),
            }
        }
    }

    /// Map the wire response onto the two-value outcome: non-2xx is an
    /// error carrying the body text (or the reason phrase when the body
    /// is empty); an empty 2xx body is the null result.
    fn evaluate(&self, response: parser::ResponseParts) -> Result<Value, String> {
        if self.request.trace {
            debug!(
                cid = self.cid,
                status = response.status,
                bytes = response.body.len(),
                "outbound response"
            );
        }

        if !(200..300).contains(&response.status) {
            let message = if response.body.is_empty() {
                if response.reason.is_empty() {
                    format!("status {}", response.status)
                } else {
                    response.reason
                }
            } else {
                String::from_utf8_lossy(&response.body).into_owned()
            };
            return Err(message);
        }

        if response.body.is_empty() {
            return Ok(Value::Null);
        }

        if self.request.is_json {
            serde_json::from_slice(&response.body).map_err(|e| format!("invalid json: {}", e))
        } else {
            Ok(Value::String(
                String::from_utf8_lossy(&response.body).into_owned(),
            ))
        }
    }
}

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use crate::http::parser::{ParseError, RequestParts, parse_request};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::MessageWriter;
use crate::router::Router;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection id, shared between server and client roles,
/// used in log lines.
pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A server-role connection. Starts at `Established` (post-accept).
pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    state: ConnectionState,
    cid: u64,
    router: Rc<Router>,
    idle_timeout: Duration,
}

pub enum ConnectionState {
    Established,
    Receiving,
    Dispatching(RequestParts),
    // bool = keep_alive
    Sending(oneshot::Receiver<Response>, bool),
    Closing,
    Closed,
}

impl Connection {
    pub fn new(stream: TcpStream, router: Rc<Router>, idle_timeout: Duration) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Established,
            cid: next_connection_id(),
            router,
            idle_timeout,
        }
    }

    pub fn id(&self) -> u64 {
        self.cid
    }

    /// Drive the state machine until the connection closes. The caller
    /// logs errors; by then any pending continuation has already been
    /// failed through its dropped reply slot.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            // take the state so message-carrying variants move cleanly
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Established => {
                    self.state = ConnectionState::Receiving;
                }

                ConnectionState::Receiving => {
                    match self.read_request().await? {
                        Some(parts) => {
                            self.state = ConnectionState::Dispatching(parts);
                        }
                        None => {
                            // peer closed, or idle timeout
                            self.state = ConnectionState::Closing;
                        }
                    }
                }

                ConnectionState::Dispatching(parts) => {
                    let (request, reply_rx) = Request::new(parts, self.cid);
                    let keep_alive = request.keep_alive();
                    tracing::info!(
                        cid = self.cid,
                        rid = request.request_id(),
                        method = request.method().as_str(),
                        path = %request.path(),
                        "request"
                    );
                    self.router.dispatch(request);
                    self.state = ConnectionState::Sending(reply_rx, keep_alive);
                }

                ConnectionState::Sending(reply_rx, keep_alive) => {
                    // other connection drivers keep running while this
                    // await is parked on a delayed response
                    let response = match reply_rx.await {
                        Ok(response) => response,
                        Err(_) => {
                            tracing::error!(cid = self.cid, "response slot dropped unresolved");
                            Response::internal_error()
                        }
                    };
                    tracing::info!(
                        cid = self.cid,
                        status = response.status.as_u16(),
                        "response"
                    );
                    let mut writer = MessageWriter::response(&response);
                    writer.write_to_stream(&mut self.stream).await?;

                    self.state = if keep_alive {
                        ConnectionState::Receiving
                    } else {
                        ConnectionState::Closing
                    };
                }

                ConnectionState::Closing => {
                    let _ = self.stream.shutdown().await;
                    self.state = ConnectionState::Closed;
                }

                ConnectionState::Closed => break,
            }
        }

        tracing::debug!(cid = self.cid, "closed");
        Ok(())
    }

    /// Read until one complete request is framed. `None` means the peer
    /// closed cleanly or the connection idled out between messages.
    async fn read_request(&mut self) -> anyhow::Result<Option<RequestParts>> {
        loop {
            match parse_request(&self.buffer) {
                Ok((parts, consumed)) => {
                    self.buffer.advance(consumed);
                    return Ok(Some(parts));
                }
                Err(ParseError::Incomplete) => {}
                Err(e) => {
                    return Err(anyhow::anyhow!("framing error: {}", e));
                }
            }

            // the idle timeout applies only between messages, not in the
            // middle of a partially received one
            let n = if self.buffer.is_empty() {
                match tokio::time::timeout(self.idle_timeout, self.stream.read_buf(&mut self.buffer))
                    .await
                {
                    Ok(read) => read?,
                    Err(_) => {
                        tracing::debug!(cid = self.cid, "idle timeout");
                        return Ok(None);
                    }
                }
            } else {
                self.stream.read_buf(&mut self.buffer).await?
            };

            if n == 0 {
                if !self.buffer.is_empty() {
                    return Err(anyhow::anyhow!("peer closed mid-message"));
                }
                return Ok(None);
            }
        }
    }
}

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::call::{Call, Callable, Caller};
use crate::http::parser::RequestParts;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from its wire form (case-sensitive,
    /// uppercase).
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

struct RequestInner {
    parts: RequestParts,
    cid: u64,
    rid: u64,
    delayed: bool,
    responded: bool,
    reply: Option<oneshot::Sender<Response>>,
}

/// An inbound request as seen by handler code.
///
/// Cloning shares the same underlying state, so a request captured by a
/// continuation refers to the same response slot as the one the handler
/// received. Exactly one response goes out per request: the `responded`
/// flag is the single authority, checked on every exit path, and a
/// second `respond` is logged and dropped.
#[derive(Clone)]
pub struct Request {
    inner: Rc<RefCell<RequestInner>>,
}

impl Request {
    /// Wraps a parsed request, returning the handle and the slot the
    /// owning connection awaits for the response.
    pub fn new(parts: RequestParts, cid: u64) -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let rid = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let request = Self {
            inner: Rc::new(RefCell::new(RequestInner {
                parts,
                cid,
                rid,
                delayed: false,
                responded: false,
                reply: Some(tx),
            })),
        };
        (request, rx)
    }

    pub fn method(&self) -> Method {
        self.inner.borrow().parts.method
    }

    pub fn path(&self) -> String {
        self.inner.borrow().parts.path.clone()
    }

    pub fn query(&self) -> String {
        self.inner.borrow().parts.query.clone()
    }

    pub fn header(&self, key: &str) -> Option<String> {
        self.inner.borrow().parts.headers.get(key).cloned()
    }

    pub fn body(&self) -> Vec<u8> {
        self.inner.borrow().parts.body.clone()
    }

    /// The request body decoded as JSON; null for an empty body.
    pub fn json(&self) -> anyhow::Result<Value> {
        let inner = self.inner.borrow();
        if inner.parts.body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&inner.parts.body)?)
    }

    /// Whether the connection should remain open after the response.
    /// HTTP/1.1 defaults to keep-alive.
    pub fn keep_alive(&self) -> bool {
        self.header("Connection")
            .map(|v| v.eq_ignore_ascii_case("keep-alive"))
            .unwrap_or(true)
    }

    pub fn connection_id(&self) -> u64 {
        self.inner.borrow().cid
    }

    pub fn request_id(&self) -> u64 {
        self.inner.borrow().rid
    }

    pub fn is_delayed(&self) -> bool {
        self.inner.borrow().delayed
    }

    pub fn has_responded(&self) -> bool {
        self.inner.borrow().responded
    }

    /// Start a chained async step whose resolution replies to this
    /// request.
    pub fn call(&self, callable: Callable) -> Call<Request> {
        Call::new(self.clone(), callable)
    }

    /// Send the reply. A JSON body when given, empty otherwise. No-op
    /// (with a warning) if a response already went out.
    pub fn respond(&self, status: StatusCode, body: Option<&Value>) {
        let mut inner = self.inner.borrow_mut();
        if inner.responded {
            tracing::warn!(
                cid = inner.cid,
                rid = inner.rid,
                status = status.as_u16(),
                "response already sent, dropping duplicate"
            );
            return;
        }
        inner.responded = true;

        let builder = ResponseBuilder::new(status);
        let response = match body {
            Some(value) => builder.json(value).build(),
            None => builder.build(),
        };

        match inner.reply.take() {
            Some(tx) => {
                if tx.send(response).is_err() {
                    tracing::debug!(cid = inner.cid, rid = inner.rid, "connection gone, reply dropped");
                }
            }
            None => tracing::warn!(cid = inner.cid, rid = inner.rid, "reply slot missing"),
        }
    }
}

impl Caller for Request {
    fn mark_delayed(&self) {
        self.inner.borrow_mut().delayed = true;
    }

    fn identity(&self) -> String {
        let inner = self.inner.borrow();
        format!("cid={} rid={}", inner.cid, inner.rid)
    }

    fn deliver_success(&self, code: u16, result: Value) {
        let body = if result.is_null() { None } else { Some(result) };
        self.respond(StatusCode::from_u16(code), body.as_ref());
    }

    fn deliver_error(&self, _message: &str) {
        // internals never leak to the peer
        self.respond(StatusCode::InternalServerError, None);
    }

    fn deliver_not_found(&self) {
        self.respond(StatusCode::NotFound, None);
    }
}

//! Named outbound connection definitions and resource templates.
//!
//! A `ConnectionDef` binds a name to a base URL; each of its `Resource`s
//! is a parameterized call template: a path with `{name}` placeholders,
//! an ordered list of REQUIRED parameter names, OPTIONAL names with
//! defaults, and per-resource flags. Invoking a resource resolves its
//! arguments first — argument errors surface before any I/O — then
//! starts a client-role connection bound to the caller's continuation.

pub mod client;

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use serde_json::{Map, Value};
use url::Url;

use crate::call::{Callable, Callback, Outcome, PendingReply};
use crate::error::{ArgumentError, RegistryError};
use crate::http::request::Method;
use crate::outbound::client::OutboundRequest;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A named outbound call template. Immutable after configuration load.
#[derive(Debug)]
pub struct Resource {
    pub name: String,
    pub path: String,
    pub method: Method,
    pub is_json: bool,
    pub trace: bool,
    pub timeout: Option<Duration>,
    placeholders: Vec<String>,
    headers: HashMap<String, String>,
    required: Vec<String>,
    optional: Vec<(String, Value)>,
}

impl Resource {
    pub fn new(name: &str, path: &str, method: Method) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            method,
            is_json: true,
            trace: false,
            timeout: None,
            placeholders: extract_placeholders(path),
            headers: HashMap::new(),
            required: Vec::new(),
            optional: Vec::new(),
        }
    }

    /// Header sent with this resource, overriding the connection's
    /// default for the same key.
    pub fn header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_string(), value.to_string());
    }

    /// Append a REQUIRED parameter; declaration order is fill order.
    pub fn required(&mut self, name: &str) {
        self.required.push(name.to_string());
    }

    /// Append an OPTIONAL parameter with its default.
    pub fn optional(&mut self, name: &str, default: Value) {
        self.optional.push((name.to_string(), default));
    }

    /// Resolve an invocation into a final path and parameter set.
    ///
    /// Positional arguments substitute path placeholders left to right,
    /// then satisfy REQUIRED names in declared order (a keyword may
    /// stand in); OPTIONAL names take a keyword if present, else the
    /// declared default. Surplus arguments are an error, missing ones
    /// never default silently.
    pub fn resolve(
        &self,
        args: Vec<Value>,
        kwargs: HashMap<String, Value>,
    ) -> Result<ResolvedCall, ArgumentError> {
        let mut positional = args.into_iter();
        let mut kwargs = kwargs;

        let mut path = self.path.clone();
        for name in &self.placeholders {
            let value = positional
                .next()
                .ok_or_else(|| ArgumentError::MissingPathParam(name.clone()))?;
            // one occurrence per positional, so a repeated placeholder
            // name consumes one argument for each appearance
            path = path.replacen(&format!("{{{}}}", name), &path_segment(&value), 1);
        }

        let mut params = Map::new();
        for name in &self.required {
            let value = positional
                .next()
                .or_else(|| kwargs.remove(name))
                .ok_or_else(|| ArgumentError::MissingRequired(name.clone()))?;
            params.insert(name.clone(), value);
        }

        for (name, default) in &self.optional {
            let value = kwargs.remove(name).unwrap_or_else(|| default.clone());
            params.insert(name.clone(), value);
        }

        if positional.next().is_some() {
            return Err(ArgumentError::UnexpectedPositional);
        }
        if let Some(name) = kwargs.into_keys().next() {
            return Err(ArgumentError::UnexpectedKeyword(name));
        }

        Ok(ResolvedCall { path, params })
    }
}

/// The outcome of argument resolution: the substituted path and the
/// merged parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCall {
    pub path: String,
    pub params: Map<String, Value>,
}

/// A named outbound connection definition with its resource templates.
#[derive(Debug)]
pub struct ConnectionDef {
    pub name: String,
    pub base_url: Url,
    pub timeout: Duration,
    headers: HashMap<String, String>,
    resources: HashMap<String, Rc<Resource>>,
}

impl ConnectionDef {
    pub fn new(name: &str, base_url: Url) -> Self {
        Self {
            name: name.to_string(),
            base_url,
            timeout: DEFAULT_TIMEOUT,
            headers: HashMap::new(),
            resources: HashMap::new(),
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Default header sent on every resource of this connection.
    pub fn header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_string(), value.to_string());
    }

    pub fn add_resource(&mut self, resource: Resource) {
        self.resources.insert(resource.name.clone(), Rc::new(resource));
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }
}

/// Registry of outbound connection definitions, keyed by name.
#[derive(Default)]
pub struct Registry {
    connections: HashMap<String, Rc<ConnectionDef>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, def: ConnectionDef) {
        self.connections.insert(def.name.clone(), Rc::new(def));
    }

    /// Look up `connection.resource`, yielding an invocable handle.
    pub fn resource(&self, connection: &str, resource: &str) -> Result<ResourceCall, RegistryError> {
        let def = self
            .connections
            .get(connection)
            .ok_or_else(|| RegistryError::UnknownConnection(connection.to_string()))?;
        let res = def.resources.get(resource).ok_or_else(|| {
            RegistryError::UnknownResource(connection.to_string(), resource.to_string())
        })?;
        Ok(ResourceCall {
            conn: def.clone(),
            resource: res.clone(),
        })
    }
}

/// An invocable `connection.resource` pair. Invocation returns
/// immediately with a client-role connection in `Connecting` state bound
/// to the supplied continuation.
#[derive(Debug, Clone)]
pub struct ResourceCall {
    conn: Rc<ConnectionDef>,
    resource: Rc<Resource>,
}

impl ResourceCall {
    /// Argument resolution and request assembly, with no I/O. Resolved
    /// parameters become the JSON body for POST/PUT and the query string
    /// otherwise.
    pub fn build_request(
        &self,
        args: Vec<Value>,
        kwargs: HashMap<String, Value>,
    ) -> Result<OutboundRequest, ArgumentError> {
        let resolved = self.resource.resolve(args, kwargs)?;

        let base = &self.conn.base_url;
        let host = base.host_str().unwrap_or("localhost").to_string();
        let port = base.port_or_known_default().unwrap_or(80);
        let host_header = match base.port() {
            Some(p) => format!("{}:{}", host, p),
            None => host.clone(),
        };

        let base_path = base.path();
        let mut target = if base_path == "/" {
            resolved.path.clone()
        } else {
            format!("{}{}", base_path.trim_end_matches('/'), resolved.path)
        };

        let mut headers = self.conn.headers.clone();
        for (key, value) in &self.resource.headers {
            headers.insert(key.clone(), value.clone());
        }
        let mut body = Vec::new();

        match self.resource.method {
            Method::POST | Method::PUT | Method::PATCH => {
                if !resolved.params.is_empty() {
                    body = serde_json::to_vec(&Value::Object(resolved.params))
                        .unwrap_or_else(|_| b"{}".to_vec());
                    headers.insert(
                        "Content-Type".to_string(),
                        "application/json; charset=utf-8".to_string(),
                    );
                }
            }
            _ => {
                if !resolved.params.is_empty() {
                    target = format!("{}?{}", target, query_string(&resolved.params));
                }
            }
        }

        Ok(OutboundRequest {
            method: self.resource.method,
            addr: format!("{}:{}", host, port),
            host: host_header,
            target,
            headers,
            body,
            is_json: self.resource.is_json,
            trace: self.resource.trace,
            timeout: self.resource.timeout.unwrap_or(self.conn.timeout),
        })
    }

    /// Invoke the resource, resolving `callback` when the response is
    /// fully received or the connection fails. Argument errors resolve
    /// the continuation immediately, before any network I/O.
    pub fn start(&self, args: Vec<Value>, kwargs: HashMap<String, Value>, callback: Callback) {
        match self.build_request(args, kwargs) {
            Ok(request) => client::start(request, callback),
            Err(e) => {
                tracing::warn!(
                    connection = %self.conn.name,
                    resource = %self.resource.name,
                    error = %e,
                    "argument error"
                );
                callback(Outcome::Error(e.to_string()));
            }
        }
    }

    /// Adapt the resource to the async-callable contract, taking its
    /// arguments from the dispatched [`CallArgs`](crate::call::CallArgs).
    pub fn callable(&self) -> Callable {
        let this = self.clone();
        Callable::with_callback(move |callback, call_args| {
            this.start(call_args.args, call_args.kwargs, callback);
        })
    }

    /// Invoke and get an awaitable continuation, for `Reactor::wait`.
    pub fn pending(&self, args: Vec<Value>, kwargs: HashMap<String, Value>) -> PendingReply {
        let (pending, callback) = PendingReply::new();
        self.start(args, kwargs, callback);
        pending
    }
}

fn extract_placeholders(path: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        if c == '{' {
            let mut name = String::new();
            for n in chars.by_ref() {
                if n == '}' {
                    break;
                }
                name.push(n);
            }
            names.push(name);
        }
    }
    names
}

/// Bare JSON scalars render without quotes in a path segment.
fn path_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn query_string(params: &Map<String, Value>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        serializer.append_pair(key, &rendered);
    }
    serializer.finish()
}

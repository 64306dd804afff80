//! Inbound path-to-handler dispatch.
//!
//! Routes are evaluated top-to-bottom in declaration order; the first
//! pattern matching the path wins. Patterns are anchored at the start,
//! accept `{name}` placeholders (compiled to named capture groups) and
//! raw regex syntax, and honor a trailing `$`. Captures are handed to
//! the handler as leading positional values in left-to-right order.

use std::collections::HashMap;
use std::rc::Rc;

use regex::Regex;
use serde_json::Value;

use crate::error::RoutingError;
use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;

/// What a handler produced: an immediate JSON reply, or a promise that a
/// `call` chain (or stored request) will reply later.
pub enum HandlerResult {
    Reply(Value),
    Delayed,
}

/// Handler contract: the request handle, path captures in pattern order,
/// then keyword values. An `Err` is caught at the dispatch boundary.
pub type Handler =
    Rc<dyn Fn(Request, Vec<Value>, HashMap<String, Value>) -> anyhow::Result<HandlerResult>>;

pub struct Route {
    pattern: Regex,
    raw: String,
    methods: HashMap<Method, Handler>,
}

impl Route {
    pub fn set(&mut self, method: Method, handler: Handler) {
        self.methods.insert(method, handler);
    }

    pub fn pattern(&self) -> &str {
        &self.raw
    }
}

#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Append a route; later method bindings attach to it. Declaration
    /// order is match order.
    pub fn add_route(&mut self, pattern: &str) -> Result<&mut Route, regex::Error> {
        let compiled = compile_pattern(pattern)?;
        self.routes.push(Route {
            pattern: compiled,
            raw: pattern.to_string(),
            methods: HashMap::new(),
        });
        let idx = self.routes.len() - 1;
        Ok(&mut self.routes[idx])
    }

    /// First-match-wins resolution of `(path, method)` to a handler and
    /// its path captures.
    pub fn resolve(&self, path: &str, method: Method) -> Result<(Handler, Vec<Value>), RoutingError> {
        for route in &self.routes {
            if let Some(caps) = route.pattern.captures(path) {
                let handler = route
                    .methods
                    .get(&method)
                    .ok_or(RoutingError::MethodNotAllowed)?
                    .clone();
                let groups = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| Value::String(m.as_str().to_string()))
                    .collect();
                return Ok((handler, groups));
            }
        }
        Err(RoutingError::NotFound)
    }

    /// Dispatch an inbound request. Every path out of here leaves the
    /// request either responded or delayed with a live continuation.
    pub fn dispatch(&self, request: Request) {
        match self.resolve(&request.path(), request.method()) {
            Ok((handler, groups)) => {
                match handler(request.clone(), groups, HashMap::new()) {
                    Ok(HandlerResult::Reply(value)) => {
                        request.respond(StatusCode::Ok, Some(&value));
                    }
                    Ok(HandlerResult::Delayed) => {
                        if !request.is_delayed() && !request.has_responded() {
                            tracing::warn!(
                                cid = request.connection_id(),
                                rid = request.request_id(),
                                "handler returned Delayed without starting a call"
                            );
                        }
                    }
                    Err(e) => {
                        // handler failures never propagate past here and
                        // never leak internals to the peer
                        tracing::error!(
                            cid = request.connection_id(),
                            rid = request.request_id(),
                            error = %e,
                            "handler failed"
                        );
                        request.respond(StatusCode::InternalServerError, None);
                    }
                }
            }
            Err(RoutingError::MethodNotAllowed) => {
                request.respond(StatusCode::MethodNotAllowed, None);
            }
            Err(RoutingError::NotFound) => {
                tracing::warn!(
                    cid = request.connection_id(),
                    method = request.method().as_str(),
                    path = %request.path(),
                    "no match"
                );
                request.respond(StatusCode::NotFound, None);
            }
        }
    }
}

/// Compile a route pattern: anchor at the start and turn each `{name}`
/// placeholder into a named capture matching one path segment. Regex
/// metacharacters in the pattern keep their regex meaning.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut src = String::with_capacity(pattern.len() + 8);
    src.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '{' {
            let mut name = String::new();
            for n in chars.by_ref() {
                if n == '}' {
                    break;
                }
                name.push(n);
            }
            src.push_str(&format!("(?P<{}>[^/]+)", name));
        } else {
            src.push(c);
        }
    }

    Regex::new(&src)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_placeholders_capture_segments() {
        let re = compile_pattern("/posts/{id}/comments/{cid}$").unwrap();
        let caps = re.captures("/posts/12/comments/7").unwrap();
        assert_eq!(&caps["id"], "12");
        assert_eq!(&caps["cid"], "7");
        assert!(re.captures("/posts/12").is_none());
    }

    #[test]
    fn patterns_are_start_anchored() {
        let re = compile_pattern("/ping$").unwrap();
        assert!(re.captures("/ping").is_some());
        assert!(re.captures("/x/ping").is_none());
    }
}

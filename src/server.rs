//! Wires a parsed [`Config`] to live listeners on a reactor.
//!
//! Handlers are registered by name before start; a route naming a
//! handler nobody registered fails the start, not the first request.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use serde_json::Value;

use crate::config::{Config, ServerSpec};
use crate::error::ConfigError;
use crate::http::connection::Connection;
use crate::http::request::Request;
use crate::outbound::{ConnectionDef, Registry, Resource};
use crate::reactor::Reactor;
use crate::router::{Handler, HandlerResult, Router};

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Named request handlers, bound to routes by the configuration.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(Request, Vec<Value>, HashMap<String, Value>) -> anyhow::Result<HandlerResult>
            + 'static,
    {
        self.handlers.insert(name.to_string(), Rc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).cloned()
    }
}

/// Build one server's route table, resolving handler names.
pub fn build_router(spec: &ServerSpec, handlers: &HandlerRegistry) -> Result<Router, ConfigError> {
    let mut router = Router::new();
    for route_spec in &spec.routes {
        let route = router
            .add_route(&route_spec.pattern)
            .map_err(|e| ConfigError::InvalidPattern {
                line: route_spec.line,
                reason: e.to_string(),
            })?;
        for (method, handler_name) in &route_spec.methods {
            let handler = handlers
                .get(handler_name)
                .ok_or_else(|| ConfigError::UnresolvedHandler(handler_name.clone()))?;
            route.set(*method, handler);
        }
    }
    Ok(router)
}

/// Build the outbound registry from the configured connections.
pub fn build_registry(config: &Config) -> Registry {
    let mut registry = Registry::new();
    for spec in &config.connections {
        let mut def = ConnectionDef::new(&spec.name, spec.url.clone());
        def.set_timeout(spec.timeout);
        for (key, value) in &spec.headers {
            def.header(key, value);
        }
        for res in &spec.resources {
            let mut resource = Resource::new(&res.name, &res.path, res.method);
            resource.is_json = res.is_json;
            resource.trace = res.trace;
            resource.timeout = res.timeout;
            for (key, value) in &res.headers {
                resource.header(key, value);
            }
            for name in &res.required {
                resource.required(name);
            }
            for (name, default) in &res.optional {
                resource.optional(name, Value::String(default.clone()));
            }
            def.add_resource(resource);
        }
        registry.add(def);
    }
    registry
}

/// Bind every configured server and register its accept loop. Returns
/// the bound addresses in configuration order; a configured port of 0
/// binds an ephemeral port.
pub fn start(
    reactor: &Reactor,
    config: &Config,
    handlers: &HandlerRegistry,
) -> anyhow::Result<Vec<SocketAddr>> {
    let mut addrs = Vec::with_capacity(config.servers.len());
    for spec in &config.servers {
        let router = Rc::new(build_router(spec, handlers)?);
        let listener = reactor.wait(TcpListener::bind(("0.0.0.0", spec.port)))?;
        let addr = listener.local_addr()?;
        info!(server = %spec.name, %addr, "listening");
        addrs.push(addr);

        let name = spec.name.clone();
        reactor.register(accept_loop(name, listener, router));
    }
    Ok(addrs)
}

async fn accept_loop(name: String, listener: TcpListener, router: Rc<Router>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                spawn_connection(&name, stream, peer, router.clone());
            }
            Err(e) => {
                error!(server = %name, error = %e, "accept failed");
            }
        }
    }
}

fn spawn_connection(name: &str, stream: TcpStream, peer: SocketAddr, router: Rc<Router>) {
    let connection = Connection::new(stream, router, IDLE_TIMEOUT);
    info!(server = %name, cid = connection.id(), %peer, "accepted");
    let cid = connection.id();
    tokio::task::spawn_local(async move {
        if let Err(e) = connection.run().await {
            error!(cid, error = %e, "connection failed");
        }
    });
}

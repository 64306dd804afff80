//! Line-oriented configuration directives.
//!
//! One directive per line: a keyword, positional arguments, and
//! `key=value` flags; `#` starts a comment. Directives are scoped:
//! ROUTE opens inside a SERVER block, method directives inside a ROUTE,
//! RESOURCE inside a CONNECTION, REQUIRED/OPTIONAL inside a RESOURCE,
//! and HEADER inside a CONNECTION or RESOURCE. A SERVER or CONNECTION
//! closes every other open scope; a directive outside its scope, an
//! unknown keyword, or a surplus token fails the load with its line
//! number.
//!
//! ```text
//! SERVER api 8080
//!   ROUTE /document/(\d+)$
//!     GET document_handler
//!
//! CONNECTION remote http://10.0.0.1:8080 timeout=3
//!   HEADER x-api-key hunter2
//!   RESOURCE document /document/{id} method=POST
//!     REQUIRED first_name
//!     OPTIONAL planet default=earth
//! ```

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::http::request::Method;
use crate::router::compile_pattern;

/// Everything a deployment declares: listening servers with their route
/// tables, and outbound connections with their resource templates.
#[derive(Debug, Default)]
pub struct Config {
    pub servers: Vec<ServerSpec>,
    pub connections: Vec<ConnectionSpec>,
}

#[derive(Debug)]
pub struct ServerSpec {
    pub name: String,
    pub port: u16,
    pub routes: Vec<RouteSpec>,
}

#[derive(Debug)]
pub struct RouteSpec {
    pub pattern: String,
    pub line: usize,
    /// Declaration order; the router dispatches on exact method match.
    pub methods: Vec<(Method, String)>,
}

#[derive(Debug)]
pub struct ConnectionSpec {
    pub name: String,
    pub url: Url,
    pub timeout: Duration,
    /// Default headers sent on every resource of this connection.
    pub headers: Vec<(String, String)>,
    pub resources: Vec<ResourceSpec>,
}

#[derive(Debug)]
pub struct ResourceSpec {
    pub name: String,
    pub path: String,
    pub method: Method,
    pub is_json: bool,
    pub trace: bool,
    pub timeout: Option<Duration>,
    /// Resource-level headers, overriding the connection's defaults.
    pub headers: Vec<(String, String)>,
    pub required: Vec<String>,
    /// `(name, default)` in declaration order.
    pub optional: Vec<(String, String)>,
}

pub fn load(path: &str) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<Config, ConfigError> {
    let mut loader = Loader::default();
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        loader.directive(line_no, &tokens)?;
    }
    Ok(loader.finish())
}

/// Which block the loader is currently inside. Child directives are only
/// legal in the scope that declares them; opening a SERVER or CONNECTION
/// closes whatever was open before it.
#[derive(Default, Clone, Copy, PartialEq)]
enum Scope {
    #[default]
    Top,
    Server,
    Route,
    Connection,
    Resource,
}

#[derive(Default)]
struct Loader {
    servers: Vec<ServerSpec>,
    connections: Vec<ConnectionSpec>,
    scope: Scope,
}

impl Loader {
    fn directive(&mut self, line: usize, tokens: &[&str]) -> Result<(), ConfigError> {
        let directive = tokens[0].to_ascii_uppercase();
        let (args, kwargs) = split_args(&tokens[1..]);

        match directive.as_str() {
            "SERVER" => self.server(line, &args),
            "ROUTE" => self.route(line, &args),
            "GET" | "POST" | "PUT" | "DELETE" => self.route_method(line, &directive, &args),
            "CONNECTION" => self.connection(line, &args, &kwargs),
            "RESOURCE" => self.resource(line, &args, &kwargs),
            "REQUIRED" => self.required(line, &args),
            "OPTIONAL" => self.optional(line, &args, &kwargs),
            "HEADER" => self.header(line, &args),
            _ => Err(ConfigError::UnknownDirective {
                line,
                directive: tokens[0].to_string(),
            }),
        }
    }

    fn server(&mut self, line: usize, args: &[&str]) -> Result<(), ConfigError> {
        let [name, port] = take(line, "SERVER", args)?;
        let port: u16 = port.parse().map_err(|_| ConfigError::InvalidValue {
            line,
            what: "port",
            value: port.to_string(),
        })?;
        if self.servers.iter().any(|s| s.port == port) {
            return Err(ConfigError::DuplicatePort { line, port });
        }
        self.servers.push(ServerSpec {
            name: name.to_string(),
            port,
            routes: Vec::new(),
        });
        self.scope = Scope::Server;
        Ok(())
    }

    fn route(&mut self, line: usize, args: &[&str]) -> Result<(), ConfigError> {
        let [pattern] = take(line, "ROUTE", args)?;
        if !matches!(self.scope, Scope::Server | Scope::Route) {
            return Err(orphan(line, "ROUTE", "SERVER"));
        }
        let server = self
            .servers
            .last_mut()
            .ok_or_else(|| orphan(line, "ROUTE", "SERVER"))?;
        compile_pattern(pattern).map_err(|e| ConfigError::InvalidPattern {
            line,
            reason: e.to_string(),
        })?;
        server.routes.push(RouteSpec {
            pattern: pattern.to_string(),
            line,
            methods: Vec::new(),
        });
        self.scope = Scope::Route;
        Ok(())
    }

    fn route_method(&mut self, line: usize, method: &str, args: &[&str]) -> Result<(), ConfigError> {
        let [handler] = take(line, method, args)?;
        if self.scope != Scope::Route {
            return Err(orphan(line, method, "ROUTE"));
        }
        let route = self
            .servers
            .last_mut()
            .and_then(|s| s.routes.last_mut())
            .ok_or_else(|| orphan(line, method, "ROUTE"))?;
        let method = Method::from_str(method).ok_or(ConfigError::InvalidValue {
            line,
            what: "method",
            value: method.to_string(),
        })?;
        route.methods.push((method, handler.to_string()));
        Ok(())
    }

    fn connection(
        &mut self,
        line: usize,
        args: &[&str],
        kwargs: &HashMap<&str, &str>,
    ) -> Result<(), ConfigError> {
        let [name, url] = take(line, "CONNECTION", args)?;
        if self.connections.iter().any(|c| c.name == *name) {
            return Err(ConfigError::DuplicateConnection {
                line,
                name: name.to_string(),
            });
        }
        let url = Url::parse(url).map_err(|_| ConfigError::InvalidValue {
            line,
            what: "url",
            value: url.to_string(),
        })?;
        let timeout = match kwargs.get("timeout") {
            Some(v) => parse_seconds(line, v)?,
            None => Duration::from_secs(5),
        };
        self.connections.push(ConnectionSpec {
            name: name.to_string(),
            url,
            timeout,
            headers: Vec::new(),
            resources: Vec::new(),
        });
        self.scope = Scope::Connection;
        Ok(())
    }

    fn resource(
        &mut self,
        line: usize,
        args: &[&str],
        kwargs: &HashMap<&str, &str>,
    ) -> Result<(), ConfigError> {
        let [name, path] = take(line, "RESOURCE", args)?;
        if !matches!(self.scope, Scope::Connection | Scope::Resource) {
            return Err(orphan(line, "RESOURCE", "CONNECTION"));
        }
        let connection = self
            .connections
            .last_mut()
            .ok_or_else(|| orphan(line, "RESOURCE", "CONNECTION"))?;
        if connection.resources.iter().any(|r| r.name == *name) {
            return Err(ConfigError::DuplicateResource {
                line,
                name: name.to_string(),
            });
        }

        let method = match kwargs.get("method") {
            Some(v) => Method::from_str(v).ok_or(ConfigError::InvalidValue {
                line,
                what: "method",
                value: v.to_string(),
            })?,
            None => Method::GET,
        };
        let is_json = match kwargs.get("is_json") {
            Some(v) => parse_bool(line, v)?,
            None => true,
        };
        let trace = match kwargs.get("trace") {
            Some(v) => parse_bool(line, v)?,
            None => false,
        };
        let timeout = match kwargs.get("timeout") {
            Some(v) => Some(parse_seconds(line, v)?),
            None => None,
        };

        connection.resources.push(ResourceSpec {
            name: name.to_string(),
            path: path.to_string(),
            method,
            is_json,
            trace,
            timeout,
            headers: Vec::new(),
            required: Vec::new(),
            optional: Vec::new(),
        });
        self.scope = Scope::Resource;
        Ok(())
    }

    fn required(&mut self, line: usize, args: &[&str]) -> Result<(), ConfigError> {
        let [name] = take(line, "REQUIRED", args)?;
        let resource = self.open_resource(line, "REQUIRED")?;
        resource.required.push(name.to_string());
        Ok(())
    }

    fn optional(
        &mut self,
        line: usize,
        args: &[&str],
        kwargs: &HashMap<&str, &str>,
    ) -> Result<(), ConfigError> {
        let [name] = take(line, "OPTIONAL", args)?;
        let default = kwargs.get("default").copied().unwrap_or("").to_string();
        let resource = self.open_resource(line, "OPTIONAL")?;
        resource.optional.push((name.to_string(), default));
        Ok(())
    }

    /// A default header, attached to the open RESOURCE if one is open,
    /// else the open CONNECTION.
    fn header(&mut self, line: usize, args: &[&str]) -> Result<(), ConfigError> {
        let [key, value] = take(line, "HEADER", args)?;
        let headers = match self.scope {
            Scope::Resource => {
                &mut self
                    .connections
                    .last_mut()
                    .and_then(|c| c.resources.last_mut())
                    .ok_or_else(|| orphan(line, "HEADER", "CONNECTION"))?
                    .headers
            }
            Scope::Connection => {
                &mut self
                    .connections
                    .last_mut()
                    .ok_or_else(|| orphan(line, "HEADER", "CONNECTION"))?
                    .headers
            }
            _ => return Err(orphan(line, "HEADER", "CONNECTION")),
        };
        headers.push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn open_resource(
        &mut self,
        line: usize,
        directive: &str,
    ) -> Result<&mut ResourceSpec, ConfigError> {
        if self.scope != Scope::Resource {
            return Err(orphan(line, directive, "RESOURCE"));
        }
        self.connections
            .last_mut()
            .and_then(|c| c.resources.last_mut())
            .ok_or_else(|| orphan(line, directive, "RESOURCE"))
    }

    fn finish(self) -> Config {
        Config {
            servers: self.servers,
            connections: self.connections,
        }
    }
}

fn orphan(line: usize, directive: &str, parent: &'static str) -> ConfigError {
    ConfigError::OrphanDirective {
        line,
        directive: directive.to_string(),
        parent,
    }
}

/// Split raw tokens into positionals and `key=value` flags.
fn split_args<'a>(tokens: &[&'a str]) -> (Vec<&'a str>, HashMap<&'a str, &'a str>) {
    let mut args = Vec::new();
    let mut kwargs = HashMap::new();
    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) => {
                kwargs.insert(key, value);
            }
            None => args.push(*token),
        }
    }
    (args, kwargs)
}

fn take<'a, const N: usize>(
    line: usize,
    directive: &str,
    args: &[&'a str],
) -> Result<[&'a str; N], ConfigError> {
    if args.len() < N {
        return Err(ConfigError::TooFewTokens {
            line,
            directive: directive.to_string(),
        });
    }
    if args.len() > N {
        return Err(ConfigError::TooManyTokens {
            line,
            directive: directive.to_string(),
        });
    }
    let mut out = [""; N];
    out.copy_from_slice(&args[..N]);
    Ok(out)
}

fn parse_bool(line: usize, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            line,
            what: "boolean",
            value: value.to_string(),
        }),
    }
}

fn parse_seconds(line: usize, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = value.parse().map_err(|_| ConfigError::InvalidValue {
        line,
        what: "timeout",
        value: value.to_string(),
    })?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidValue {
            line,
            what: "timeout",
            value: value.to_string(),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}

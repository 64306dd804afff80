//! Error taxonomy for the runtime.
//!
//! Configuration problems fail fast at load time with line-numbered
//! diagnostics; argument problems fail before any network I/O and are
//! delivered to the caller's continuation; routing problems map straight
//! to HTTP status codes.

use thiserror::Error;

/// A bad directive in the configuration language. The process does not
/// start when one of these is raised.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {directive} has too few arguments")]
    TooFewTokens { line: usize, directive: String },

    #[error("line {line}: {directive} has too many arguments")]
    TooManyTokens { line: usize, directive: String },

    #[error("line {line}: unknown directive '{directive}'")]
    UnknownDirective { line: usize, directive: String },

    #[error("line {line}: {directive} has no open {parent}")]
    OrphanDirective {
        line: usize,
        directive: String,
        parent: &'static str,
    },

    #[error("line {line}: duplicate SERVER port {port}")]
    DuplicatePort { line: usize, port: u16 },

    #[error("line {line}: duplicate CONNECTION name '{name}'")]
    DuplicateConnection { line: usize, name: String },

    #[error("line {line}: duplicate resource '{name}'")]
    DuplicateResource { line: usize, name: String },

    #[error("line {line}: invalid route pattern: {reason}")]
    InvalidPattern { line: usize, reason: String },

    #[error("line {line}: invalid {what} '{value}'")]
    InvalidValue {
        line: usize,
        what: &'static str,
        value: String,
    },

    #[error("no handler registered for '{0}'")]
    UnresolvedHandler(String),
}

/// Missing or surplus values during resource invocation or route
/// dispatch. Raised before any I/O begins, never a silent default.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("missing value for path parameter '{0}'")]
    MissingPathParam(String),

    #[error("missing required argument '{0}'")]
    MissingRequired(String),

    #[error("too many positional arguments")]
    UnexpectedPositional,

    #[error("unexpected keyword argument '{0}'")]
    UnexpectedKeyword(String),
}

/// Inbound dispatch failures. `NotFound` maps to 404, `MethodNotAllowed`
/// to 405.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no matching route")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,
}

/// Lookup failures against the outbound registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown connection '{0}'")]
    UnknownConnection(String),

    #[error("unknown resource '{0}.{1}'")]
    UnknownResource(String, String),
}

//! Single-threaded microservice runtime.
//!
//! A reactor drives every connection on one thread; handlers never
//! block, they chain asynchronous work through tasks and named outbound
//! resources and resolve each inbound request exactly once. Deployments
//! are declared in a line-oriented directive file binding routes to
//! registered handler names and naming the outbound services the
//! handlers may call.

pub mod call;
pub mod config;
pub mod error;
pub mod http;
pub mod outbound;
pub mod reactor;
pub mod router;
pub mod server;

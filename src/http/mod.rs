//! HTTP protocol implementation.
//!
//! This module implements HTTP/1.1 framing and the server-role
//! connection state machine, with keep-alive support.
//!
//! # Architecture
//!
//! - **`connection`**: the server-role connection state machine
//! - **`parser`**: frames requests and responses from byte buffers
//! - **`request`**: the inbound request handle handlers receive
//! - **`response`**: response representation with builder pattern
//! - **`writer`**: serializes and writes messages to the peer
//!
//! # Connection state machine
//!
//! ```text
//!        ┌──────────────┐
//!        │ Established  │ ← post-accept
//!        └──────┬───────┘
//!               ▼
//!        ┌──────────────┐
//!        │  Receiving   │ ← read + frame one request
//!        └──────┬───────┘
//!               │ message complete
//!               ▼
//!        ┌──────────────┐
//!        │ Dispatching  │ ← router → handler (may delay the reply)
//!        └──────┬───────┘
//!               ▼
//!        ┌──────────────┐
//!        │   Sending    │ ← await the reply slot, write it out
//!        └──────┬───────┘
//!               ├─ keep-alive → Receiving
//!               └─ close → Closing → Closed
//! ```
//!
//! Client-role connections live in [`crate::outbound::client`] and add a
//! `Connecting` state ahead of the exchange.

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

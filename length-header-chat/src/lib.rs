//! Length-prefixed chat over TCP.
//!
//! A server accepts many connections, reassembles messages framed with a
//! 4-byte big-endian length header, and broadcasts each one to every
//! connected peer. A client keeps one connection open, lets any thread send,
//! and reports each received message through a callback.
//!
//! - [`codec`] encodes and incrementally decodes the length-header framing.
//! - [`connection`] defines the handle and callback trait shared with the
//!   transport.
//! - [`registry`] tracks the live connection set.
//! - [`server`] wires codec and registry into the broadcast server.
//! - [`client`] is the single-connection counterpart with a thread-safe send.
//! - [`cli`] parses arguments for the `chat-server` and `chat-client` binaries.
//!
//! The tokio transport lives in a private `net` module: accept loop, per
//! connection reader and writer tasks, and client reconnects.

pub mod cli;
pub mod client;
pub mod codec;
pub mod connection;
pub mod registry;
pub mod server;

mod net;

pub use net::RetryPolicy;

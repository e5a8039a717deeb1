//! # Service Layer
//!
//! Connections and the client/server facades built on them.
//!
//! ## Components
//! - **Connection**: one socket, its handshake, and its read/write pipeline
//! - **ClientInterface**: a single outbound connection on its own reactor thread
//! - **ServerInterface**: an accept loop, a connection pool, and hook dispatch

pub mod client;
pub mod connection;
pub mod server;

//! # Error Types
//!
//! Error handling for the messaging core.
//!
//! Only the synchronous edges of the library return these errors: resolving and
//! connecting in [`ClientInterface::connect`](crate::service::client::ClientInterface::connect),
//! binding in [`ServerInterface::start`](crate::service::server::ServerInterface::start),
//! configuration loading, and the codec. Failures inside a live connection are
//! logged and turned into a close; they never surface here.
//!
//! ## Error Categories
//! - **I/O Errors**: socket and file system failures
//! - **Setup Errors**: resolution, bind and connect failures
//! - **Protocol Errors**: handshake failures, unknown message kinds, oversized bodies
//! - **Configuration Errors**: unreadable or invalid configuration
//!
//! ## Example Usage
//! ```rust
//! use tether_net::error::{NetError, Result};
//! use std::net::{SocketAddr, ToSocketAddrs};
//! use tracing::{info, error};
//!
//! fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
//!     let addrs: Vec<_> = (host, port).to_socket_addrs()?.collect();
//!     if addrs.is_empty() {
//!         return Err(NetError::Resolve { host: host.to_string(), port });
//!     }
//!     Ok(addrs)
//! }
//!
//! match resolve("127.0.0.1", 60000) {
//!     Ok(addrs) => info!(count = addrs.len(), "Resolved"),
//!     Err(e) => error!(error = %e, "Resolution failed"),
//! }
//! ```

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Reactor errors
    pub const ERR_REACTOR_THREAD: &str = "Failed to spawn reactor thread";
    pub const ERR_REACTOR_RUNTIME: &str = "Failed to build reactor runtime";

    /// Connection errors
    pub const ERR_NOT_CONNECTED: &str = "Not connected";
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NO_ADDRESSES: &str = "Host resolved to no addresses";

    /// Handshake errors
    pub const ERR_HANDSHAKE_MISMATCH: &str = "Handshake answer did not match challenge";
}

/// NetError is the error type for every fallible operation in the crate
#[derive(Error, Debug)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake failed")]
    HandshakeFailed,

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Unknown message kind: {0}")]
    InvalidMessageKind(u32),

    #[error("Message body too large: {size} bytes (max: {max})")]
    OversizedMessage { size: usize, max: usize },

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using NetError
pub type Result<T> = std::result::Result<T, NetError>;

//! # tether-net
//!
//! Client/server messaging over TCP with typed, length-prefixed binary
//! messages.
//!
//! Every peer is validated with a challenge/response handshake before any
//! message traffic. Each client and each server runs its sockets on a
//! dedicated reactor thread; the application exchanges messages with it
//! through a thread-safe queue and never touches a socket itself.
//!
//! ## Layout
//! - [`core`]: the wire message and its framing codec
//! - [`protocol`]: the validation handshake
//! - [`service`]: connections plus the client and server facades
//! - [`transport`]: the reactor thread
//! - [`utils`]: the thread-safe queue, metrics, and logging setup
//! - [`config`], [`error`]: configuration and the crate error type
//!
//! ## Quick Start
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_net::prelude::*;
//!
//! tether_net::message_kind! {
//!     pub enum Kind {
//!         Ping = 1,
//!     }
//! }
//!
//! struct Pong;
//!
//! impl ServerHandler<Kind> for Pong {
//!     fn on_message(&self, client: Arc<Connection<Kind>>, msg: Message<Kind>) {
//!         client.send(msg);
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let mut server = ServerInterface::new(Pong);
//! server.start(60000)?;
//!
//! let mut client = ClientInterface::<Kind>::new();
//! client.connect("127.0.0.1", 60000)?;
//! client.send(Message::new(Kind::Ping));
//!
//! server.update(1, true);
//! client.incoming().wait();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::message::{Message, MessageHeader, MessageKind, OwnedMessage};
pub use crate::error::{NetError, Result};
pub use crate::service::client::ClientInterface;
pub use crate::service::connection::{Connection, ConnectionState, Owner};
pub use crate::service::server::{ServerHandler, ServerInterface};
pub use crate::utils::tsqueue::TsQueue;

/// Everything an application usually needs in one import
pub mod prelude {
    pub use crate::core::message::{Message, MessageKind, OwnedMessage};
    pub use crate::error::{NetError, Result};
    pub use crate::service::client::ClientInterface;
    pub use crate::service::connection::{Connection, ConnectionState};
    pub use crate::service::server::{ServerHandler, ServerInterface};
}

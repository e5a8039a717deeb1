//! # Client Interface
//!
//! Application-facing side of a single outbound connection.
//!
//! `connect` resolves the host, opens the socket, starts a reactor thread for
//! it and kicks off the handshake; it returns as soon as the socket is open.
//! Messages from the server land in [`ClientInterface::incoming`], which the
//! application drains at its own pace.
//!
//! ## Example
//! ```rust,no_run
//! use tether_net::core::message::Message;
//! use tether_net::service::client::ClientInterface;
//!
//! tether_net::message_kind! {
//!     pub enum Kind {
//!         Ping = 1,
//!     }
//! }
//!
//! # fn main() -> tether_net::error::Result<()> {
//! let mut client = ClientInterface::<Kind>::new();
//! client.connect("127.0.0.1", 60000)?;
//!
//! let mut ping = Message::new(Kind::Ping);
//! ping.push(&42u64);
//! client.send(ping);
//!
//! client.incoming().wait();
//! if let Some(reply) = client.incoming().pop_front() {
//!     println!("{reply}");
//! }
//! # Ok(())
//! # }
//! ```

use std::net::{SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::core::message::{Message, MessageKind, OwnedMessage};
use crate::error::{constants, NetError, Result};
use crate::service::connection::{Connection, ConnectionOptions, Owner};
use crate::transport::reactor::Reactor;
use crate::utils::metrics::Metrics;
use crate::utils::tsqueue::TsQueue;

const REACTOR_NAME: &str = "tether-client";

pub struct ClientInterface<T: MessageKind> {
    config: ClientConfig,
    reactor: Option<Reactor>,
    connection: Option<Arc<Connection<T>>>,
    incoming: Arc<TsQueue<OwnedMessage<T>>>,
    metrics: Arc<Metrics>,
}

impl<T: MessageKind> ClientInterface<T> {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            reactor: None,
            connection: None,
            incoming: Arc::new(TsQueue::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Open a connection to `host:port` and start the handshake.
    ///
    /// Succeeds once the socket is open; the handshake completes in the
    /// background. Calling this while connected drops the old connection first.
    /// Nothing is retried.
    ///
    /// # Errors
    /// `NetError::Resolve` if the host has no usable address,
    /// `NetError::Connect` if no address accepted the connection,
    /// `NetError::Runtime` if the reactor thread could not be started.
    #[instrument(skip(self))]
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.connection.is_some() {
            debug!("Reconnecting; dropping the current connection");
            self.disconnect();
        }

        let errors = self.config.validate();
        if !errors.is_empty() {
            return Err(NetError::ConfigError(errors.join("; ")));
        }

        let addrs = resolve(host, port)?;
        let stream = self.open(&addrs)?;

        let reactor = Reactor::start(REACTOR_NAME)?;
        let stream = {
            let _guard = reactor.handle().enter();
            TcpStream::from_std(stream)?
        };

        let connection = Connection::from_tcp(
            Owner::Client,
            reactor.handle().clone(),
            stream,
            Arc::clone(&self.incoming),
            Arc::clone(&self.metrics),
            ConnectionOptions {
                max_body_size: self.config.max_body_size,
                handshake_timeout: self.config.handshake_timeout,
            },
        );
        connection.connect_to_server();
        info!(peer = ?connection.peer_addr(), "Connected");

        self.connection = Some(connection);
        self.reactor = Some(reactor);
        Ok(())
    }

    /// Try each resolved address in turn, keeping the last failure.
    fn open(&self, addrs: &[SocketAddr]) -> Result<StdTcpStream> {
        let mut last_error = None;

        for addr in addrs {
            match StdTcpStream::connect_timeout(addr, self.config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nonblocking(true)?;
                    return Ok(stream);
                }
                Err(source) => {
                    debug!(%addr, error = %source, "Connect attempt failed");
                    last_error = Some(NetError::Connect {
                        addr: *addr,
                        source,
                    });
                }
            }
        }

        Err(last_error.unwrap_or(NetError::NotConnected))
    }

    /// Close the connection and stop the reactor thread. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }

        if let Some(mut reactor) = self.reactor.take() {
            reactor.stop();
            info!("Disconnected");
        }
    }

    /// True while a connection exists and its socket has not been closed.
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.is_connected())
    }

    /// Queue a message for the server. Dropped silently when not connected.
    pub fn send(&self, msg: Message<T>) {
        match &self.connection {
            Some(connection) if connection.is_connected() => connection.send(msg),
            _ => debug!(reason = constants::ERR_NOT_CONNECTED, "Dropping message"),
        }
    }

    /// Messages received from the server, oldest first
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.incoming
    }

    /// The current connection, if any
    pub fn connection(&self) -> Option<&Arc<Connection<T>>> {
        self.connection.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl<T: MessageKind> Default for ClientInterface<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageKind> Drop for ClientInterface<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let resolve_error = || NetError::Resolve {
        host: host.to_string(),
        port,
    };

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            warn!(error = %e, "Resolution failed");
            resolve_error()
        })?
        .collect();

    if addrs.is_empty() {
        warn!(reason = constants::ERR_NO_ADDRESSES, "Resolution failed");
        return Err(resolve_error());
    }
    Ok(addrs)
}

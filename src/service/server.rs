//! # Server Interface
//!
//! Listens on a port, validates each client with the handshake, and hands
//! received messages to a [`ServerHandler`] when the application calls
//! [`ServerInterface::update`].
//!
//! Accepting, handshaking and socket I/O happen on the server's reactor
//! thread. Message handling does not: `on_message` only ever runs inside
//! `update`, on whichever thread calls it.
//!
//! ## Disconnects
//! A closed connection is not reported when it closes. It stays in the pool
//! until the next `message_client` or `message_all_clients` pass finds it,
//! calls `on_client_disconnect` once, and removes it.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_net::core::message::Message;
//! use tether_net::service::connection::Connection;
//! use tether_net::service::server::{ServerHandler, ServerInterface};
//!
//! struct Echo;
//!
//! impl ServerHandler<u32> for Echo {
//!     fn on_message(&self, client: Arc<Connection<u32>>, msg: Message<u32>) {
//!         client.send(msg);
//!     }
//! }
//!
//! # fn main() -> tether_net::error::Result<()> {
//! let mut server = ServerInterface::new(Echo);
//! server.start(60000)?;
//! loop {
//!     server.update(usize::MAX, true);
//! }
//! # }
//! ```

use std::collections::HashSet;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::message::{Message, MessageKind, OwnedMessage};
use crate::error::{NetError, Result};
use crate::service::connection::{Connection, ConnectionOptions, Owner};
use crate::transport::reactor::Reactor;
use crate::utils::metrics::Metrics;
use crate::utils::tsqueue::TsQueue;

const REACTOR_NAME: &str = "tether-server";

/// Pause after a failed accept; errors such as EMFILE repeat immediately
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type Pool<T> = Arc<Mutex<Vec<Arc<Connection<T>>>>>;

/// Callbacks a server invokes as clients come and go.
///
/// `on_client_connect` and `on_client_validated` run on the reactor thread and
/// should return quickly. `on_client_disconnect` and `on_message` run on the
/// thread calling into the [`ServerInterface`].
pub trait ServerHandler<T: MessageKind>: Send + Sync + 'static {
    /// A socket was accepted. Return `false` to refuse it.
    ///
    /// The connection has no id yet; ids are only spent on accepted clients.
    fn on_client_connect(&self, _client: &Arc<Connection<T>>) -> bool {
        true
    }

    /// A pooled connection was found closed and is being removed.
    fn on_client_disconnect(&self, _client: &Arc<Connection<T>>) {}

    /// A client answered the handshake correctly. Runs before any of its
    /// messages are read.
    fn on_client_validated(&self, _client: &Arc<Connection<T>>) {}

    /// A message from `client`, delivered by [`ServerInterface::update`].
    fn on_message(&self, _client: Arc<Connection<T>>, _msg: Message<T>) {}
}

pub struct ServerInterface<T: MessageKind, H: ServerHandler<T>> {
    handler: Arc<H>,
    config: ServerConfig,
    reactor: Option<Reactor>,
    local_addr: Option<SocketAddr>,
    connections: Pool<T>,
    next_id: Arc<AtomicU32>,
    incoming: Arc<TsQueue<OwnedMessage<T>>>,
    metrics: Arc<Metrics>,
}

impl<T: MessageKind, H: ServerHandler<T>> ServerInterface<T, H> {
    pub fn new(handler: H) -> Self {
        Self::with_config(ServerConfig::default(), handler)
    }

    pub fn with_config(config: ServerConfig, handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            next_id: Arc::new(AtomicU32::new(config.first_connection_id)),
            config,
            reactor: None,
            local_addr: None,
            connections: Arc::new(Mutex::new(Vec::new())),
            incoming: Arc::new(TsQueue::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Bind to `port` and start accepting on the reactor thread.
    ///
    /// Port 0 binds an ephemeral port; see [`local_addr`](Self::local_addr).
    /// Calling this on a running server does nothing.
    ///
    /// # Errors
    /// `NetError::ConfigError` for an invalid configuration, `NetError::Bind`
    /// if the address cannot be bound, `NetError::Runtime` if the reactor
    /// thread could not be started.
    #[instrument(skip(self))]
    pub fn start(&mut self, port: u16) -> Result<()> {
        if self.reactor.is_some() {
            warn!("[SERVER] Already running");
            return Ok(());
        }

        let errors = self.config.validate();
        if !errors.is_empty() {
            return Err(NetError::ConfigError(errors.join("; ")));
        }

        let addr = SocketAddr::new(self.config.bind_address, port);
        let listener = StdTcpListener::bind(addr)
            .and_then(|listener| {
                listener.set_nonblocking(true)?;
                Ok(listener)
            })
            .map_err(|source| {
                warn!(%addr, error = %source, "[SERVER] Exception");
                NetError::Bind { addr, source }
            })?;
        let local_addr = listener.local_addr()?;

        let reactor = Reactor::start(REACTOR_NAME)?;
        let listener = {
            let _guard = reactor.handle().enter();
            TcpListener::from_std(listener)?
        };

        let acceptor = Acceptor {
            handler: Arc::clone(&self.handler),
            connections: Arc::clone(&self.connections),
            next_id: Arc::clone(&self.next_id),
            incoming: Arc::clone(&self.incoming),
            metrics: Arc::clone(&self.metrics),
            max_connections: self.config.max_connections,
            options: ConnectionOptions {
                max_body_size: self.config.max_body_size,
                handshake_timeout: self.config.handshake_timeout,
            },
        };
        reactor.handle().spawn(acceptor.run(listener));

        info!(addr = %local_addr, "[SERVER] Started!");
        self.local_addr = Some(local_addr);
        self.reactor = Some(reactor);
        Ok(())
    }

    /// Stop accepting and shut the reactor down. Idempotent.
    ///
    /// Pooled connections are closed but stay in the pool until the next
    /// messaging pass reports them through `on_client_disconnect`.
    pub fn stop(&mut self) {
        let Some(mut reactor) = self.reactor.take() else {
            return;
        };

        for client in self.lock_pool().iter() {
            client.disconnect();
        }
        reactor.stop();
        self.local_addr = None;
        info!("[SERVER] Stopped!");
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_some()
    }

    /// Address the listener is bound to while the server runs
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Deliver up to `max_messages` queued messages to `on_message`, oldest
    /// first. With `wait`, blocks the calling thread until at least one
    /// message is queued. Returns how many were delivered.
    pub fn update(&self, max_messages: usize, wait: bool) -> usize {
        if wait {
            self.incoming.wait();
        }

        let mut delivered = 0;
        while delivered < max_messages {
            let Some(owned) = self.incoming.pop_front() else {
                break;
            };
            delivered += 1;

            match owned.remote {
                Some(client) => self.handler.on_message(client, owned.msg),
                None => debug!(msg = %owned.msg, "Dropping message without origin"),
            }
        }
        delivered
    }

    /// Send to one client. A closed client is reported to
    /// `on_client_disconnect` and removed from the pool instead.
    pub fn message_client(&self, client: &Arc<Connection<T>>, msg: Message<T>) {
        if client.is_connected() {
            client.send(msg);
            return;
        }

        self.handler.on_client_disconnect(client);
        self.lock_pool().retain(|pooled| !Arc::ptr_eq(pooled, client));
    }

    /// Send to every live client except `except`.
    ///
    /// Closed clients found along the way are reported to
    /// `on_client_disconnect` and removed in a single pass at the end.
    pub fn message_all_clients(&self, msg: &Message<T>, except: Option<&Arc<Connection<T>>>) {
        // Hooks run on a snapshot so they may call back into the server
        let snapshot = self.lock_pool().clone();
        let mut closed = HashSet::new();

        for client in &snapshot {
            if client.is_connected() {
                if except.is_some_and(|skip| Arc::ptr_eq(skip, client)) {
                    continue;
                }
                client.send(msg.clone());
            } else {
                self.handler.on_client_disconnect(client);
                closed.insert(Arc::as_ptr(client));
            }
        }

        if !closed.is_empty() {
            debug!(count = closed.len(), "Removing closed connections");
            self.lock_pool()
                .retain(|pooled| !closed.contains(&Arc::as_ptr(pooled)));
        }
    }

    /// Connections in the pool, including closed ones not yet removed
    pub fn connection_count(&self) -> usize {
        self.lock_pool().len()
    }

    /// Messages received but not yet delivered by `update`
    pub fn pending_messages(&self) -> usize {
        self.incoming.len()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn lock_pool(&self) -> MutexGuard<'_, Vec<Arc<Connection<T>>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: MessageKind, H: ServerHandler<T>> Drop for ServerInterface<T, H> {
    fn drop(&mut self) {
        self.stop();
        // Undelivered messages hold their connections, which hold this queue
        self.incoming.clear();
    }
}

/// State the accept task shares with its server
struct Acceptor<T: MessageKind, H: ServerHandler<T>> {
    handler: Arc<H>,
    connections: Pool<T>,
    next_id: Arc<AtomicU32>,
    incoming: Arc<TsQueue<OwnedMessage<T>>>,
    metrics: Arc<Metrics>,
    max_connections: usize,
    options: ConnectionOptions,
}

impl<T: MessageKind, H: ServerHandler<T>> Acceptor<T, H> {
    /// Accept until the reactor shuts down. A failed or refused accept never
    /// ends the loop.
    async fn run(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) => {
                    warn!(error = %e, "[SERVER] New Connection Error");
                    self.metrics.connection_error();
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        info!(%peer, "[SERVER] New Connection");

        let live = self
            .lock_pool()
            .iter()
            .filter(|client| client.is_connected())
            .count();
        if live >= self.max_connections {
            warn!(%peer, live, "[-----] Connection Denied (pool full)");
            self.metrics.connection_denied();
            return;
        }

        let client = Connection::from_tcp(
            Owner::Server,
            Handle::current(),
            stream,
            Arc::clone(&self.incoming),
            Arc::clone(&self.metrics),
            self.options.clone(),
        );

        if !self.handler.on_client_connect(&client) {
            info!(%peer, "[-----] Connection Denied");
            self.metrics.connection_denied();
            client.disconnect();
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_pool().push(Arc::clone(&client));

        let handler = Arc::clone(&self.handler);
        client.connect_to_client(id, move |client| handler.on_client_validated(client));
        info!(id, %peer, "Connection Approved");
    }

    fn lock_pool(&self) -> MutexGuard<'_, Vec<Arc<Connection<T>>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

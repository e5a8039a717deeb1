//! # Connection
//!
//! One socket and its asynchronous read/write pipeline.
//!
//! ## Lifecycle
//! ```text
//! Handshaking ──(answer ok)──▶ Active ──(I/O error, EOF, disconnect)──▶ Closed
//!      └──────────(mismatch, timeout, I/O error)─────────────────────────▲
//! ```
//!
//! A connection is always handled through an `Arc`. Its tasks on the reactor
//! each hold a clone for exactly as long as they run, the server pool holds
//! another, and every [`OwnedMessage`] it produced holds one more. None of
//! those keep the socket alive: the socket halves belong to the tasks, and
//! the tasks end as soon as the connection is closed.
//!
//! ## Pipeline
//! - **Read**: header, then body, then push to the owner's incoming queue,
//!   then the next header. The first failure closes the connection.
//! - **Write**: [`Connection::send`] may be called from any thread. It hands
//!   the message to a channel drained by a single writer task on the reactor,
//!   so at most one write is in flight and messages leave in send order.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{HANDSHAKE_TIMEOUT, MAX_BODY_SIZE};
use crate::core::codec::MessageCodec;
use crate::core::message::{Message, MessageKind, OwnedMessage};
use crate::error::{constants, Result};
use crate::protocol::handshake::{client_handshake, server_handshake, with_timeout, Challenge};
use crate::utils::metrics::Metrics;
use crate::utils::tsqueue::TsQueue;

/// Byte stream a connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<S> AsyncStream for S where S: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type BoxedStream = Box<dyn AsyncStream>;

/// Which side of the socket this connection lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Accepted by a server; issues the challenge
    Server,
    /// Opened by a client; answers the challenge
    Client,
}

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, validation exchange not finished
    Handshaking,
    /// Validated; messages flow both ways
    Active,
    /// Socket closed; no further I/O is issued
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Handshaking => write!(f, "handshaking"),
            ConnectionState::Active => write!(f, "active"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Largest body accepted from the peer
    pub max_body_size: usize,
    /// Time allowed for the validation exchange
    pub handshake_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_body_size: MAX_BODY_SIZE,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Socket and outgoing queue, held until the pipeline starts
struct Startup<T> {
    stream: BoxedStream,
    outgoing: mpsc::UnboundedReceiver<Message<T>>,
}

pub struct Connection<T: MessageKind> {
    id: AtomicU32,
    owner: Owner,
    peer_addr: Option<SocketAddr>,
    state: Mutex<ConnectionState>,
    options: ConnectionOptions,
    /// Reactor the pipeline tasks run on
    handle: Handle,
    outgoing: mpsc::UnboundedSender<Message<T>>,
    startup: Mutex<Option<Startup<T>>>,
    shutdown: CancellationToken,
    /// Owned by the client or server; shared with every connection it creates
    incoming: Arc<TsQueue<OwnedMessage<T>>>,
    metrics: Arc<Metrics>,
}

impl<T: MessageKind> Connection<T> {
    /// Wrap a connected TCP socket
    pub fn from_tcp(
        owner: Owner,
        handle: Handle,
        stream: TcpStream,
        incoming: Arc<TsQueue<OwnedMessage<T>>>,
        metrics: Arc<Metrics>,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let peer_addr = stream.peer_addr().ok();
        Self::build(
            owner,
            handle,
            Box::new(stream),
            peer_addr,
            incoming,
            metrics,
            options,
        )
    }

    /// Wrap any byte stream, e.g. an in-memory duplex
    pub fn new<S: AsyncStream>(
        owner: Owner,
        handle: Handle,
        stream: S,
        incoming: Arc<TsQueue<OwnedMessage<T>>>,
        metrics: Arc<Metrics>,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        Self::build(owner, handle, Box::new(stream), None, incoming, metrics, options)
    }

    fn build(
        owner: Owner,
        handle: Handle,
        stream: BoxedStream,
        peer_addr: Option<SocketAddr>,
        incoming: Arc<TsQueue<OwnedMessage<T>>>,
        metrics: Arc<Metrics>,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        metrics.connection_established();

        Arc::new(Self {
            id: AtomicU32::new(0),
            owner,
            peer_addr,
            state: Mutex::new(ConnectionState::Handshaking),
            options,
            handle,
            outgoing,
            startup: Mutex::new(Some(Startup {
                stream,
                outgoing: outgoing_rx,
            })),
            shutdown: CancellationToken::new(),
            incoming,
            metrics,
        })
    }

    /// Process-wide id, assigned by the server when the connection is approved.
    /// Always 0 on the client side.
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Relaxed)
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    /// True until the connection has been closed, handshake included.
    ///
    /// May lag a peer's disconnect until the reactor notices the failed read.
    pub fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_startup(&self) -> Option<Startup<T>> {
        self.startup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Start validating a freshly accepted client.
    ///
    /// Sends the challenge and waits for the answer. On success the connection
    /// turns Active, `on_validated` runs, and only then does it start reading
    /// messages. On any failure the socket is closed silently.
    pub fn connect_to_client<F>(self: &Arc<Self>, id: u32, on_validated: F)
    where
        F: FnOnce(&Arc<Connection<T>>) + Send + 'static,
    {
        if self.owner != Owner::Server {
            warn!("connect_to_client called on a client-side connection");
            return;
        }

        self.id.store(id, Ordering::Relaxed);
        let Some(startup) = self.take_startup() else {
            warn!(id, "Connection pipeline already started");
            return;
        };

        let conn = Arc::clone(self);
        self.handle.spawn(async move {
            conn.run_server(startup, on_validated).await;
        });
    }

    /// Start answering the server's challenge on a freshly connected socket.
    pub fn connect_to_server(self: &Arc<Self>) {
        if self.owner != Owner::Client {
            warn!("connect_to_server called on a server-side connection");
            return;
        }

        let Some(startup) = self.take_startup() else {
            warn!("Connection pipeline already started");
            return;
        };

        let conn = Arc::clone(self);
        self.handle.spawn(async move {
            conn.run_client(startup).await;
        });
    }

    /// Queue a message for the peer. A no-op once the connection is closed.
    pub fn send(&self, msg: Message<T>) {
        if !self.is_connected() {
            debug!(id = self.id(), "Dropping message for closed connection");
            return;
        }

        // Only fails once the writer task has gone, i.e. after a close
        if self.outgoing.send(msg).is_err() {
            debug!(
                id = self.id(),
                reason = constants::ERR_CONNECTION_CLOSED,
                "Dropping message"
            );
        }
    }

    /// Close the socket. Idempotent, callable from any thread.
    ///
    /// Not graceful: queued outgoing messages are abandoned and in-flight
    /// reads and writes are cancelled.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), ConnectionState::Closed);
        if previous != ConnectionState::Closed {
            self.shutdown.cancel();
            self.metrics.connection_closed();
            debug!(id = self.id(), peer = ?self.peer_addr, "Connection closed");
        }
    }

    fn activate(&self) -> bool {
        let mut state = self.lock_state();
        if *state == ConnectionState::Handshaking {
            *state = ConnectionState::Active;
            true
        } else {
            false
        }
    }

    async fn run_server<F>(self: Arc<Self>, mut startup: Startup<T>, on_validated: F)
    where
        F: FnOnce(&Arc<Connection<T>>),
    {
        let challenge = Challenge::generate();
        let exchange = with_timeout(
            self.options.handshake_timeout,
            server_handshake(&mut startup.stream, &challenge),
        );

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            outcome = exchange => outcome,
        };

        if let Err(e) = outcome {
            info!(id = self.id(), error = %e, "Client Disconnected (Fail Validation)");
            self.metrics.handshake_failed();
            self.disconnect();
            return;
        }

        if !self.activate() {
            return;
        }
        self.metrics.handshake_success();
        info!(id = self.id(), "Client Validated");

        on_validated(&self);
        self.run_active(startup).await;
    }

    async fn run_client(self: Arc<Self>, mut startup: Startup<T>) {
        let exchange = with_timeout(
            self.options.handshake_timeout,
            client_handshake(&mut startup.stream),
        );

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            outcome = exchange => outcome,
        };

        if let Err(e) = outcome {
            warn!(error = %e, "Handshake with server failed");
            self.metrics.handshake_failed();
            self.disconnect();
            return;
        }

        // No confirmation comes back; a server that disagrees just hangs up
        if !self.activate() {
            return;
        }
        self.metrics.handshake_success();
        debug!(peer = ?self.peer_addr, "Connected to server");

        self.run_active(startup).await;
    }

    async fn run_active(self: Arc<Self>, startup: Startup<T>) {
        let Startup { stream, outgoing } = startup;
        let (reader, writer) = tokio::io::split(stream);

        let writer_conn = Arc::clone(&self);
        tokio::spawn(async move {
            writer_conn.write_loop(writer, outgoing).await;
        });

        self.read_loop(reader).await;
    }

    async fn read_loop(self: &Arc<Self>, reader: ReadHalf<BoxedStream>) {
        let mut frames = FramedRead::new(reader, MessageCodec::<T>::new(self.options.max_body_size));

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(msg)) => {
                    self.metrics.message_received(msg.size() as u64);
                    self.add_to_incoming(msg);
                }
                Some(Err(e)) => {
                    warn!(id = self.id(), error = %e, "Read Fail");
                    self.metrics.connection_error();
                    self.disconnect();
                    break;
                }
                None => {
                    debug!(id = self.id(), "Peer closed the connection");
                    self.disconnect();
                    break;
                }
            }
        }
    }

    fn add_to_incoming(self: &Arc<Self>, msg: Message<T>) {
        let remote = match self.owner {
            Owner::Server => Some(Arc::clone(self)),
            Owner::Client => None,
        };
        self.incoming.push_back(OwnedMessage { remote, msg });
    }

    async fn write_loop(
        &self,
        mut writer: WriteHalf<BoxedStream>,
        mut outgoing: mpsc::UnboundedReceiver<Message<T>>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = outgoing.recv() => next,
            };
            let Some(msg) = next else { break };

            let written = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                written = write_message(&mut writer, &msg) => written,
            };

            match written {
                Ok(()) => self.metrics.message_sent(msg.size() as u64),
                Err(e) => {
                    warn!(id = self.id(), error = %e, "Write Fail");
                    self.metrics.connection_error();
                    self.disconnect();
                    break;
                }
            }
        }
    }
}

/// Header first, then the body if there is one.
async fn write_message<T, W>(writer: &mut W, msg: &Message<T>) -> Result<()>
where
    T: MessageKind,
    W: AsyncWrite + Unpin,
{
    writer.write_all(&msg.header.to_bytes()).await?;
    if !msg.body.is_empty() {
        writer.write_all(&msg.body).await?;
    }
    writer.flush().await?;
    Ok(())
}

impl<T: MessageKind> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("owner", &self.owner)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handshake::transform;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    type Queue = Arc<TsQueue<OwnedMessage<u32>>>;

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn connection(
        owner: Owner,
        stream: DuplexStream,
        options: ConnectionOptions,
    ) -> (Arc<Connection<u32>>, Queue) {
        let incoming: Queue = Arc::new(TsQueue::new());
        let conn = Connection::new(
            owner,
            Handle::current(),
            stream,
            Arc::clone(&incoming),
            Arc::new(Metrics::new()),
            options,
        );
        (conn, incoming)
    }

    /// A validated server/client pair plus a count of validation callbacks
    async fn pair() -> (
        Arc<Connection<u32>>,
        Queue,
        Arc<Connection<u32>>,
        Queue,
        Arc<AtomicUsize>,
    ) {
        let (a, b) = duplex(4096);
        let (server, server_in) = connection(Owner::Server, a, ConnectionOptions::default());
        let (client, client_in) = connection(Owner::Client, b, ConnectionOptions::default());

        let validated = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&validated);
        server.connect_to_client(10_000, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        client.connect_to_server();

        eventually("validation", || validated.load(Ordering::SeqCst) == 1).await;
        eventually("client active", || client.state() == ConnectionState::Active).await;
        (server, server_in, client, client_in, validated)
    }

    #[tokio::test]
    async fn test_handshake_activates_both_sides() {
        let (server, _, client, _, validated) = pair().await;
        assert_eq!(server.state(), ConnectionState::Active);
        assert_eq!(server.id(), 10_000);
        assert_eq!(client.id(), 0);
        assert_eq!(validated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways_with_origin_tags() {
        let (server, server_in, client, client_in, _) = pair().await;

        let mut ping = Message::new(1u32);
        ping.push(&0x1122_3344_5566_7788u64);
        client.send(ping);
        server.send(Message::new(2u32));

        eventually("server inbound", || server_in.len() == 1).await;
        eventually("client inbound", || client_in.len() == 1).await;

        let mut at_server = server_in.pop_front().unwrap();
        let origin = at_server.remote.as_ref().expect("server messages carry their origin");
        assert!(Arc::ptr_eq(origin, &server));
        assert_eq!(at_server.msg.header.size, 8);
        assert_eq!(at_server.msg.pop::<u64>(), 0x1122_3344_5566_7788);

        let at_client = client_in.pop_front().unwrap();
        assert!(at_client.remote.is_none());
        assert_eq!(at_client.msg.kind(), 2);
        assert!(at_client.msg.is_empty());
    }

    #[tokio::test]
    async fn test_writes_keep_send_order() {
        let (_server, server_in, client, _, _) = pair().await;

        for i in 0..200u32 {
            // Mix empty and non-empty bodies
            let body = vec![i as u8; (i % 7) as usize * 33];
            client.send(Message::with_body(i, body));
        }

        eventually("all messages", || server_in.len() == 200).await;
        for i in 0..200u32 {
            let owned = server_in.pop_front().unwrap();
            assert_eq!(owned.msg.kind(), i);
            assert_eq!(owned.msg.body, vec![i as u8; (i % 7) as usize * 33]);
        }
    }

    #[tokio::test]
    async fn test_messages_sent_during_handshake_are_delivered() {
        let (a, b) = duplex(4096);
        let (server, server_in) = connection(Owner::Server, a, ConnectionOptions::default());
        let (client, _) = connection(Owner::Client, b, ConnectionOptions::default());

        client.send(Message::new(5u32));
        server.connect_to_client(10_001, |_| {});
        client.connect_to_server();

        eventually("early message", || server_in.len() == 1).await;
        assert_eq!(server_in.pop_front().unwrap().msg.kind(), 5);
    }

    #[tokio::test]
    async fn test_wrong_answer_closes_without_validation() {
        let (a, mut impostor) = duplex(64);
        let (server, server_in) = connection(Owner::Server, a, ConnectionOptions::default());
        let validated = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&validated);
        server.connect_to_client(10_000, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut challenge = [0u8; 8];
        impostor.read_exact(&mut challenge).await.unwrap();
        let wrong = transform(u64::from_ne_bytes(challenge)) ^ 0xFF;
        impostor.write_all(&wrong.to_ne_bytes()).await.unwrap();

        eventually("close", || !server.is_connected()).await;
        assert_eq!(validated.load(Ordering::SeqCst), 0);
        assert!(server_in.is_empty());

        // No explicit rejection: the impostor just sees the stream end
        let mut rest = Vec::new();
        impostor.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_silent_peer_hits_handshake_timeout() {
        let (a, _silent) = duplex(64);
        let options = ConnectionOptions {
            handshake_timeout: Duration::from_millis(50),
            ..ConnectionOptions::default()
        };
        let (server, _) = connection(Owner::Server, a, options);
        server.connect_to_client(10_000, |_| panic!("must not validate"));

        eventually("timeout close", || !server.is_connected()).await;
    }

    #[tokio::test]
    async fn test_oversized_body_closes_connection() {
        let (a, b) = duplex(4096);
        let small = ConnectionOptions {
            max_body_size: 16,
            ..ConnectionOptions::default()
        };
        let (server, server_in) = connection(Owner::Server, a, small);
        let (client, _) = connection(Owner::Client, b, ConnectionOptions::default());
        server.connect_to_client(10_000, |_| {});
        client.connect_to_server();

        client.send(Message::with_body(1u32, vec![0; 17]));
        eventually("close", || !server.is_connected()).await;
        assert!(server_in.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_reaches_peer() {
        let (server, _, client, _, _) = pair().await;

        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Closed);

        // Sending after close is a silent no-op
        client.send(Message::new(1u32));

        eventually("peer notices", || !server.is_connected()).await;
    }

    #[tokio::test]
    async fn test_connect_to_server_on_server_side_is_ignored() {
        let (a, _b) = duplex(64);
        let (server, _) = connection(Owner::Server, a, ConnectionOptions::default());
        server.connect_to_server();
        assert_eq!(server.state(), ConnectionState::Handshaking);
    }
}

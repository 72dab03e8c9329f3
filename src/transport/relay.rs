//! Loopback signaling relay.
//!
//! Accepts WebSocket clients keyed by the `userId` query parameter and
//! forwards every signal to the connection registered for its recipient.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              RelayServer                │
//! │              (single port)              │
//! │  ┌─────────────────────────────────┐    │
//! │  │ alice → Connection 1            │    │
//! │  │ bob   → Connection 2            │    │
//! │  │ carol → Connection 3            │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! An offer addressed to a user with no connection is answered with
//! `call:busy` on the recipient's behalf. A later connection for the same
//! user replaces the earlier one.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::Uri;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::UserId;
use crate::protocol::{Signal, SignalKind};

use super::connection::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address for the relay (localhost).
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Query parameter carrying the connecting user's identity.
pub const USER_ID_PARAM: &str = "userId";

/// Accept poll interval, bounds how long shutdown takes to be noticed.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Types
// ============================================================================

/// A registered client connection.
struct Client {
    /// Distinguishes a replaced connection from its successor.
    generation: u64,
    /// Live link to the client.
    connection: Connection,
}

/// Shared relay state.
struct RelayInner {
    /// Connected clients by user.
    clients: RwLock<FxHashMap<UserId, Client>>,
    /// Monotonic generation counter.
    next_generation: AtomicU64,
    /// Total WebSocket upgrades completed.
    accepted: AtomicUsize,
    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// RelayServer
// ============================================================================

/// In-process signaling relay.
///
/// Thread-safe; stands in for the production signaling server in tests and
/// demos.
///
/// # Example
///
/// ```ignore
/// let relay = RelayServer::bind_localhost().await?;
/// let url = relay.ws_url();
/// // Point two CallClients at `url`...
/// relay.shutdown();
/// ```
pub struct RelayServer {
    /// Bound port.
    port: u16,
    /// Shared state, also held by the accept loop.
    inner: Arc<RelayInner>,
}

// ============================================================================
// RelayServer - Constructor
// ============================================================================

impl RelayServer {
    /// Binds to `localhost:0` (random available port) and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_localhost() -> Result<Self> {
        Self::bind(DEFAULT_BIND_IP, 0).await
    }

    /// Binds to a specific IP and port and starts accepting.
    ///
    /// # Arguments
    ///
    /// * `ip` - IP address to bind to
    /// * `port` - Port to bind to (0 for random)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let actual_port = listener.local_addr()?.port();

        let inner = Arc::new(RelayInner {
            clients: RwLock::new(FxHashMap::default()),
            next_generation: AtomicU64::new(1),
            accepted: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&inner).accept_loop(listener));

        info!(port = actual_port, "Relay started");

        Ok(Self {
            port: actual_port,
            inner,
        })
    }
}

// ============================================================================
// RelayServer - Public API
// ============================================================================

impl RelayServer {
    /// Returns the port the relay is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the WebSocket URL for this relay.
    ///
    /// Format: `ws://127.0.0.1:{port}/`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/", self.port)
    }

    /// Returns `true` if the user currently has a connection.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.inner.clients.read().contains_key(user)
    }

    /// Returns the number of connected users.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.clients.read().len()
    }

    /// Returns the number of WebSocket upgrades completed since binding.
    #[inline]
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.inner.accepted.load(Ordering::SeqCst)
    }

    /// Force-closes a user's connection, simulating network loss.
    ///
    /// Returns `false` if the user was not connected.
    pub fn drop_user(&self, user: &UserId) -> bool {
        let removed = self.inner.clients.write().remove(user);
        match removed {
            Some(client) => {
                client.connection.shutdown();
                debug!(user = %user, "Client dropped by relay");
                true
            }
            None => false,
        }
    }

    /// Stops accepting and closes every client connection.
    pub fn shutdown(&self) {
        info!("Relay shutting down");
        self.inner.shutdown.store(true, Ordering::SeqCst);

        let clients: Vec<_> = self.inner.clients.write().drain().collect();
        for (user, client) in clients {
            client.connection.shutdown();
            debug!(user = %user, "Connection closed during shutdown");
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// RelayInner - Accept Loop
// ============================================================================

impl RelayInner {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        debug!(?addr, "Refusing connection during shutdown");
                        break;
                    }
                    let relay = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = relay.handle_client(stream, addr).await {
                            warn!(error = %e, ?addr, "Client handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades one client, registers it and routes its signals until it closes.
    async fn handle_client(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut uri: Option<Uri> = None;
        let capture_uri = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            uri = Some(request.uri().clone());
            Ok(response)
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, capture_uri)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        self.accepted.fetch_add(1, Ordering::SeqCst);

        let user = uri
            .as_ref()
            .and_then(user_from_uri)
            .ok_or_else(|| Error::protocol(format!("missing {USER_ID_PARAM} query parameter")))?;

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let (connection, event_loop) = Connection::new(ws_stream, inbound_tx);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        let replaced = self.clients.write().insert(
            user.clone(),
            Client {
                generation,
                connection,
            },
        );
        if let Some(previous) = replaced {
            previous.connection.shutdown();
            debug!(user = %user, "Replaced existing connection");
        }

        info!(user = %user, ?addr, "Client connected");

        while let Some(signal) = inbound_rx.recv().await {
            self.route(&user, signal);
        }

        let closed = event_loop.await.ok();

        // Only unregister if not already replaced by a newer connection
        {
            let mut clients = self.clients.write();
            if clients.get(&user).is_some_and(|c| c.generation == generation) {
                clients.remove(&user);
            }
        }

        info!(user = %user, ?closed, "Client disconnected");
        Ok(())
    }

    /// Forwards a signal to its recipient.
    fn route(&self, sender: &UserId, signal: Signal) {
        if signal.payload.from != *sender {
            warn!(
                sender = %sender,
                claimed = %signal.payload.from,
                "Dropping signal with spoofed sender"
            );
            return;
        }

        let recipient = {
            let clients = self.clients.read();
            clients.get(&signal.payload.to).map(|c| c.connection.clone())
        };

        match recipient {
            Some(connection) => {
                if let Err(e) = connection.send(&signal) {
                    warn!(error = %e, to = %signal.payload.to, "Failed to forward signal");
                }
            }
            None if signal.kind == SignalKind::Offer => {
                debug!(to = %signal.payload.to, "Recipient offline, answering busy");
                let busy = signal.reply(SignalKind::Busy);
                let sender_connection = self.clients.read().get(sender).map(|c| c.connection.clone());
                if let Some(connection) = sender_connection {
                    let _ = connection.send(&busy);
                }
            }
            None => {
                debug!(kind = %signal.kind, to = %signal.payload.to, "Recipient offline, dropping signal");
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Extracts the user identity from the upgrade request's query string.
fn user_from_uri(uri: &Uri) -> Option<UserId> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == USER_ID_PARAM)
        .map(|(_, value)| UserId::new(value.into_owned()))
        .filter(|user| !user.is_blank())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    use crate::identifiers::CallId;
    use crate::protocol::{CallPayload, MediaKind};

    fn offer(from: &str, to: &str) -> Signal {
        Signal::new(
            SignalKind::Offer,
            CallPayload::new(
                CallId::generate(),
                UserId::new(from),
                UserId::new(to),
                MediaKind::Audio,
            ),
        )
    }

    async fn wait_online(relay: &RelayServer, user: &UserId) {
        for _ in 0..200 {
            if relay.is_online(user) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{user} never came online");
    }

    async fn next_signal<S>(ws: &mut S) -> Signal
    where
        S: StreamExt<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Signal::decode(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[test]
    fn test_user_from_uri() {
        let uri: Uri = "/?userId=alice%20b".parse().unwrap();
        assert_eq!(user_from_uri(&uri), Some(UserId::new("alice b")));

        let uri: Uri = "/?other=1".parse().unwrap();
        assert_eq!(user_from_uri(&uri), None);

        let uri: Uri = "/?userId=".parse().unwrap();
        assert_eq!(user_from_uri(&uri), None);
    }

    #[tokio::test]
    async fn test_relay_creation() {
        let relay = RelayServer::bind_localhost().await.expect("relay bind");
        assert!(relay.port() > 0);
        assert_eq!(relay.ws_url(), format!("ws://127.0.0.1:{}/", relay.port()));
        assert_eq!(relay.connection_count(), 0);
        relay.shutdown();
    }

    #[tokio::test]
    async fn test_routes_signal_to_recipient() {
        let relay = RelayServer::bind_localhost().await.unwrap();
        let (mut alice, _) = connect_async(format!("{}?userId=alice", relay.ws_url())).await.unwrap();
        let (mut bob, _) = connect_async(format!("{}?userId=bob", relay.ws_url())).await.unwrap();
        wait_online(&relay, &UserId::new("alice")).await;
        wait_online(&relay, &UserId::new("bob")).await;

        let signal = offer("alice", "bob");
        alice
            .send(Message::Text(signal.encode().unwrap().into()))
            .await
            .unwrap();

        assert_eq!(next_signal(&mut bob).await, signal);
        relay.shutdown();
    }

    #[tokio::test]
    async fn test_offer_to_offline_user_is_answered_busy() {
        let relay = RelayServer::bind_localhost().await.unwrap();
        let (mut alice, _) = connect_async(format!("{}?userId=alice", relay.ws_url())).await.unwrap();
        wait_online(&relay, &UserId::new("alice")).await;

        let signal = offer("alice", "nobody");
        alice
            .send(Message::Text(signal.encode().unwrap().into()))
            .await
            .unwrap();

        let reply = next_signal(&mut alice).await;
        assert_eq!(reply.kind, SignalKind::Busy);
        assert_eq!(reply.payload.session_id, signal.payload.session_id);
        assert_eq!(reply.payload.from, UserId::new("nobody"));
        relay.shutdown();
    }

    #[tokio::test]
    async fn test_drop_user_closes_connection() {
        let relay = RelayServer::bind_localhost().await.unwrap();
        let (mut alice, _) = connect_async(format!("{}?userId=alice", relay.ws_url())).await.unwrap();
        let user = UserId::new("alice");
        wait_online(&relay, &user).await;

        assert!(relay.drop_user(&user));
        assert!(!relay.is_online(&user));
        assert!(!relay.drop_user(&user));

        loop {
            match alice.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
        relay.shutdown();
    }
}

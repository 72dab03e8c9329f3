//! Persistent signaling connection manager.
//!
//! [`ConnectionManager`] binds one WebSocket link to the authenticated user,
//! reconnects after unexpected drops, and delivers inbound signals to
//! registered listeners in arrival order.
//!
//! # Connection Lifecycle
//!
//! ```text
//!              connect(user)            handshake ok
//! Disconnected ─────────────► Connecting ────────────► Connected
//!      ▲                          ▲                        │
//!      │ disconnect() /           │   link lost            │
//!      │ reconnect gave up        └────────────────────────┘
//! ```
//!
//! # Handler Replay
//!
//! Listeners registered with [`ConnectionManager::on`] before the link is
//! `Connected` are queued, then moved onto the live registry exactly once,
//! in registration order, at the moment the state flips to `Connected`.
//! Registrations made while `Connected` take effect immediately. Live
//! registrations survive disconnects and reconnects.
//!
//! Signals sent by peers while the link is down are not replayed.
//!
//! # Link Events
//!
//! [`ConnectionManager::subscribe_links`] reports every `Connected`
//! boundary crossing as a [`LinkEvent`]. Unlike the state `watch`, a quick
//! drop and reconnect is never folded away: observers always see `Down`
//! followed by `Up`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::UserId;
use crate::protocol::{CallPayload, Signal, SignalKind};

use super::backoff::{Backoff, ReconnectPolicy};
use super::connection::{Connection, LinkClosed};
use super::relay::USER_ID_PARAM;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the link event broadcast channel.
const LINK_EVENT_CAPACITY: usize = 32;

// ============================================================================
// Types
// ============================================================================

/// Listener callback for one signal kind.
///
/// Invoked on the manager's delivery task; must not block.
pub type Listener = Arc<dyn Fn(&Signal) + Send + Sync>;

/// Handle for removing a listener with [`ConnectionManager::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// ============================================================================
// LinkEvent
// ============================================================================

/// Transition across the `Connected` boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkEvent {
    /// The link became `Connected`.
    Up,
    /// The link left `Connected`.
    Down,
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle of the signaling link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link and no reconnect in progress.
    Disconnected,
    /// Handshake or reconnect backoff in progress.
    Connecting,
    /// Link is live; signals flow.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
        }
    }
}

// ============================================================================
// ManagerConfig
// ============================================================================

/// Transport settings for a [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Base `ws://` or `wss://` endpoint of the signaling server.
    pub server_url: Url,
    /// Maximum time for one handshake attempt.
    pub connect_timeout: Duration,
    /// Schedule for reconnecting after unexpected drops.
    pub reconnect: ReconnectPolicy,
}

impl ManagerConfig {
    /// Creates a config with default timeouts.
    #[inline]
    #[must_use]
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Returns the endpoint for a user: the server URL with `?userId=` appended.
    #[must_use]
    pub fn endpoint_for(&self, user: &UserId) -> Url {
        let mut url = self.server_url.clone();
        url.query_pairs_mut().append_pair(USER_ID_PARAM, user.as_str());
        url
    }
}

// ============================================================================
// Internal Types
// ============================================================================

/// Listener registrations.
#[derive(Default)]
struct Registry {
    /// Registrations waiting for the next `Connected` transition.
    pending: Vec<(ListenerId, SignalKind, Listener)>,
    /// Registrations receiving signals.
    live: FxHashMap<SignalKind, Vec<(ListenerId, Listener)>>,
    /// Next listener handle.
    next_id: u64,
}

/// A freshly opened link, not yet supervised.
struct OpenLink {
    connection: Connection,
    event_loop: JoinHandle<LinkClosed>,
    inbound: mpsc::UnboundedReceiver<Signal>,
}

/// The user binding and its supervisor task.
struct Binding {
    user: UserId,
    supervisor: JoinHandle<()>,
}

/// Shared manager state.
struct ManagerInner {
    config: ManagerConfig,
    state_tx: watch::Sender<ConnectionState>,
    link_tx: broadcast::Sender<LinkEvent>,
    registry: Mutex<Registry>,
    outbound: RwLock<Option<Connection>>,
    binding: AsyncMutex<Option<Binding>>,
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Owner of the signaling link.
///
/// Cloning is cheap; clones share the same link, state and listeners.
///
/// # Example
///
/// ```ignore
/// let manager = ConnectionManager::new(ManagerConfig::new(url));
/// manager.on(SignalKind::Offer, |signal| println!("ringing: {}", signal.payload.from));
/// manager.connect(UserId::new("alice")).await?;
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("server_url", &self.inner.config.server_url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionManager - Public API
// ============================================================================

impl ConnectionManager {
    /// Creates a disconnected manager.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (link_tx, _) = broadcast::channel(LINK_EVENT_CAPACITY);

        Self {
            inner: Arc::new(ManagerInner {
                config,
                state_tx,
                link_tx,
                registry: Mutex::new(Registry::default()),
                outbound: RwLock::new(None),
                binding: AsyncMutex::new(None),
            }),
        }
    }

    /// Connects the link for `user`.
    ///
    /// No-op if already connecting or connected for the same user. If bound
    /// to a different user, that binding is torn down first. Suspends until
    /// the first handshake completes or fails; reconnects after that happen
    /// in the background.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `user` is blank
    /// - [`Error::ConnectionTimeout`] if the handshake exceeds the timeout
    /// - [`Error::Connection`] if the handshake fails
    pub async fn connect(&self, user: UserId) -> Result<()> {
        if user.is_blank() {
            return Err(Error::config("user id must not be blank"));
        }

        let mut binding = self.inner.binding.lock().await;

        if let Some(existing) = binding.as_ref()
            && existing.user == user
            && self.state() != ConnectionState::Disconnected
        {
            debug!(user = %user, state = %self.state(), "Already bound, connect is a no-op");
            return Ok(());
        }

        if let Some(previous) = binding.take() {
            debug!(previous = %previous.user, next = %user, "Rebinding connection");
            self.inner.teardown(previous).await;
        }

        let url = self.inner.config.endpoint_for(&user);
        self.inner.set_state(ConnectionState::Connecting);

        let link = match self.inner.open(&url).await {
            Ok(link) => link,
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                warn!(user = %user, error = %e, "Connect failed");
                return Err(e);
            }
        };

        self.inner.go_live(&link.connection);
        info!(user = %user, "Signaling connected");

        let supervisor = tokio::spawn(Arc::clone(&self.inner).supervise(user.clone(), url, link));
        *binding = Some(Binding { user, supervisor });

        Ok(())
    }

    /// Tears down the link and stops reconnecting.
    ///
    /// Queued and live listener registrations are kept for the next
    /// [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        let mut binding = self.inner.binding.lock().await;

        match binding.take() {
            Some(previous) => {
                info!(user = %previous.user, "Signaling disconnected");
                self.inner.teardown(previous).await;
            }
            None => self.inner.set_state(ConnectionState::Disconnected),
        }
    }

    /// Returns `true` if the link is `Connected`.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribes to state transitions.
    #[inline]
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribes to link up/down events.
    #[inline]
    #[must_use]
    pub fn subscribe_links(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.link_tx.subscribe()
    }

    /// Registers a listener for one signal kind.
    ///
    /// Before `Connected` the registration is queued and replayed when the
    /// link comes up; afterwards it takes effect immediately.
    pub fn on<F>(&self, kind: SignalKind, listener: F) -> ListenerId
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let mut registry = self.inner.registry.lock();

        let id = ListenerId(registry.next_id);
        registry.next_id += 1;

        if self.is_connected() {
            registry.live.entry(kind).or_default().push((id, listener));
            debug!(kind = %kind, "Listener registered");
        } else {
            registry.pending.push((id, kind, listener));
            debug!(kind = %kind, queued = registry.pending.len(), "Listener queued until connected");
        }

        id
    }

    /// Removes a listener, queued or live.
    ///
    /// Returns `false` if it was already removed.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut registry = self.inner.registry.lock();

        let queued = registry.pending.len();
        registry.pending.retain(|(pending, _, _)| *pending != id);
        let mut removed = registry.pending.len() != queued;

        for listeners in registry.live.values_mut() {
            let before = listeners.len();
            listeners.retain(|(live, _)| *live != id);
            removed |= listeners.len() != before;
        }
        registry.live.retain(|_, listeners| !listeners.is_empty());

        if removed {
            debug!(?id, "Listener removed");
        }
        removed
    }

    /// Sends a signal to the server.
    ///
    /// Fire-and-forget: the frame is queued for the writer task.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the link is not `Connected`
    /// - [`Error::ConnectionClosed`] if the link dropped while queuing
    pub fn emit(&self, kind: SignalKind, payload: CallPayload) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let outbound = self.inner.outbound.read();
        let connection = outbound.as_ref().ok_or(Error::NotConnected)?;
        let signal = Signal::new(kind, payload);

        trace!(kind = %kind, session = %signal.payload.session_id, to = %signal.payload.to, "Emitting signal");
        connection.send(&signal)
    }

    /// Returns the number of registrations waiting for replay.
    #[inline]
    #[must_use]
    pub fn pending_listener_count(&self) -> usize {
        self.inner.registry.lock().pending.len()
    }

    /// Returns the number of live registrations.
    #[must_use]
    pub fn live_listener_count(&self) -> usize {
        self.inner.registry.lock().live.values().map(Vec::len).sum()
    }
}

// ============================================================================
// ManagerInner - Link Management
// ============================================================================

impl ManagerInner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous == state {
            return;
        }
        debug!(from = %previous, to = %state, "Connection state changed");

        let event = match (previous, state) {
            (_, ConnectionState::Connected) => LinkEvent::Up,
            (ConnectionState::Connected, _) => LinkEvent::Down,
            _ => return,
        };
        // No subscribers is fine.
        let _ = self.link_tx.send(event);
    }

    /// Performs one handshake attempt.
    async fn open(&self, url: &Url) -> Result<OpenLink> {
        let timeout_ms = self.config.connect_timeout.as_millis() as u64;
        let (ws_stream, _) = timeout(self.config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::connection_timeout(timeout_ms))?
            .map_err(|e| Error::connection(format!("WebSocket handshake failed: {e}")))?;

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (connection, event_loop) = Connection::new(ws_stream, inbound_tx);

        Ok(OpenLink {
            connection,
            event_loop,
            inbound,
        })
    }

    /// Publishes a live link: replays queued listeners, then flips to `Connected`.
    ///
    /// Both happen under the registry lock so a concurrent `on` lands either
    /// in the replayed queue or directly on the live registry.
    fn go_live(&self, connection: &Connection) {
        let mut registry = self.registry.lock();

        let pending = std::mem::take(&mut registry.pending);
        if !pending.is_empty() {
            debug!(count = pending.len(), "Replaying queued listeners");
        }
        for (id, kind, listener) in pending {
            registry.live.entry(kind).or_default().push((id, listener));
        }

        *self.outbound.write() = Some(connection.clone());
        self.set_state(ConnectionState::Connected);
    }

    /// Withdraws the live link and moves to `next`.
    fn go_down(&self, next: ConnectionState) {
        self.outbound.write().take();
        self.set_state(next);
    }

    /// Stops a binding's supervisor and closes its link.
    ///
    /// Waits for the supervisor to finish so it cannot publish a link or
    /// state after this returns.
    async fn teardown(&self, binding: Binding) {
        binding.supervisor.abort();
        if let Err(e) = binding.supervisor.await
            && !e.is_cancelled()
        {
            warn!(user = %binding.user, error = %e, "Supervisor task failed");
        }

        if let Some(connection) = self.outbound.write().take() {
            connection.shutdown();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Delivers one signal to its listeners, in registration order.
    fn dispatch(&self, signal: &Signal) {
        let listeners = self
            .registry
            .lock()
            .live
            .get(&signal.kind)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect::<Vec<_>>())
            .unwrap_or_default();

        if listeners.is_empty() {
            debug!(kind = %signal.kind, "No listener for signal");
            return;
        }

        for listener in listeners {
            listener(signal);
        }
    }
}

// ============================================================================
// ManagerInner - Supervisor
// ============================================================================

impl ManagerInner {
    /// Delivers inbound signals and reconnects after unexpected drops.
    async fn supervise(self: Arc<Self>, user: UserId, url: Url, mut link: OpenLink) {
        let mut backoff = self.config.reconnect.backoff();

        loop {
            let closed = self.pump(&mut link).await;

            if !closed.is_unexpected() {
                debug!(user = %user, "Link closed locally, supervisor exiting");
                self.go_down(ConnectionState::Disconnected);
                return;
            }

            warn!(user = %user, ?closed, "Signaling connection lost");
            self.go_down(ConnectionState::Connecting);

            match self.reconnect(&user, &url, &mut backoff).await {
                Some(next) => {
                    self.go_live(&next.connection);
                    info!(user = %user, attempts = backoff.attempt(), "Signaling reconnected");
                    backoff.reset();
                    link = next;
                }
                None => {
                    error!(user = %user, "Reconnect attempts exhausted");
                    self.go_down(ConnectionState::Disconnected);
                    return;
                }
            }
        }
    }

    /// Dispatches every inbound signal until the link's event loop ends.
    async fn pump(&self, link: &mut OpenLink) -> LinkClosed {
        while let Some(signal) = link.inbound.recv().await {
            self.dispatch(&signal);
        }

        match (&mut link.event_loop).await {
            Ok(closed) => closed,
            Err(e) => LinkClosed::Remote {
                reason: format!("event loop failed: {e}"),
            },
        }
    }

    /// Retries the handshake following the reconnect policy.
    async fn reconnect(&self, user: &UserId, url: &Url, backoff: &mut Backoff) -> Option<OpenLink> {
        while let Some(delay) = backoff.next_delay() {
            info!(
                user = %user,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            sleep(delay).await;

            match self.open(url).await {
                Ok(link) => return Some(link),
                Err(e) => warn!(user = %user, error = %e, "Reconnect attempt failed"),
            }
        }

        None
    }
}

// ============================================================================
// Tests
// ============================================================================

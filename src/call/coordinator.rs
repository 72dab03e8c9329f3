//! Call session coordinator.
//!
//! [`CallCoordinator`] owns the one [`CallMachine`] of a client and runs it
//! on a dedicated task. Local commands, inbound signals, connectivity
//! changes and fired timers all travel through a single queue, so every
//! transition runs to completion before the next one starts.
//!
//! # Publishing
//!
//! The current [`CallSnapshot`] is held in a `watch` channel and replaced
//! as a whole value. Readers never see a status without its session or a
//! half-applied toggle. Ending a call publishes an `Ended` snapshot and
//! then `Idle`; a late subscriber that only observes `Idle` still finds
//! the outcome in [`CallSnapshot::last_ended`].
//!
//! # Connectivity
//!
//! Link changes come from [`ConnectionManager::subscribe_links`], which
//! reports every outage, so a drop and reconnect between two polls is
//! never coalesced away.
//!
//! # Failure Handling
//!
//! Outbound signals and media operations run after the state change. Their
//! failures are reported on the warning channel and never roll the
//! transition back.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::UserId;
use crate::media::MediaDevice;
use crate::protocol::{MediaKind, Signal, SignalKind};
use crate::transport::{ConnectionManager, LinkEvent, ListenerId};

use super::machine::{CallMachine, Command, Effect, Timer};
use super::session::{CallSnapshot, CallWarning};

// ============================================================================
// Constants
// ============================================================================

/// Default time an unanswered call keeps ringing.
pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(45);

/// Default time a call survives without a signaling link.
pub const DEFAULT_DEGRADED_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the warning broadcast channel.
const WARNING_CAPACITY: usize = 64;

// ============================================================================
// CoordinatorConfig
// ============================================================================

/// Deadlines applied by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How long an outgoing or incoming call rings before it is abandoned.
    pub ring_timeout: Duration,
    /// How long a call may continue while the link is down or the peer
    /// has not confirmed it after a reconnect.
    pub degraded_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ring_timeout: DEFAULT_RING_TIMEOUT,
            degraded_timeout: DEFAULT_DEGRADED_TIMEOUT,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Input to the coordinator task.
enum Message {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<CallSnapshot>>,
    },
    Remote(Signal),
    Connectivity(bool),
    Timer(Timer),
    Shutdown,
}

// ============================================================================
// CallCoordinator
// ============================================================================

/// Handle to the call coordinator task.
///
/// Cloning is cheap; all clones drive the same call.
#[derive(Clone)]
pub struct CallCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    local: UserId,
    tx: mpsc::UnboundedSender<Message>,
    snapshot_rx: watch::Receiver<CallSnapshot>,
    warnings: broadcast::Sender<CallWarning>,
    manager: ConnectionManager,
    listeners: Mutex<Vec<ListenerId>>,
    actor: Mutex<Option<JoinHandle<()>>>,
    watcher: JoinHandle<()>,
}

impl CoordinatorInner {
    /// Stops inputs: removes the signal listeners and the link watcher.
    fn detach(&self) {
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for id in listeners {
            self.manager.off(id);
        }
        self.watcher.abort();
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        self.detach();
    }
}

impl fmt::Debug for CallCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCoordinator")
            .field("local", &self.inner.local)
            .field("status", &self.inner.snapshot_rx.borrow().status)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// CallCoordinator - Construction
// ============================================================================

impl CallCoordinator {
    /// Starts a coordinator for `local`.
    ///
    /// Registers a listener for every signal kind on `manager`. When the
    /// manager is not connected yet the registrations are queued and go
    /// live with the first connection. The listeners are removed again on
    /// [`shutdown`](Self::shutdown) or when the last handle is dropped.
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(
        local: UserId,
        manager: ConnectionManager,
        media: Arc<dyn MediaDevice>,
        config: CoordinatorConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let listeners: Vec<ListenerId> = SignalKind::ALL
            .into_iter()
            .map(|kind| {
                let tx = tx.clone();
                manager.on(kind, move |signal: &Signal| {
                    let _ = tx.send(Message::Remote(signal.clone()));
                })
            })
            .collect();

        // Subscribe before reading the state so no change falls in between.
        let links = manager.subscribe_links();
        let machine = CallMachine::new(local.clone(), manager.is_connected());
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
        let (warnings, _) = broadcast::channel(WARNING_CAPACITY);

        let watcher = tokio::spawn(watch_links(manager.clone(), links, tx.clone()));

        let actor = Actor {
            machine,
            manager: manager.clone(),
            media,
            config,
            snapshot_tx,
            warnings: warnings.clone(),
            tx: tx.clone(),
        };
        let handle = tokio::spawn(actor.run(rx));

        debug!(user = %local, "Call coordinator started");

        Self {
            inner: Arc::new(CoordinatorInner {
                local,
                tx,
                snapshot_rx,
                warnings,
                manager,
                listeners: Mutex::new(listeners),
                actor: Mutex::new(Some(handle)),
                watcher,
            }),
        }
    }
}

// ============================================================================
// CallCoordinator - Commands
// ============================================================================

impl CallCoordinator {
    /// Rings `remote`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `remote` is blank or the local user
    /// - [`Error::AlreadyInCall`] unless idle
    /// - [`Error::NotConnected`] if the signaling link is down
    pub async fn place_call(
        &self,
        remote: impl Into<UserId>,
        media_kind: MediaKind,
    ) -> Result<CallSnapshot> {
        let remote = remote.into();
        if remote.is_blank() {
            return Err(Error::config("remote user id must not be blank"));
        }
        if remote == self.inner.local {
            return Err(Error::config("cannot place a call to yourself"));
        }

        self.request(Command::Place { remote, media_kind }).await
    }

    /// Answers the ringing incoming call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveCall`] unless a call is incoming.
    pub async fn answer_call(&self) -> Result<CallSnapshot> {
        self.request(Command::Answer).await
    }

    /// Rejects the ringing incoming call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveCall`] unless a call is incoming.
    pub async fn decline_call(&self) -> Result<CallSnapshot> {
        self.request(Command::Decline).await
    }

    /// Ends whatever call is in progress. Idempotent.
    ///
    /// # Errors
    ///
    /// Only fails if the coordinator has shut down.
    pub async fn end_call(&self) -> Result<CallSnapshot> {
        self.request(Command::End).await
    }

    /// Flips the mute flag of the active call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveCall`] unless a call is active.
    pub async fn toggle_mute(&self) -> Result<CallSnapshot> {
        self.request(Command::ToggleMute).await
    }

    /// Flips the loudspeaker flag of the active call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveCall`] unless a call is active.
    pub async fn toggle_speaker(&self) -> Result<CallSnapshot> {
        self.request(Command::ToggleSpeaker).await
    }

    async fn request(&self, command: Command) -> Result<CallSnapshot> {
        let (reply, response) = oneshot::channel();
        self.inner
            .tx
            .send(Message::Command { command, reply })
            .map_err(|_| Error::shutdown("call coordinator"))?;

        response.await?
    }
}

// ============================================================================
// CallCoordinator - Observation & Lifecycle
// ============================================================================

impl CallCoordinator {
    /// Identity the coordinator acts for.
    #[inline]
    #[must_use]
    pub fn local_user(&self) -> &UserId {
        &self.inner.local
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CallSnapshot {
        self.inner.snapshot_rx.borrow().clone()
    }

    /// Subscribes to snapshot changes.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.snapshot_rx.clone()
    }

    /// Subscribes to warnings.
    #[inline]
    #[must_use]
    pub fn warnings(&self) -> broadcast::Receiver<CallWarning> {
        self.inner.warnings.subscribe()
    }

    /// Stops the coordinator task after it drains queued inputs and
    /// removes its listeners from the manager.
    ///
    /// Does not end the current call; callers that want the peer notified
    /// run [`end_call`](Self::end_call) first.
    pub async fn shutdown(&self) {
        let _ = self.inner.tx.send(Message::Shutdown);
        self.inner.detach();

        let handle = self.inner.actor.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Call coordinator task failed");
        }
    }
}

#[cfg(test)]
impl CallCoordinator {
    pub(crate) fn deliver_signal(&self, signal: Signal) {
        let _ = self.inner.tx.send(Message::Remote(signal));
    }

    pub(crate) fn notify_connectivity(&self, connected: bool) {
        let _ = self.inner.tx.send(Message::Connectivity(connected));
    }
}

// ============================================================================
// Connectivity Watcher
// ============================================================================

/// Forwards link events as connectivity inputs.
async fn watch_links(
    manager: ConnectionManager,
    mut links: broadcast::Receiver<LinkEvent>,
    tx: mpsc::UnboundedSender<Message>,
) {
    loop {
        let inputs = match links.recv().await {
            Ok(LinkEvent::Up) => vec![true],
            Ok(LinkEvent::Down) => vec![false],
            Err(RecvError::Lagged(skipped)) => {
                // Missed events may hide an outage; assume one happened.
                warn!(skipped, "Link events lagged");
                vec![false, manager.is_connected()]
            }
            Err(RecvError::Closed) => break,
        };
        for connected in inputs {
            if tx.send(Message::Connectivity(connected)).is_err() {
                return;
            }
        }
    }
}

// ============================================================================
// Actor
// ============================================================================

struct Actor {
    machine: CallMachine,
    manager: ConnectionManager,
    media: Arc<dyn MediaDevice>,
    config: CoordinatorConfig,
    snapshot_tx: watch::Sender<CallSnapshot>,
    warnings: broadcast::Sender<CallWarning>,
    tx: mpsc::UnboundedSender<Message>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Command { command, reply } => {
                    let operation = command.name();
                    let result = match self.machine.command(command) {
                        Ok(effects) => {
                            self.execute(effects).await;
                            Ok(self.machine.snapshot())
                        }
                        Err(e) => {
                            debug!(operation, error = %e, "Command rejected");
                            Err(e)
                        }
                    };
                    let _ = reply.send(result);
                }
                Message::Remote(signal) => self.on_signal(&signal).await,
                Message::Connectivity(connected) => {
                    let effects = self.machine.connectivity(connected);
                    self.execute(effects).await;
                }
                Message::Timer(timer) => {
                    let effects = self.machine.timer(timer);
                    self.execute(effects).await;
                }
                Message::Shutdown => break,
            }
        }

        debug!(user = %self.machine.local_user(), "Call coordinator stopped");
    }

    async fn on_signal(&mut self, signal: &Signal) {
        match self.machine.signal(signal) {
            Ok(effects) => self.execute(effects).await,
            Err(Error::Busy { from }) => {
                info!(from = %from, session = %signal.payload.session_id, "Rejecting offer, already in a call");
                let reply = signal.reply(SignalKind::Busy);
                self.emit(reply.kind, reply);
            }
            Err(e) => warn!(kind = %signal.kind, error = %e, "Failed to apply signal"),
        }
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(kind, payload) => self.emit(kind, Signal::new(kind, payload)),
                Effect::Media(action) => {
                    if let Err(e) = action.apply(self.media.as_ref()).await {
                        warn!(operation = action.operation(), error = %e, "Media operation failed");
                        self.warn(CallWarning::Device {
                            operation: action.operation(),
                            message: e.to_string(),
                        });
                    }
                }
                Effect::Schedule(timer) => self.schedule(timer),
                Effect::Publish(snapshot) => {
                    self.snapshot_tx.send_replace(snapshot);
                }
                Effect::Warn(warning) => self.warn(warning),
            }
        }
    }

    fn emit(&self, kind: SignalKind, signal: Signal) {
        if let Err(e) = self.manager.emit(kind, signal.payload) {
            warn!(kind = %kind, error = %e, "Failed to send signal");
            self.warn(CallWarning::SignalingFailed {
                kind,
                message: e.to_string(),
            });
        }
    }

    fn schedule(&self, timer: Timer) {
        let delay = match timer {
            Timer::Ring(_) => self.config.ring_timeout,
            Timer::Degraded { .. } => self.config.degraded_timeout,
        };
        let tx = self.tx.clone();

        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(Message::Timer(timer));
        });
    }

    fn warn(&self, warning: CallWarning) {
        // No subscribers is fine.
        let _ = self.warnings.send(warning);
    }
}

// ============================================================================
// Tests
// ============================================================================

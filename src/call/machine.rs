//! Call lifecycle state machine.
//!
//! [`CallMachine`] is the I/O-free core of the coordinator. Every input
//! (local command, inbound signal, connectivity change, timer) is applied
//! synchronously and yields a list of [`Effect`]s for the caller to run.
//! Rejected commands return an error and leave the machine untouched.
//!
//! # Transitions
//!
//! | From | Input | To |
//! |------|-------|----|
//! | `Idle` | place call | `Outgoing` |
//! | `Idle` | `call:offer` | `Incoming` |
//! | `Outgoing` | `call:accept` / `call:sync` | `Active` |
//! | `Outgoing` | `call:decline` / `call:busy` / cancel / ring timeout | `Ended` → `Idle` |
//! | `Incoming` | answer | `Active` |
//! | `Incoming` | decline / `call:end` / ring timeout | `Ended` → `Idle` |
//! | `Active` | end / `call:end` / degraded timeout | `Ended` → `Idle` |
//!
//! Signals whose session id or sender do not match the current session
//! are stale and ignored, so a late answer cannot revive a finished call.
//!
//! # Reconnects
//!
//! Signals sent while the link was down are lost, so an active call is not
//! trusted after a reconnect. The machine sends `call:sync` and keeps the
//! degraded deadline armed until the peer confirms with `call:accept`. A
//! peer that no longer has the call answers `call:end`; a silent peer lets
//! the deadline end the call.

// ============================================================================
// Imports
// ============================================================================

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{CallId, UserId};
use crate::media::MediaAction;
use crate::protocol::{CallPayload, MediaKind, Signal, SignalKind};

use super::session::{
    CallSession, CallSnapshot, CallStatus, CallWarning, Direction, EndReason, EndedCall,
};

// ============================================================================
// Command
// ============================================================================

/// Local user command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ring a remote user.
    Place {
        /// Callee.
        remote: UserId,
        /// Requested media.
        media_kind: MediaKind,
    },
    /// Answer the ringing incoming call.
    Answer,
    /// Reject the ringing incoming call.
    Decline,
    /// Hang up, cancel or decline, whichever applies.
    End,
    /// Flip the mute flag.
    ToggleMute,
    /// Flip the loudspeaker flag.
    ToggleSpeaker,
}

impl Command {
    /// Operation name used in errors and logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Place { .. } => "place_call",
            Self::Answer => "answer_call",
            Self::Decline => "decline_call",
            Self::End => "end_call",
            Self::ToggleMute => "toggle_mute",
            Self::ToggleSpeaker => "toggle_speaker",
        }
    }
}

// ============================================================================
// Timer
// ============================================================================

/// Deadline scheduled by the machine and fed back when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// The session was not answered in time.
    Ring(CallId),
    /// The link stayed down for the whole degraded window.
    Degraded {
        /// Session that was in progress when the link dropped.
        session: CallId,
        /// Outage counter value when the timer was scheduled.
        epoch: u64,
    },
}

// ============================================================================
// Effect
// ============================================================================

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a signal to the peer. Failure must not undo the transition.
    Emit(SignalKind, CallPayload),
    /// Drive the media device.
    Media(MediaAction),
    /// Start a deadline.
    Schedule(Timer),
    /// Replace the published snapshot.
    Publish(CallSnapshot),
    /// Surface a non-fatal condition.
    Warn(CallWarning),
}

// ============================================================================
// CallMachine
// ============================================================================

/// Single-call state machine.
#[derive(Debug, Clone)]
pub struct CallMachine {
    /// Identity of the local user.
    local: UserId,
    /// Current session; `None` exactly when idle.
    session: Option<CallSession>,
    /// Last connectivity reported.
    connected: bool,
    /// Number of outages observed; stamps degraded timers.
    degraded_epoch: u64,
    /// Link is back but the peer has not confirmed the active call.
    resyncing: bool,
    /// Most recently ended call.
    last_ended: Option<EndedCall>,
}

impl CallMachine {
    /// Creates an idle machine.
    #[must_use]
    pub fn new(local: UserId, connected: bool) -> Self {
        Self {
            local,
            session: None,
            connected,
            degraded_epoch: 0,
            resyncing: false,
            last_ended: None,
        }
    }

    /// Current status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> CallStatus {
        self.session.as_ref().map_or(CallStatus::Idle, |s| s.status)
    }

    /// Current session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    /// Identity of the local user.
    #[inline]
    #[must_use]
    pub fn local_user(&self) -> &UserId {
        &self.local
    }

    /// Returns `true` while the link is down or an active call awaits
    /// confirmation after a reconnect.
    #[inline]
    #[must_use]
    pub fn degraded(&self) -> bool {
        !self.connected || self.resyncing
    }

    /// Builds the snapshot for the current state.
    #[must_use]
    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            status: self.status(),
            session: self.session.clone(),
            connectivity_degraded: self.degraded(),
            last_ended: self.last_ended.clone(),
        }
    }
}

// ============================================================================
// CallMachine - Commands
// ============================================================================

impl CallMachine {
    /// Applies a local command.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyInCall`] for `Place` outside `Idle`
    /// - [`Error::NotConnected`] for `Place` while the link is down
    /// - [`Error::NoActiveCall`] for `Answer`/`Decline` outside `Incoming`
    ///   and toggles outside `Active`
    ///
    /// `End` never fails; from `Idle` it is a no-op.
    pub fn command(&mut self, command: Command) -> Result<Vec<Effect>> {
        match command {
            Command::Place { remote, media_kind } => self.place(remote, media_kind),
            Command::Answer => self.answer(),
            Command::Decline => self.decline(),
            Command::End => Ok(self.end()),
            Command::ToggleMute => self.toggle(Command::ToggleMute),
            Command::ToggleSpeaker => self.toggle(Command::ToggleSpeaker),
        }
    }

    fn place(&mut self, remote: UserId, media_kind: MediaKind) -> Result<Vec<Effect>> {
        if let Some(session) = &self.session {
            return Err(Error::already_in_call(session.status));
        }
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let session = CallSession::new(CallId::generate(), remote, media_kind, Direction::Outgoing);
        debug!(session = %session.id, remote = %session.remote, %media_kind, "Placing call");

        let mut effects = vec![
            Effect::Emit(SignalKind::Offer, self.payload_for(&session)),
            Effect::Schedule(Timer::Ring(session.id)),
        ];
        self.last_ended = None;
        self.session = Some(session);
        effects.push(self.publish());
        Ok(effects)
    }

    fn answer(&mut self) -> Result<Vec<Effect>> {
        let session = self.ringing_incoming("answer_call")?;
        session.status = CallStatus::Active;
        let media_kind = session.media_kind;
        let session = session.clone();

        debug!(session = %session.id, "Answering call");

        Ok(vec![
            Effect::Emit(SignalKind::Accept, self.payload_for(&session)),
            Effect::Media(MediaAction::Start(media_kind)),
            self.publish(),
        ])
    }

    fn decline(&mut self) -> Result<Vec<Effect>> {
        let session = self.ringing_incoming("decline_call")?.clone();
        let mut effects = vec![Effect::Emit(SignalKind::Decline, self.payload_for(&session))];
        effects.extend(self.finish(EndReason::Declined));
        Ok(effects)
    }

    fn end(&mut self) -> Vec<Effect> {
        let Some(session) = self.session.clone() else {
            trace!("end_call while idle, nothing to do");
            return Vec::new();
        };

        let payload = self.payload_for(&session);
        let mut effects = Vec::new();

        let reason = match session.status {
            CallStatus::Outgoing => {
                effects.push(Effect::Emit(SignalKind::End, payload));
                EndReason::Cancelled
            }
            CallStatus::Incoming => {
                effects.push(Effect::Emit(SignalKind::Decline, payload));
                EndReason::Declined
            }
            CallStatus::Active => {
                effects.push(Effect::Emit(SignalKind::End, payload));
                effects.push(Effect::Media(MediaAction::Stop));
                EndReason::LocalHangup
            }
            CallStatus::Idle | CallStatus::Ended => return Vec::new(),
        };

        effects.extend(self.finish(reason));
        effects
    }

    fn toggle(&mut self, command: Command) -> Result<Vec<Effect>> {
        let status = self.status();
        let session = match self.session.as_mut() {
            Some(session) if session.status == CallStatus::Active => session,
            _ => return Err(Error::no_active_call(command.name(), status)),
        };

        let action = if command == Command::ToggleMute {
            session.muted = !session.muted;
            MediaAction::Mute(session.muted)
        } else {
            session.speaker_on = !session.speaker_on;
            MediaAction::Speaker(session.speaker_on)
        };

        Ok(vec![Effect::Media(action), self.publish()])
    }

    fn ringing_incoming(&mut self, operation: &'static str) -> Result<&mut CallSession> {
        let status = self.status();
        match self.session.as_mut() {
            Some(session) if session.status == CallStatus::Incoming => Ok(session),
            _ => Err(Error::no_active_call(operation, status)),
        }
    }
}

// ============================================================================
// CallMachine - Inbound Signals
// ============================================================================

impl CallMachine {
    /// Applies an inbound signal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] when an offer arrives while another call is
    /// in progress. The machine is unchanged; the caller answers `call:busy`.
    pub fn signal(&mut self, signal: &Signal) -> Result<Vec<Effect>> {
        let payload = &signal.payload;

        if payload.to != self.local {
            debug!(to = %payload.to, kind = %signal.kind, "Ignoring signal addressed to another user");
            return Ok(Vec::new());
        }

        match signal.kind {
            SignalKind::Offer => return self.offer(payload),
            SignalKind::Sync => return Ok(self.sync(payload)),
            _ => {}
        }

        let Some(session) = self.session.as_mut() else {
            debug!(kind = %signal.kind, session = %payload.session_id, "Ignoring signal while idle");
            return Ok(Vec::new());
        };

        if session.id != payload.session_id || session.remote != payload.from {
            debug!(
                kind = %signal.kind,
                session = %payload.session_id,
                current = %session.id,
                "Ignoring stale signal"
            );
            return Ok(Vec::new());
        }

        let effects = match (signal.kind, session.status) {
            (SignalKind::Accept, CallStatus::Active) if self.resyncing => self.confirm(),
            (SignalKind::Accept, CallStatus::Outgoing) => {
                session.status = CallStatus::Active;
                let media_kind = session.media_kind;
                debug!(session = %payload.session_id, "Call accepted by remote");
                vec![Effect::Media(MediaAction::Start(media_kind)), self.publish()]
            }
            (SignalKind::Decline, CallStatus::Outgoing) => self.finish(EndReason::Declined),
            (SignalKind::Busy, CallStatus::Outgoing) => self.finish(EndReason::RemoteBusy),
            (SignalKind::End, CallStatus::Outgoing) => self.finish(EndReason::RemoteHangup),
            (SignalKind::End, CallStatus::Incoming) => self.finish(EndReason::Cancelled),
            (SignalKind::End, CallStatus::Active) => {
                let mut effects = vec![Effect::Media(MediaAction::Stop)];
                effects.extend(self.finish(EndReason::RemoteHangup));
                effects
            }
            (kind, status) => {
                debug!(%kind, %status, "Signal does not apply in current status");
                Vec::new()
            }
        };

        Ok(effects)
    }

    fn offer(&mut self, payload: &CallPayload) -> Result<Vec<Effect>> {
        match &self.session {
            None => {
                let session = CallSession::new(
                    payload.session_id,
                    payload.from.clone(),
                    payload.media_kind,
                    Direction::Incoming,
                );
                debug!(session = %session.id, remote = %session.remote, "Incoming call");

                self.last_ended = None;
                self.session = Some(session);
                Ok(vec![
                    Effect::Schedule(Timer::Ring(payload.session_id)),
                    self.publish(),
                ])
            }
            Some(current) if current.id == payload.session_id => {
                debug!(session = %current.id, "Ignoring duplicate offer");
                Ok(Vec::new())
            }
            Some(_) => Err(Error::Busy {
                from: payload.from.clone(),
            }),
        }
    }

    /// Answers a peer's `call:sync`.
    fn sync(&mut self, payload: &CallPayload) -> Vec<Effect> {
        let current = self
            .session
            .as_ref()
            .filter(|s| s.id == payload.session_id && s.remote == payload.from)
            .cloned();

        let Some(mut session) = current else {
            debug!(session = %payload.session_id, from = %payload.from, "Sync for unknown call, answering end");
            return vec![Effect::Emit(SignalKind::End, payload.reply())];
        };

        match session.status {
            CallStatus::Active => {
                let mut effects = vec![Effect::Emit(SignalKind::Accept, self.payload_for(&session))];
                if self.resyncing {
                    effects.extend(self.confirm());
                }
                effects
            }
            CallStatus::Outgoing => {
                // The callee answered while we could not hear it.
                debug!(session = %session.id, "Sync implies the call was accepted");
                session.status = CallStatus::Active;
                let media_kind = session.media_kind;
                let payload = self.payload_for(&session);
                self.session = Some(session);
                vec![
                    Effect::Emit(SignalKind::Accept, payload),
                    Effect::Media(MediaAction::Start(media_kind)),
                    self.publish(),
                ]
            }
            status => {
                debug!(session = %session.id, %status, "Ignoring sync for unanswered call");
                Vec::new()
            }
        }
    }

    /// The peer confirmed the active call after a reconnect.
    fn confirm(&mut self) -> Vec<Effect> {
        self.resyncing = false;
        debug!("Call confirmed by peer after reconnect");
        vec![Effect::Warn(CallWarning::ConnectivityRestored), self.publish()]
    }
}

// ============================================================================
// CallMachine - Connectivity & Timers
// ============================================================================

impl CallMachine {
    /// Records a connectivity change.
    ///
    /// Losing the link during a call schedules a degraded timer; the call
    /// itself continues until that timer fires. When the link returns
    /// during an active call the timer stays armed and `call:sync` asks the
    /// peer to confirm the call.
    pub fn connectivity(&mut self, connected: bool) -> Vec<Effect> {
        if self.connected == connected {
            return Vec::new();
        }
        self.connected = connected;

        let mut effects = Vec::new();
        if let Some(session) = &self.session {
            if connected && session.status == CallStatus::Active {
                self.resyncing = true;
                debug!(session = %session.id, "Link restored, asking peer to confirm call");
                effects.push(Effect::Emit(SignalKind::Sync, self.payload_for(session)));
            } else if connected {
                effects.push(Effect::Warn(CallWarning::ConnectivityRestored));
            } else {
                self.degraded_epoch += 1;
                effects.push(Effect::Warn(CallWarning::ConnectivityDegraded));
                effects.push(Effect::Schedule(Timer::Degraded {
                    session: session.id,
                    epoch: self.degraded_epoch,
                }));
            }
        }
        effects.push(self.publish());
        effects
    }

    /// Applies a fired timer. Timers for other sessions or outages are ignored.
    pub fn timer(&mut self, timer: Timer) -> Vec<Effect> {
        let Some(session) = self.session.clone() else {
            return Vec::new();
        };

        match timer {
            Timer::Ring(id) if id == session.id => match session.status {
                CallStatus::Outgoing => {
                    let mut effects = vec![Effect::Emit(SignalKind::End, self.payload_for(&session))];
                    effects.extend(self.finish(EndReason::Unanswered));
                    effects
                }
                CallStatus::Incoming => self.finish(EndReason::Unanswered),
                _ => Vec::new(),
            },
            Timer::Degraded { session: id, epoch }
                if id == session.id && epoch == self.degraded_epoch && self.degraded() =>
            {
                let mut effects = Vec::new();
                if session.status == CallStatus::Active {
                    effects.push(Effect::Media(MediaAction::Stop));
                }
                effects.extend(self.finish(EndReason::ConnectivityTimeout));
                effects
            }
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// CallMachine - Helpers
// ============================================================================

impl CallMachine {
    fn payload_for(&self, session: &CallSession) -> CallPayload {
        CallPayload::new(
            session.id,
            self.local.clone(),
            session.remote.clone(),
            session.media_kind,
        )
    }

    fn publish(&self) -> Effect {
        Effect::Publish(self.snapshot())
    }

    /// Tears the session down: one `Ended` snapshot, then `Idle`.
    fn finish(&mut self, reason: EndReason) -> Vec<Effect> {
        let Some(mut session) = self.session.take() else {
            return Vec::new();
        };

        session.status = CallStatus::Ended;
        session.muted = false;
        session.speaker_on = false;
        self.resyncing = false;

        debug!(session = %session.id, %reason, "Call ended");

        let ended = EndedCall {
            session: session.clone(),
            reason,
        };
        let ended_snapshot = CallSnapshot {
            status: CallStatus::Ended,
            session: Some(session),
            connectivity_degraded: self.degraded(),
            last_ended: Some(ended.clone()),
        };
        self.last_ended = Some(ended);

        vec![Effect::Publish(ended_snapshot), self.publish()]
    }
}

// ============================================================================
// Tests
// ============================================================================

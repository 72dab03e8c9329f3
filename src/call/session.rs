//! Call session records and the published snapshot.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::identifiers::{CallId, UserId};
use crate::protocol::{MediaKind, SignalKind};

// ============================================================================
// Direction
// ============================================================================

/// Who placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The remote user called us.
    Incoming,
    /// We called the remote user.
    Outgoing,
}

// ============================================================================
// CallStatus
// ============================================================================

/// Lifecycle status of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    /// No call.
    Idle,
    /// Our offer is ringing on the remote side.
    Outgoing,
    /// A remote offer is ringing locally.
    Incoming,
    /// Both sides answered.
    Active,
    /// Transient teardown state, published once before `Idle`.
    Ended,
}

impl CallStatus {
    /// Returns `true` for `Outgoing`, `Incoming` and `Active`.
    #[inline]
    #[must_use]
    pub const fn is_in_call(&self) -> bool {
        matches!(self, Self::Outgoing | Self::Incoming | Self::Active)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Outgoing => f.write_str("outgoing"),
            Self::Incoming => f.write_str("incoming"),
            Self::Active => f.write_str("active"),
            Self::Ended => f.write_str("ended"),
        }
    }
}

// ============================================================================
// EndReason
// ============================================================================

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    /// We hung up an active call.
    LocalHangup,
    /// The remote side hung up.
    RemoteHangup,
    /// The callee declined (either side's view).
    Declined,
    /// The callee was already in another call.
    RemoteBusy,
    /// The caller withdrew the offer before it was answered.
    Cancelled,
    /// The link stayed down longer than the degraded timeout.
    ConnectivityTimeout,
    /// Nobody answered before the ring timeout.
    Unanswered,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LocalHangup => "local hangup",
            Self::RemoteHangup => "remote hangup",
            Self::Declined => "declined",
            Self::RemoteBusy => "busy",
            Self::Cancelled => "cancelled",
            Self::ConnectivityTimeout => "connectivity timeout",
            Self::Unanswered => "unanswered",
        };
        f.write_str(text)
    }
}

// ============================================================================
// CallSession
// ============================================================================

/// The single call the coordinator knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    /// Session identifier shared with the peer.
    pub id: CallId,
    /// The other participant.
    pub remote: UserId,
    /// Media carried by the call.
    pub media_kind: MediaKind,
    /// Who placed the call.
    pub direction: Direction,
    /// Lifecycle status.
    pub status: CallStatus,
    /// Microphone muted.
    pub muted: bool,
    /// Audio routed to the loudspeaker.
    pub speaker_on: bool,
}

impl CallSession {
    /// Creates a ringing session with flags cleared.
    #[must_use]
    pub fn new(id: CallId, remote: UserId, media_kind: MediaKind, direction: Direction) -> Self {
        let status = match direction {
            Direction::Incoming => CallStatus::Incoming,
            Direction::Outgoing => CallStatus::Outgoing,
        };

        Self {
            id,
            remote,
            media_kind,
            direction,
            status,
            muted: false,
            speaker_on: false,
        }
    }
}

// ============================================================================
// EndedCall
// ============================================================================

/// The last call that ended and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedCall {
    /// Final state of the session (status `Ended`, flags cleared).
    pub session: CallSession,
    /// Cause of the teardown.
    pub reason: EndReason,
}

// ============================================================================
// CallSnapshot
// ============================================================================

/// Read-only view of the coordinator published to presentation.
///
/// Replaced as a whole on every transition, so field pairs are always
/// consistent: `status` is `Idle` exactly when `session` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    /// Current status.
    pub status: CallStatus,
    /// Current session, `None` when idle.
    pub session: Option<CallSession>,
    /// Transport reported down while the coordinator is running.
    pub connectivity_degraded: bool,
    /// Most recently ended call, kept until the next call starts.
    pub last_ended: Option<EndedCall>,
}

impl CallSnapshot {
    /// Snapshot of a coordinator with no call.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            status: CallStatus::Idle,
            session: None,
            connectivity_degraded: false,
            last_ended: None,
        }
    }

    /// Returns `true` while ringing or connected.
    #[inline]
    #[must_use]
    pub fn has_active_call(&self) -> bool {
        self.status.is_in_call()
    }

    /// Microphone muted (always `false` without a session).
    #[inline]
    #[must_use]
    pub fn muted(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.muted)
    }

    /// Loudspeaker on (always `false` without a session).
    #[inline]
    #[must_use]
    pub fn speaker_on(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.speaker_on)
    }

    /// Reason the last call ended, if any.
    #[inline]
    #[must_use]
    pub fn last_end_reason(&self) -> Option<EndReason> {
        self.last_ended.as_ref().map(|e| e.reason)
    }
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

// ============================================================================
// CallWarning
// ============================================================================

/// Non-fatal condition surfaced to presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallWarning {
    /// The transport went down while a call is in progress.
    ConnectivityDegraded,
    /// The transport came back.
    ConnectivityRestored,
    /// A media/device operation failed.
    Device {
        /// Device operation name.
        operation: &'static str,
        /// Error text.
        message: String,
    },
    /// An outbound signal could not be sent.
    SignalingFailed {
        /// Signal that was dropped.
        kind: SignalKind,
        /// Error text.
        message: String,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn session(direction: Direction) -> CallSession {
        CallSession::new(CallId::generate(), UserId::new("bob"), MediaKind::Audio, direction)
    }

    #[test]
    fn test_new_session_status_follows_direction() {
        assert_eq!(session(Direction::Incoming).status, CallStatus::Incoming);
        assert_eq!(session(Direction::Outgoing).status, CallStatus::Outgoing);
        assert!(!session(Direction::Outgoing).muted);
    }

    #[test]
    fn test_idle_snapshot() {
        let snapshot = CallSnapshot::idle();
        assert!(!snapshot.has_active_call());
        assert!(snapshot.session.is_none());
        assert!(!snapshot.muted());
        assert_eq!(snapshot.last_end_reason(), None);
    }

    #[test]
    fn test_ended_status_is_not_in_call() {
        assert!(CallStatus::Active.is_in_call());
        assert!(!CallStatus::Ended.is_in_call());
        assert!(!CallStatus::Idle.is_in_call());
    }

    #[test]
    fn test_flags_read_through_session() {
        let mut s = session(Direction::Incoming);
        s.status = CallStatus::Active;
        s.speaker_on = true;
        let snapshot = CallSnapshot {
            status: CallStatus::Active,
            session: Some(s),
            connectivity_degraded: false,
            last_ended: None,
        };
        assert!(snapshot.speaker_on());
        assert!(!snapshot.muted());
    }

    #[test]
    fn test_end_reason_display() {
        assert_eq!(EndReason::RemoteBusy.to_string(), "busy");
        assert_eq!(EndReason::ConnectivityTimeout.to_string(), "connectivity timeout");
    }
}

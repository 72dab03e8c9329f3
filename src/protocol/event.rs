//! Signal frame and event vocabulary.
//!
//! Signals are the only messages exchanged over the signaling connection.
//! Each one names a call-lifecycle intent and carries a [`CallPayload`].
//!
//! # Event Types
//!
//! | Kind | Wire name |
//! |------|-----------|
//! | [`SignalKind::Offer`] | `call:offer` |
//! | [`SignalKind::Accept`] | `call:accept` |
//! | [`SignalKind::Decline`] | `call:decline` |
//! | [`SignalKind::End`] | `call:end` |
//! | [`SignalKind::Busy`] | `call:busy` |
//! | [`SignalKind::Sync`] | `call:sync` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{from_str, to_string};

use crate::error::{Error, Result};

use super::payload::CallPayload;

// ============================================================================
// SignalKind
// ============================================================================

/// Call-lifecycle intent named by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Caller rings the callee.
    #[serde(rename = "call:offer")]
    Offer,
    /// Callee answered.
    #[serde(rename = "call:accept")]
    Accept,
    /// Callee rejected the offer.
    #[serde(rename = "call:decline")]
    Decline,
    /// Either side hung up, or the caller cancelled before an answer.
    #[serde(rename = "call:end")]
    End,
    /// Callee is already in another call.
    #[serde(rename = "call:busy")]
    Busy,
    /// Asks the peer to confirm a call after a reconnect.
    ///
    /// Answered with `call:accept` if the peer still has the call, or
    /// `call:end` if it does not.
    #[serde(rename = "call:sync")]
    Sync,
}

impl SignalKind {
    /// Every kind, in vocabulary order.
    pub const ALL: [Self; 6] = [
        Self::Offer,
        Self::Accept,
        Self::Decline,
        Self::End,
        Self::Busy,
        Self::Sync,
    ];

    /// Returns the wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "call:offer",
            Self::Accept => "call:accept",
            Self::Decline => "call:decline",
            Self::End => "call:end",
            Self::Busy => "call:busy",
            Self::Sync => "call:sync",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Signal
// ============================================================================

/// A single signaling frame.
///
/// # Format
///
/// ```json
/// { "event": "call:accept", "data": { "sessionId": "...", "from": "bob", "to": "alice", "mediaKind": "audio" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Event name.
    #[serde(rename = "event")]
    pub kind: SignalKind,

    /// Event data.
    #[serde(rename = "data")]
    pub payload: CallPayload,
}

impl Signal {
    /// Creates a signal.
    #[inline]
    #[must_use]
    pub fn new(kind: SignalKind, payload: CallPayload) -> Self {
        Self { kind, payload }
    }

    /// Creates a reply of the given kind addressed back to this signal's sender.
    #[inline]
    #[must_use]
    pub fn reply(&self, kind: SignalKind) -> Self {
        Self::new(kind, self.payload.reply())
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(to_string(self)?)
    }

    /// Parses a frame from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for unknown events or malformed payloads.
    pub fn decode(text: &str) -> Result<Self> {
        from_str(text).map_err(|e| Error::protocol(format!("invalid signal frame: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::{CallId, UserId};
    use crate::protocol::MediaKind;

    fn payload() -> CallPayload {
        CallPayload::new(
            CallId::generate(),
            UserId::new("alice"),
            UserId::new("bob"),
            MediaKind::Audio,
        )
    }

    #[test]
    fn test_wire_names_match_serde() {
        for kind in SignalKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_encode_uses_event_and_data_keys() {
        let signal = Signal::new(SignalKind::Offer, payload());
        let value: serde_json::Value = serde_json::from_str(&signal.encode().unwrap()).unwrap();
        assert_eq!(value["event"], "call:offer");
        assert_eq!(value["data"]["from"], "alice");
    }

    #[test]
    fn test_decode_frame() {
        let text = r#"{
            "event": "call:busy",
            "data": {
                "sessionId": "00000000-0000-0000-0000-000000000000",
                "from": "bob",
                "to": "alice",
                "mediaKind": "video"
            }
        }"#;
        let signal = Signal::decode(text).unwrap();
        assert_eq!(signal.kind, SignalKind::Busy);
        assert_eq!(signal.payload.media_kind, MediaKind::Video);
        assert_eq!(signal.payload.to, UserId::new("alice"));
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        let text = r#"{"event":"call:transfer","data":{"sessionId":"00000000-0000-0000-0000-000000000000","from":"a","to":"b","mediaKind":"audio"}}"#;
        let err = Signal::decode(text).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_reply_addresses_sender() {
        let offer = Signal::new(SignalKind::Offer, payload());
        let busy = offer.reply(SignalKind::Busy);
        assert_eq!(busy.kind, SignalKind::Busy);
        assert_eq!(busy.payload.to, UserId::new("alice"));
        assert_eq!(busy.payload.session_id, offer.payload.session_id);
    }
}

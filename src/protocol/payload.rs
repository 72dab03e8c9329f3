//! Payload carried by every signaling event.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::{CallId, UserId};

// ============================================================================
// MediaKind
// ============================================================================

/// Kind of media a call carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Voice only.
    Audio,
    /// Voice and camera.
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

// ============================================================================
// CallPayload
// ============================================================================

/// Data attached to a signal.
///
/// `from` is always the sender and `to` the recipient; the relay routes
/// on `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPayload {
    /// Call the signal refers to.
    pub session_id: CallId,
    /// Sender.
    pub from: UserId,
    /// Recipient.
    pub to: UserId,
    /// Media kind of the call.
    pub media_kind: MediaKind,
}

impl CallPayload {
    /// Creates a payload.
    #[inline]
    #[must_use]
    pub fn new(session_id: CallId, from: UserId, to: UserId, media_kind: MediaKind) -> Self {
        Self {
            session_id,
            from,
            to,
            media_kind,
        }
    }

    /// Returns the payload addressed back to the sender.
    #[must_use]
    pub fn reply(&self) -> Self {
        Self {
            session_id: self.session_id,
            from: self.to.clone(),
            to: self.from.clone(),
            media_kind: self.media_kind,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_wire_names() {
        assert_eq!(serde_json::to_string(&MediaKind::Audio).unwrap(), "\"audio\"");
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), "\"video\"");
    }

    #[test]
    fn test_payload_uses_camel_case() {
        let payload = CallPayload::new(
            CallId::generate(),
            UserId::new("alice"),
            UserId::new("bob"),
            MediaKind::Video,
        );
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("sessionId").is_some());
        assert_eq!(value["mediaKind"], "video");
    }

    #[test]
    fn test_reply_swaps_parties() {
        let payload = CallPayload::new(
            CallId::generate(),
            UserId::new("alice"),
            UserId::new("bob"),
            MediaKind::Audio,
        );
        let reply = payload.reply();
        assert_eq!(reply.from, payload.to);
        assert_eq!(reply.to, payload.from);
        assert_eq!(reply.session_id, payload.session_id);
    }
}

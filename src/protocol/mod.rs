//! Signaling protocol message types.
//!
//! This module defines the frames exchanged with the signaling server.
//!
//! # Protocol Overview
//!
//! | Event | Direction | Purpose |
//! |-------|-----------|---------|
//! | `call:offer` | Caller → Callee | Ring the callee |
//! | `call:accept` | Callee → Caller | Callee answered |
//! | `call:decline` | Callee → Caller | Callee rejected the offer |
//! | `call:end` | Either | Hang up or cancel |
//! | `call:busy` | Callee → Caller | Callee already in another call |
//! | `call:sync` | Either | Confirm an active call after a reconnect |
//!
//! # Frame Format
//!
//! ```json
//! {
//!   "event": "call:offer",
//!   "data": {
//!     "sessionId": "2f1c...",
//!     "from": "alice",
//!     "to": "bob",
//!     "mediaKind": "video"
//!   }
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | [`SignalKind`] and the [`Signal`] frame |
//! | `payload` | [`CallPayload`] and [`MediaKind`] |

// ============================================================================
// Submodules
// ============================================================================

/// Signal frame and event vocabulary.
pub mod event;

/// Payload carried by every signal.
pub mod payload;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{Signal, SignalKind};
pub use payload::{CallPayload, MediaKind};

//! Call Signal - real-time call signaling over WebSocket.
//!
//! This library keeps one persistent signaling link per user and drives a
//! single-call session state machine on top of it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌─────────────────┐  emit / on   ┌───────────────────┐
//! │ Presentation │────────────►│ CallCoordinator │◄────────────►│ ConnectionManager │◄──► server
//! │              │◄────────────│  (CallMachine)  │              │  (reconnects)     │
//! └──────────────┘  snapshots  └────────┬────────┘              └───────────────────┘
//!                                       │ MediaDevice
//!                                       ▼
//! ```
//!
//! Key design principles:
//!
//! - One call at a time per user; extra offers are answered `call:busy`
//! - Every input to a call goes through one queue, so transitions never interleave
//! - Presentation reads immutable [`CallSnapshot`] values, never shared state
//! - Listeners registered before the link is up are replayed once it is
//!
//! # Quick Start
//!
//! ```no_run
//! use call_signal::{CallClient, CallStatus, MediaKind, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = CallClient::builder()
//!         .server_url("wss://signal.example.com/")
//!         .user("alice")
//!         .start()
//!         .await?;
//!
//!     client.place_call("bob", MediaKind::Video).await?;
//!
//!     let mut snapshots = client.subscribe();
//!     let _ = snapshots.wait_for(|s| s.status == CallStatus::Active).await;
//!
//!     client.toggle_mute().await?;
//!     client.end_call().await?;
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`call`] | Call state machine and coordinator |
//! | [`client`] | Client facade and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`media`] | Media device boundary |
//! | [`protocol`] | Signal wire format |
//! | [`transport`] | WebSocket link, reconnects and test relay |

// ============================================================================
// Modules
// ============================================================================

/// Call session state machine and coordinator.
///
/// - [`CallCoordinator`] - Serialized owner of the current call
/// - [`CallSnapshot`] - Immutable view published to presentation
pub mod call;

/// Client facade and configuration.
///
/// Use [`CallClient::builder()`] to create a connected client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for users and call sessions.
pub mod identifiers;

/// Media device boundary.
pub mod media;

/// Signal wire format.
pub mod protocol;

/// WebSocket signaling transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Call types
pub use call::{
    CallCoordinator, CallSession, CallSnapshot, CallStatus, CallWarning, CoordinatorConfig,
    Direction, EndReason, EndedCall,
};

// Client types
pub use client::{CallClient, CallClientBuilder, ClientOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CallId, UserId};

// Media types
pub use media::{MediaDevice, NullMedia};

// Protocol types
pub use protocol::{CallPayload, MediaKind, Signal, SignalKind};

// Transport types
pub use transport::{
    ConnectionManager, ConnectionState, LinkEvent, ListenerId, ManagerConfig, RelayServer,
};

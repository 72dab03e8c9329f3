//! WebSocket signaling transport.
//!
//! This module owns the persistent, bidirectional link between the local
//! user and the signaling server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                          ┌─────────────────┐
//! │  ConnectionManager   │                          │ Signaling       │
//! │                      │        WebSocket         │ server          │
//! │  supervisor task     │◄────────────────────────►│ (or RelayServer)│
//! │  → Connection        │   ws://host/?userId=..   │                 │
//! └──────────────────────┘                          └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ConnectionManager::on` - Register listeners (queued until connected)
//! 2. `ConnectionManager::connect` - Handshake, replay queued listeners
//! 3. Supervisor task delivers inbound signals in arrival order
//! 4. Unexpected drop - `Connecting`, reconnect with backoff
//! 5. `ConnectionManager::disconnect` - Close link, stop reconnecting
//!
//! Outages are also reported as `LinkEvent`s so a fast drop and reconnect is
//! never missed by the call layer.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backoff` | Reconnect delay schedule |
//! | `connection` | One WebSocket link and its event loop |
//! | `manager` | Connection lifecycle, listener registry, reconnects |
//! | `relay` | In-process signaling relay |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect delay schedule.
pub mod backoff;

/// WebSocket connection and event loop.
pub mod connection;

/// Connection lifecycle and listener registry.
pub mod manager;

/// In-process signaling relay.
pub mod relay;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::{Backoff, ReconnectPolicy};
pub use connection::{Connection, LinkClosed};
pub use manager::{
    ConnectionManager, ConnectionState, LinkEvent, Listener, ListenerId, ManagerConfig,
};
pub use relay::RelayServer;

//! Error types for call signaling.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use call_signal::{CallClient, MediaKind, Result, UserId};
//!
//! async fn example(client: &CallClient) -> Result<()> {
//!     client.coordinator().place_call(UserId::new("bob"), MediaKind::Audio).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::NotConnected`], [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::ConnectivityDegraded`] |
//! | Call state | [`Error::AlreadyInCall`], [`Error::Busy`], [`Error::NoActiveCall`] |
//! | Device | [`Error::Device`] |
//! | Protocol | [`Error::Protocol`] |
//! | Lifecycle | [`Error::Shutdown`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::call::CallStatus;
use crate::identifiers::UserId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// An outbound signal was emitted while the transport is down.
    #[error("Not connected to signaling server")]
    NotConnected,

    /// WebSocket connection failed.
    ///
    /// Returned when the signaling connection cannot be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection timeout waiting for the handshake.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Advisory: the transport is down while a call may still be active.
    #[error("Connectivity degraded while a call is in progress")]
    ConnectivityDegraded,

    // ========================================================================
    // Call State Errors
    // ========================================================================
    /// `place_call` issued while a call already exists.
    #[error("Already in call (status: {status})")]
    AlreadyInCall {
        /// Status of the existing call.
        status: CallStatus,
    },

    /// Inbound offer received while another call is in progress.
    ///
    /// Answered on the wire with `call:busy`; never surfaced to the user.
    #[error("Busy: rejected offer from {from}")]
    Busy {
        /// The caller whose offer was rejected.
        from: UserId,
    },

    /// Command issued in a state where it does not apply.
    #[error("No active call for {operation} (status: {status})")]
    NoActiveCall {
        /// The rejected operation.
        operation: &'static str,
        /// Status at the time of the command.
        status: CallStatus,
    },

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// Media/device layer failure.
    ///
    /// Surfaced as a warning; never fails a call-state transition.
    #[error("Device error during {operation}: {message}")]
    Device {
        /// The media operation that failed.
        operation: &'static str,
        /// Description from the device layer.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected signaling frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The owning component has been shut down.
    #[error("Shut down: {component}")]
    Shutdown {
        /// Name of the component that is no longer running.
        component: &'static str,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an already-in-call error.
    #[inline]
    pub fn already_in_call(status: CallStatus) -> Self {
        Self::AlreadyInCall { status }
    }

    /// Creates a no-active-call error.
    #[inline]
    pub fn no_active_call(operation: &'static str, status: CallStatus) -> Self {
        Self::NoActiveCall { operation, status }
    }

    /// Creates a device error.
    #[inline]
    pub fn device(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Device {
            operation,
            message: message.into(),
        }
    }

    /// Creates a shutdown error.
    #[inline]
    pub fn shutdown(component: &'static str) -> Self {
        Self::Shutdown { component }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::ConnectivityDegraded
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the command was rejected by the call state machine.
    ///
    /// These never mutate state and are safe to render inline.
    #[inline]
    #[must_use]
    pub fn is_call_state_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInCall { .. } | Self::Busy { .. } | Self::NoActiveCall { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::ConnectivityDegraded
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing user id");
        assert_eq!(err.to_string(), "Configuration error: missing user id");
    }

    #[test]
    fn test_call_state_errors_display_status() {
        let err = Error::already_in_call(CallStatus::Active);
        assert_eq!(err.to_string(), "Already in call (status: active)");

        let err = Error::no_active_call("toggle_mute", CallStatus::Idle);
        assert_eq!(err.to_string(), "No active call for toggle_mute (status: idle)");
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::NotConnected.is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::ConnectivityDegraded.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_call_state_error() {
        assert!(Error::already_in_call(CallStatus::Outgoing).is_call_state_error());
        assert!(
            Error::Busy {
                from: UserId::new("carol")
            }
            .is_call_state_error()
        );
        assert!(!Error::NotConnected.is_call_state_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::NotConnected.is_recoverable());
        assert!(!Error::no_active_call("answer_call", CallStatus::Idle).is_recoverable());
    }

    #[test]
    fn test_device_error() {
        let err = Error::device("apply_speaker", "no output route");
        assert_eq!(
            err.to_string(),
            "Device error during apply_speaker: no output route"
        );
        assert!(!err.is_call_state_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_ws_error() {
        let err: Error = WsError::ConnectionClosed.into();
        assert!(matches!(err, Error::WebSocket(_)));
        assert!(err.is_connection_error());
    }
}

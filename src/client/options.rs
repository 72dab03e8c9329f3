//! Client tuning options.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use call_signal::ClientOptions;
//!
//! let options = ClientOptions::new()
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_max_reconnect_attempts(10)
//!     .with_ring_timeout(Duration::from_secs(30));
//!
//! assert!(options.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::call::{CoordinatorConfig, DEFAULT_DEGRADED_TIMEOUT, DEFAULT_RING_TIMEOUT};
use crate::error::{Error, Result};
use crate::transport::manager::DEFAULT_CONNECT_TIMEOUT;
use crate::transport::backoff::{DEFAULT_RECONNECT_INITIAL, DEFAULT_RECONNECT_MAX};
use crate::transport::ReconnectPolicy;

// ============================================================================
// ClientOptions
// ============================================================================

/// Timeouts and retry limits for a [`CallClient`](super::CallClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Limit for one WebSocket handshake.
    pub connect_timeout: Duration,

    /// First reconnect delay; doubles per attempt.
    pub reconnect_initial: Duration,

    /// Upper bound for the reconnect delay.
    pub reconnect_max: Duration,

    /// Reconnect attempts before giving up. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,

    /// How long a call rings before it is abandoned.
    pub ring_timeout: Duration,

    /// How long a call survives without a signaling link.
    pub degraded_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_initial: DEFAULT_RECONNECT_INITIAL,
            reconnect_max: DEFAULT_RECONNECT_MAX,
            max_reconnect_attempts: None,
            ring_timeout: DEFAULT_RING_TIMEOUT,
            degraded_timeout: DEFAULT_DEGRADED_TIMEOUT,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reconnect delay bounds.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max;
        self
    }

    /// Limits reconnect attempts.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Sets the ring timeout.
    #[inline]
    #[must_use]
    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = timeout;
        self
    }

    /// Sets the degraded-connectivity timeout.
    #[inline]
    #[must_use]
    pub fn with_degraded_timeout(mut self, timeout: Duration) -> Self {
        self.degraded_timeout = timeout;
        self
    }
}

// ============================================================================
// Validation & Conversion
// ============================================================================

impl ClientOptions {
    /// Checks that every duration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero durations or an initial reconnect
    /// delay above the maximum.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("connect_timeout", self.connect_timeout),
            ("reconnect_initial", self.reconnect_initial),
            ("reconnect_max", self.reconnect_max),
            ("ring_timeout", self.ring_timeout),
            ("degraded_timeout", self.degraded_timeout),
        ];

        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::config(format!("{name} must be greater than zero")));
        }

        if self.reconnect_initial > self.reconnect_max {
            return Err(Error::config(format!(
                "reconnect_initial ({:?}) exceeds reconnect_max ({:?})",
                self.reconnect_initial, self.reconnect_max
            )));
        }

        Ok(())
    }

    /// Reconnect policy for the connection manager.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial: self.reconnect_initial,
            max: self.reconnect_max,
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Deadlines for the call coordinator.
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            ring_timeout: self.ring_timeout,
            degraded_timeout: self.degraded_timeout,
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
    fn test_defaults() {
        let options = ClientOptions::new();
        assert_eq!(options, ClientOptions::default());
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.reconnect_initial, Duration::from_millis(500));
        assert_eq!(options.reconnect_max, Duration::from_secs(30));
        assert_eq!(options.max_reconnect_attempts, None);
        assert_eq!(options.ring_timeout, Duration::from_secs(45));
        assert_eq!(options.degraded_timeout, Duration::from_secs(30));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let options = ClientOptions::new()
            .with_connect_timeout(Duration::from_secs(2))
            .with_reconnect_delay(Duration::from_millis(100), Duration::from_secs(1))
            .with_max_reconnect_attempts(3)
            .with_ring_timeout(Duration::from_secs(20))
            .with_degraded_timeout(Duration::from_secs(5));

        let policy = options.reconnect_policy();
        assert_eq!(policy.initial, Duration::from_millis(100));
        assert_eq!(policy.max, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, Some(3));

        let config = options.coordinator_config();
        assert_eq!(config.ring_timeout, Duration::from_secs(20));
        assert_eq!(config.degraded_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let err = ClientOptions::new()
            .with_ring_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("ring_timeout"));
    }

    #[test]
    fn test_inverted_reconnect_bounds_rejected() {
        let options = ClientOptions::new()
            .with_reconnect_delay(Duration::from_secs(10), Duration::from_secs(1));
        assert!(matches!(options.validate(), Err(Error::Config { .. })));
    }
}

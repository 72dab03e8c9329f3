//! Reconnect backoff.
//!
//! Delays double from `initial` up to `max`. An optional attempt limit
//! makes the supervisor give up and report `Disconnected`.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_INITIAL: Duration = Duration::from_millis(500);

/// Default ceiling for the reconnect delay.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Reconnect schedule for unexpected disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Give up after this many failed attempts (`None` retries forever).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_RECONNECT_INITIAL,
            max: DEFAULT_RECONNECT_MAX,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Starts a fresh backoff sequence for this policy.
    #[inline]
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 0,
        }
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Iterator-like exponential delay sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    /// Returns the next delay, or `None` once the attempt limit is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max_attempts) = self.policy.max_attempts
            && self.attempt >= max_attempts
        {
            return None;
        }

        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        let delay = self
            .policy
            .initial
            .checked_mul(factor)
            .unwrap_or(self.policy.max)
            .min(self.policy.max);

        self.attempt += 1;
        Some(delay)
    }

    /// Number of delays handed out so far.
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Restarts the sequence after a successful connection.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_up_to_max() {
        let policy = ReconnectPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
            max_attempts: None,
        };
        let mut backoff = policy.backoff();

        let delays: Vec<_> = (0..5).filter_map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn test_attempt_limit() {
        let policy = ReconnectPolicy {
            max_attempts: Some(2),
            ..ReconnectPolicy::default()
        };
        let mut backoff = policy.backoff();

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempt(), 2);
    }

    #[test]
    fn test_large_attempt_counts_saturate() {
        let mut backoff = ReconnectPolicy::default().backoff();
        for _ in 0..100 {
            assert!(backoff.next_delay().unwrap() <= DEFAULT_RECONNECT_MAX);
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(DEFAULT_RECONNECT_INITIAL));
    }
}
